//! # carebridge core
//!
//! Domain types, traits, and error definitions for the carebridge health
//! chat assistant. This crate has **no framework dependencies**: it defines
//! the domain model that every other crate implements against.
//!
//! ## Design
//!
//! Each external collaborator is a trait here ([`Provider`], [`RecordStore`],
//! [`FileStore`], [`Responder`]); implementations live in their own crates.
//! Tests swap in scripted or in-memory implementations.

pub mod error;
pub mod files;
pub mod message;
pub mod provider;
pub mod report;
pub mod responder;
pub mod session;
pub mod store;

#[doc(hidden)]
pub use serde_json as __serde_json;

// Re-export key types at crate root for ergonomics
pub use error::{FileStoreError, ProviderError, ResponderError, StoreError};
pub use files::FileStore;
pub use message::{Destination, Message, MessageType, NewMessage};
pub use provider::{PromptMessage, Provider, ProviderRequest, ProviderResponse, Role};
pub use report::{
    Analysis, AnalysisStatus, LabValue, Report, ReportCategory, ReportQuery, ReportStatus, Upload,
};
pub use responder::{AgentContext, Responder, ResponderReply, ResponderRequest};
pub use session::{Session, Summary, SummaryInfo, SummaryKind};
pub use store::RecordStore;
