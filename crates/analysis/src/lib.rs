//! # carebridge analysis
//!
//! Turns uploaded medical documents into structured findings without
//! blocking the chat path.
//!
//! ```text
//! ingest ──► FileStore (pending/) + Report PENDING ──► job queue
//!                                                        │
//!            worker: claim (CAS) ─► extract ─► primary tier ─┬─► relocate + COMPLETED
//!                                                  │ resource limit
//!                                                  └─► fallback tier ─┴─► FAILED
//! ```
//!
//! The Report row doubles as the job state: a worker only runs a report it
//! managed to move from PENDING to PROCESSING.

pub mod chunking;
pub mod error;
pub mod extract;
pub mod parse;
pub mod pipeline;
pub mod prompts;
pub mod worker;

pub use chunking::{chunk_text, estimate_tokens};
pub use error::AnalysisError;
pub use extract::{DocumentContent, MediaKind};
pub use parse::{combine, parse_analysis, simplified_analysis};
pub use pipeline::{AnalysisOutcome, AnalysisPipeline};
pub use worker::{AnalysisJob, AnalysisService, WorkerPool};

#[cfg(test)]
pub(crate) mod test_helpers;
