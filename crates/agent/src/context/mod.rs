//! Bounded conversation context for responders.
//!
//! | Part | Source | Selection |
//! |------|--------|-----------|
//! | Background | Latest rolling summary | Always attached when present |
//! | Recent turns | Newest meaningful messages | Never evicted |
//! | Older turns | Remaining meaningful messages | Relevance to the destination |
//!
//! The same module builds the retrieval search string for the product and
//! document responders ([`expand_query`](ContextAssembler::expand_query)).

pub mod assembler;
pub mod expansion;

pub use assembler::{ContextAssembler, is_meaningful, select_messages};
pub use expansion::{ExpansionInput, build_expanded_query};
