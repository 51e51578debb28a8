//! The conversational side of carebridge.
//!
//! Per turn the [`Orchestrator`]:
//!
//! 1. **Persists** the user's message through [`ChatHistory`]
//! 2. **Classifies** it onto a [`Destination`](carebridge_core::Destination)
//! 3. **Waits**, bounded and cancellable, on the analysis of an attached file
//! 4. **Assembles context** (recent turns first, rolling summary as background)
//! 5. **Dispatches** to the destination's responder and persists the reply
//!
//! The [`SummaryEngine`] runs after every write and only does work once a
//! full segment of new messages has accumulated.

pub mod classifier;
pub mod context;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod responders;
pub mod summary;
pub mod vocabulary;

pub use classifier::{Classifier, ClassifierPrompt, parse_destination, user_has_completed_reports};
pub use context::{ContextAssembler, build_expanded_query};
pub use error::AgentError;
pub use history::ChatHistory;
pub use orchestrator::{ContextStats, Orchestrator, TurnReply, WaitOutcome};
pub use responders::{CompletionResponder, ReportResponder};
pub use summary::SummaryEngine;
pub use vocabulary::Vocabulary;

#[cfg(test)]
pub(crate) mod test_helpers;
