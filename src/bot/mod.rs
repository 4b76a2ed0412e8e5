//! Conversational dialog engine
//!
//! The state machine decides transitions synchronously; the router gives
//! each conversation a sequential turn loop and runs the I/O the machine
//! asks for; the runner wraps downstream calls in refresh-and-retry.

pub mod machine;
pub mod router;
pub mod runner;

pub use machine::{AuthStateMachine, Messages};
pub use router::ConversationRouter;
