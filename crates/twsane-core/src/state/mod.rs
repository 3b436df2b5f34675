//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandleResult, HandlerContext, dispatch};
pub use machine::{SessionState, TwainState};
