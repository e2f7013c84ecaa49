//! Runtime execution modes.
//!
//! - `chat`: the interactive prompt loop
//! - `render`: streamed stdout/stderr rendering of agent events
//! - `approval`: operator input and yes/no approvals

pub mod approval;
pub mod chat;
pub mod render;
