//! The agent control loop and the two ways of driving it.
//!
//! [`AgentLoop`] is a small state machine:
//!
//! 1. **Start**: make sure the conversation opens with the persona, append the user message
//! 2. **Ask** the model gateway for a reply
//! 3. **Act**: dispatch any tool calls and append their results, or
//! 4. **Finish** when the reply carries a delimited final answer, or the
//!    model goes quiet right after saying something (stall)
//! 5. Otherwise nudge the model and go around again, up to the iteration cap
//!
//! [`ChatSession`] runs the loop for a live client and streams events;
//! [`JobQueue`] and [`JobWorker`] run it in the background for queued queries.

pub mod loop_runner;
pub mod session;
pub mod worker;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{AgentLoop, AgentOutcome, EXHAUSTED_MARKER, LoopState};
pub use session::ChatSession;
pub use worker::{JobQueue, JobStatusView, JobWorker};
