//! Todogram Core
//!
//! Command dispatch, reply rendering and the update polling loop.

pub mod dispatcher;
pub mod poll;
pub mod render;

pub use dispatcher::{Command, DispatchError, Dispatcher, Outcome};
pub use poll::{PollLoop, PollSettings};
pub use render::{render, Reply};
