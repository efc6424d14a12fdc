//! Engine boundary
//!
//! Everything that talks to the native inference engine: command encoding,
//! the command port, state tracking, polling, token streaming and the history
//! injection format.

pub mod codec;
pub mod history;
pub mod poll;
pub mod port;
pub mod state;
pub mod streaming;

#[cfg(test)]
pub(crate) mod testing;
