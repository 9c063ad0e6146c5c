use std::error::Error as StdError;

use thiserror::Error;

use crate::socket::Direction;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by graph operations and processing cycles.
#[derive(Debug, Error)]
pub enum Error {
    /// `connect` needs one input and one output endpoint.
    #[error("cannot connect two {0} sockets")]
    SameDirection(Direction),
    /// Buffers can only be requested through input sockets.
    #[error("buffers can only be requested from input sockets")]
    NotAnInput,
    /// A node's graph was dropped while the node was still being processed.
    #[error("graph dropped while processing was in flight")]
    GraphGone,
    /// A required upstream node finished the cycle in the error state.
    #[error("an upstream node failed to process")]
    NodeFailed,
    /// A processing callback reported its own failure.
    #[error(transparent)]
    Process(Box<dyn StdError + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary error for returning out of a process callback.
    pub fn process(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Error::Process(err.into())
    }
}
