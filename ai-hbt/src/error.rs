use thiserror::Error;

/// Errors raised while building or compiling a behavior tree.
///
/// Failed guards and exhausted selections at runtime are ordinary control
/// flow and never surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BtError {
    #[error("leaf nodes cannot have children")]
    ChildOnLeaf,

    #[error("specification is nested deeper than {limit} levels")]
    DepthExceeded { limit: usize },

    #[error("random weights of node {node} overflow u32")]
    WeightOverflow { node: usize },

    #[error("too many {what} to index with u32")]
    IndexOverflow { what: &'static str },

    #[error("instance block of {size} bytes (align {align}) is not a valid layout")]
    BlockTooLarge { size: usize, align: usize },
}

pub type Result<T> = std::result::Result<T, BtError>;
