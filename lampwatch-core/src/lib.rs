pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod follow;
pub mod inspector;
pub mod model;
pub mod paths;

#[cfg(test)]
mod testing;

pub use backend::ExecutionBackend;
pub use error::{BackendError, Result};
pub use follow::{FollowEvent, FollowHandle, FollowState, FollowStream, LiveFollower};
