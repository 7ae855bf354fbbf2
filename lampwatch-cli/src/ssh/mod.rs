//! SSH transport behind the remote backend

mod error;
mod handler;
mod session;

pub use session::RemoteSession;
