//! Parent-side session management: one child process per live session,
//! supervised over pipes.

pub mod handle;
#[allow(clippy::module_inception)]
pub mod manager;

pub use handle::{SessionHandle, SessionInfo};
pub use manager::{ManagerError, SessionLaunch, SessionManager};
