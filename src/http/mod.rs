//! Thin HTTP front for the control surface. All session logic lives in
//! [`crate::control`]; handlers only decode, delegate, and shape errors.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
