//! Mixing session state machine and per-denomination session management.

mod manager;
mod state;

pub use manager::SessionManager;
pub use state::Session;
