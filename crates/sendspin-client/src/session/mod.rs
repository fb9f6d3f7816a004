//! Session handshake and lifecycle

pub mod machine;
pub mod state;

pub use machine::{ServerIdentity, SessionAction, SessionMachine};
pub use state::SessionState;
