// Session management module
// One record per (principal, source address), used for admission counting and kicks

pub mod manager;
pub mod types;

pub use manager::SessionManager;
pub use types::{Admission, DenialReason, NewSession, Session, SessionConfig, SessionLimit};
