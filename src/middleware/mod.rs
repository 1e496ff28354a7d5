pub mod admin_auth;
pub mod gate;
pub mod login_guard;

pub use admin_auth::require_admin_token;
pub use gate::{AdmittedSession, basic_credentials, dav_gate};
pub use login_guard::LoginGuard;
