pub mod principal;

pub use principal::{Principal, PrincipalRole, PrincipalUpdate};
