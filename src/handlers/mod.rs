pub mod dav;
pub mod health;
