// Library exports for testing
pub mod admin;
pub mod auth;
pub mod block;
pub mod clock;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;
pub mod sweep;
