pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod state;
