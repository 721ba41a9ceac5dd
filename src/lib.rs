pub mod bank;
pub mod config;
pub mod errors;
pub mod judge;
pub mod server;
pub mod session;
