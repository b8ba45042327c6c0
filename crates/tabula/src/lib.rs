pub mod config;
pub mod error;
pub mod id;
pub mod server;
pub mod store;
pub mod types;
