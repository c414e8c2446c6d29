pub mod config;
pub mod connection;
pub mod handler;
pub mod room;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use server::{run, serve};
