pub mod application;
pub mod archive;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod geometry;
pub mod lifecycle;
pub mod reconcile;
pub mod server;
pub mod store;
pub mod submission;
pub mod types;

// Re-export main types
pub use types::*;

// Re-export init API for convenience
pub use application::{initialize, Application, InitBuilder, InitOptions};
