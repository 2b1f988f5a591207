pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod queries;
pub mod scheduler;
pub mod store;
pub mod symbols;

pub use error::{AppError, Result};
