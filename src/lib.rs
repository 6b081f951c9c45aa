pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::{Config, DatabaseConfig, DatabaseKind, EnvironmentConfig};
pub use error::{Error, Result};
pub use models::*;
pub use services::*;
