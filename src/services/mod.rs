pub mod connection_manager;
pub mod database;
pub mod query_service;
pub mod translation;

pub use connection_manager::ConnectionManager;
pub use database::{create_connection, DatabaseConnection};
pub use query_service::{DatabaseListing, QueryRequest, QueryService};
pub use translation::TranslationService;
