pub mod query;
pub mod schema;

pub use query::{QueryExecution, QueryOutput};
pub use schema::{ColumnSchema, SchemaSnapshot, TableSchema};
