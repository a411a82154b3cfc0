pub mod connection;
pub mod operations;

pub use connection::{create_ssl_connector, ConnectionTarget, Database};
pub use operations::ReadingQuery;
