//! Connection Module
//!
//! Establishes a blocking MongoDB connection and selects the target database.
//!
//! This module wraps `mongodb::sync::Client` and provides:
//! - Connection string validation
//! - Connection establishment with a fail-fast `ping`
//! - Error handling

use mongodb::bson::doc;
use mongodb::sync::{Client, Database};
use std::time::Instant;
use thiserror::Error;

/// Connection error type
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Invalid connection string format
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    /// Network/authentication error from the driver
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

/// Connects to MongoDB and returns a handle to `database`
///
/// # Arguments
///
/// * `connection_string` - `mongodb://host:port` or `mongodb+srv://cluster.example.net`
/// * `database` - database holding both the application collections and the
///   migration state collections
///
/// # Examples
///
/// ```no_run
/// use tidemark::connection::connect;
///
/// let database = connect("mongodb://localhost:27017", "platform")?;
/// # Ok::<(), tidemark::connection::ConnectionError>(())
/// ```
///
/// # Notes
///
/// The driver connects lazily; a `ping` is issued here so an unreachable server
/// fails at startup rather than inside the first migration.
pub fn connect(connection_string: &str, database: &str) -> Result<Database, ConnectionError> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("tidemark.connect", database).entered();

    let start = Instant::now();

    validate_connection_string(connection_string)?;
    if database.trim().is_empty() {
        return Err(ConnectionError::InvalidConnectionString(
            "Database name cannot be empty".to_string(),
        ));
    }

    let client = Client::with_uri_str(connection_string)?;
    let database = client.database(database);
    database.run_command(doc! { "ping": 1 }, None)?;

    log::debug!(
        "connected to database '{}' in {}ms",
        database.name(),
        start.elapsed().as_millis()
    );
    Ok(database)
}

/// Validates a connection string format
///
/// # Supported Formats
///
/// - `mongodb://[user:pass@]host[:port][,host...][/db][?options]`
/// - `mongodb+srv://[user:pass@]cluster.example.net[/db][?options]`
pub fn validate_connection_string(connection_string: &str) -> Result<(), ConnectionError> {
    if connection_string.is_empty() {
        return Err(ConnectionError::InvalidConnectionString(
            "Connection string cannot be empty".to_string(),
        ));
    }

    let rest = connection_string
        .strip_prefix("mongodb://")
        .or_else(|| connection_string.strip_prefix("mongodb+srv://"))
        .ok_or_else(|| {
            ConnectionError::InvalidConnectionString(
                "Connection string must start with mongodb:// or mongodb+srv://".to_string(),
            )
        })?;

    let hosts = rest.rsplit('@').next().unwrap_or_default();
    let hosts = hosts.split(['/', '?']).next().unwrap_or_default();
    if hosts.is_empty() {
        return Err(ConnectionError::InvalidConnectionString(
            "Connection string must name at least one host".to_string(),
        ));
    }

    Ok(())
}
