//! Tidemark Migration Library
//!
//! The platform migrations and the command handlers behind the CLI tool
//! (main.rs). Handlers take a [`Migrator`](tidemark::migration::Migrator) so they
//! can be exercised against the in-memory backend.

pub mod commands;
pub mod migrations;

use tidemark::migration::MigrationError;

/// Process exit code for a failed command
///
/// `2` when another process holds the migration lock (retry later), `1` for
/// everything else.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MigrationError>() {
        Some(e) if e.is_transient() => 2,
        _ => 1,
    }
}
