//! Command handlers for the CLI

use colored::Colorize;
use tidemark::migration::{MigrationContext, MigrationError, MigrationRecord, Migrator};

fn execution_time(record: &MigrationRecord) -> String {
    record
        .execution_time_ms
        .map_or_else(|| "N/A".to_string(), |ms| format!("{}ms", ms))
}

pub fn status(migrator: &Migrator) -> Result<(), MigrationError> {
    let status = migrator.status()?;

    println!("\n{}\n", "Migration Status".bold());

    if status.applied.is_empty() {
        println!("{} None", "Applied Migrations:".green());
    } else {
        println!("{} ({}):", "Applied Migrations".green(), status.applied_count);
        for record in &status.applied {
            println!(
                "  ✓ {:>4}  {} ({}, {})",
                record.version,
                record.description,
                record.applied_at.format("%Y-%m-%d %H:%M:%S"),
                execution_time(record)
            );
        }
    }

    println!();

    if status.pending.is_empty() {
        println!("{} None", "Pending Migrations:".yellow());
    } else {
        println!("{} ({}):", "Pending Migrations".yellow(), status.pending_count);
        for pending in &status.pending {
            println!("  ⏳ {:>4}  {}", pending.version, pending.description);
        }
    }

    println!(
        "\nSummary: {} applied, {} pending",
        status.applied_count, status.pending_count
    );
    Ok(())
}

/// Apply all pending migrations, or list them with `dry_run`
///
/// Returns the current version afterwards.
pub fn up(migrator: &Migrator, ctx: &MigrationContext, dry_run: bool) -> Result<i64, MigrationError> {
    if dry_run {
        let status = migrator.status()?;
        if status.pending.is_empty() {
            println!("No pending migrations to apply");
        } else {
            println!("Would apply {} migration(s):", status.pending_count);
            for (i, pending) in status.pending.iter().enumerate() {
                println!("  {}. {} {}", i + 1, pending.version, pending.description);
            }
        }
        return Ok(status.latest_applied_version().unwrap_or(0));
    }

    let before = migrator.version()?;
    println!("Applying migrations...");
    let version = migrator.up(ctx)?;

    if version > before {
        println!(
            "{} applied {} migration(s), now at version {}",
            "✅".green(),
            version - before,
            version
        );
    } else {
        println!("{} no migrations to apply (version {})", "✅".green(), version);
    }
    Ok(version)
}

/// Revert the most recent migration, or name it with `dry_run`
///
/// Returns the current version afterwards.
pub fn down(migrator: &Migrator, ctx: &MigrationContext, dry_run: bool) -> Result<i64, MigrationError> {
    if dry_run {
        let history = migrator.history()?;
        match history.last() {
            Some(record) => {
                println!("Would revert migration {} {}", record.version, record.description);
                return Ok(record.version);
            }
            None => {
                println!("No applied migrations to revert");
                return Ok(0);
            }
        }
    }

    let before = migrator.version()?;
    println!("Reverting migration {}...", before);
    let version = migrator.down(ctx)?;
    println!("{} reverted migration {}, now at version {}", "✅".green(), before, version);
    Ok(version)
}

pub fn validate(migrator: &Migrator) -> Result<(), MigrationError> {
    println!("Validating migration history...");
    migrator.validate()?;
    println!("{} history matches the registered migrations", "✅".green());
    Ok(())
}

pub fn history(migrator: &Migrator) -> Result<(), MigrationError> {
    let history = migrator.history()?;
    if history.is_empty() {
        println!("No migrations have been applied");
        return Ok(());
    }

    println!("{:>7}  {:<20}  {:>8}  {:<16}  description", "version", "applied at", "time", "checksum");
    for record in &history {
        println!(
            "{:>7}  {:<20}  {:>8}  {:<16}  {}",
            record.version,
            record.applied_at.format("%Y-%m-%d %H:%M:%S"),
            execution_time(record),
            record.checksum.get(..16).unwrap_or(record.checksum.as_str()),
            record.description
        );
    }
    Ok(())
}

pub fn version(migrator: &Migrator) -> Result<i64, MigrationError> {
    let version = migrator.version()?;
    let latest = migrator.registry().latest_version();
    println!("{}", version);
    if version < latest {
        log::info!("{} migration(s) pending (latest known version {})", latest - version, latest);
    }
    Ok(version)
}

pub fn info(migrator: &Migrator, version: Option<i64>) -> Result<(), MigrationError> {
    let status = migrator.status()?;

    let Some(version) = version else {
        println!("\n{}\n", "Migration System Information".bold());
        println!("Total Migrations: {}", status.total);
        println!("Applied: {}", status.applied_count);
        println!("Pending: {}", status.pending_count);
        if let Some(latest) = status.latest_applied_version() {
            println!("Latest Applied Version: {}", latest);
        }
        if let Some(next) = status.next_pending_version() {
            println!("Next Pending Version: {}", next);
        }
        println!("Lock: {} (holder id {})", migrator.config().lock_name, migrator.config().holder_id);
        return Ok(());
    };

    if let Some(record) = status.applied.iter().find(|r| r.version == version) {
        println!("\n{}\n", "Migration Information".bold());
        println!("Version: {}", record.version);
        println!("Description: {}", record.description);
        println!("Checksum: {}", record.checksum);
        println!("Applied At: {}", record.applied_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("Execution Time: {}", execution_time(record));
    } else if let Some(pending) = status.pending.iter().find(|p| p.version == version) {
        println!("\n{}\n", "Migration Information (Pending)".bold());
        println!("Version: {}", pending.version);
        println!("Description: {}", pending.description);
        println!("Checksum: {}", pending.checksum);
        println!("Status: Pending");
    } else if migrator.registry().is_retired(version) {
        println!("Migration {} is retired", version);
    } else {
        return Err(MigrationError::UnknownVersion { version });
    }
    Ok(())
}
