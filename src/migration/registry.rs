//! Migration registry, assembled once at startup

use crate::migration::{Migration, MigrationError};
use std::collections::BTreeSet;

/// Ordered, validated set of migrations known to this build
///
/// The registry is built once from an explicit list and never mutated afterwards.
/// Construction sorts definitions by version and rejects:
///
/// - two definitions with the same version (`DuplicateVersion`)
/// - a version `<= 0`, or a gap in the sequence `1, 2, 3, ...` that was not
///   declared retired (`NonSequentialVersion`)
/// - a blank description (`EmptyDescription`)
///
/// Registration order does not matter; iteration is always ascending.
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
    retired: BTreeSet<i64>,
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("versions", &self.versions())
            .field("retired", &self.retired)
            .finish()
    }
}

impl MigrationRegistry {
    /// Build a registry with no retired versions
    ///
    /// # Errors
    ///
    /// See the type-level docs for the validation rules.
    pub fn new(migrations: Vec<Box<dyn Migration>>) -> Result<Self, MigrationError> {
        Self::build(migrations, BTreeSet::new())
    }

    pub fn builder() -> MigrationRegistryBuilder {
        MigrationRegistryBuilder::default()
    }

    fn build(
        mut migrations: Vec<Box<dyn Migration>>,
        retired: BTreeSet<i64>,
    ) -> Result<Self, MigrationError> {
        migrations.sort_by_key(|m| m.version());

        for pair in migrations.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(MigrationError::DuplicateVersion {
                    version: pair[0].version(),
                });
            }
        }

        for migration in &migrations {
            if retired.contains(&migration.version()) {
                return Err(MigrationError::DuplicateVersion {
                    version: migration.version(),
                });
            }
            if migration.description().trim().is_empty() {
                return Err(MigrationError::EmptyDescription {
                    version: migration.version(),
                });
            }
        }

        if let Some(&version) = retired.iter().find(|&&v| v <= 0) {
            return Err(MigrationError::NonSequentialVersion { version, expected: 1 });
        }

        let mut expected = 1;
        for migration in &migrations {
            while retired.contains(&expected) {
                expected += 1;
            }
            if migration.version() != expected {
                return Err(MigrationError::NonSequentialVersion {
                    version: migration.version(),
                    expected,
                });
            }
            expected += 1;
        }

        Ok(Self { migrations, retired })
    }

    /// All definitions in ascending version order
    ///
    /// The iterator borrows the registry; call again to restart.
    pub fn all(&self) -> impl Iterator<Item = &dyn Migration> + '_ {
        self.migrations.iter().map(|m| m.as_ref())
    }

    /// Definitions with `version > after`, ascending
    pub fn since(&self, after: i64) -> impl Iterator<Item = &dyn Migration> + '_ {
        let start = self.migrations.partition_point(|m| m.version() <= after);
        self.migrations[start..].iter().map(|m| m.as_ref())
    }

    /// Definitions with `version <= through` (inclusive), ascending
    pub fn up_to(&self, through: i64) -> impl Iterator<Item = &dyn Migration> + '_ {
        let end = self.migrations.partition_point(|m| m.version() <= through);
        self.migrations[..end].iter().map(|m| m.as_ref())
    }

    pub fn get(&self, version: i64) -> Option<&dyn Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version())
            .ok()
            .map(|idx| self.migrations[idx].as_ref())
    }

    pub fn contains(&self, version: i64) -> bool {
        self.get(version).is_some()
    }

    pub fn is_retired(&self, version: i64) -> bool {
        self.retired.contains(&version)
    }

    /// Highest registered version, or 0 for an empty registry
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map_or(0, |m| m.version())
    }

    pub fn versions(&self) -> Vec<i64> {
        self.migrations.iter().map(|m| m.version()).collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Collects definitions and retired versions before validation
#[derive(Default)]
pub struct MigrationRegistryBuilder {
    migrations: Vec<Box<dyn Migration>>,
    retired: BTreeSet<i64>,
}

impl MigrationRegistryBuilder {
    #[must_use]
    pub fn register(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    #[must_use]
    pub fn register_boxed(mut self, migration: Box<dyn Migration>) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Declare a version that was published and later withdrawn
    ///
    /// A retired version may be skipped in the sequence, and databases that never
    /// recorded it are still considered consistent.
    #[must_use]
    pub fn retire(mut self, version: i64) -> Self {
        self.retired.insert(version);
        self
    }

    /// Validate and freeze the registry
    ///
    /// # Errors
    ///
    /// See [`MigrationRegistry`] for the validation rules.
    pub fn build(self) -> Result<MigrationRegistry, MigrationError> {
        MigrationRegistry::build(self.migrations, self.retired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationDefinition;

    fn noop(version: i64, description: &str) -> Box<dyn Migration> {
        Box::new(MigrationDefinition::new(
            version,
            description,
            |_, _| Ok(()),
            |_, _| Ok(()),
        ))
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_registry_sorts_registration_order() {
        let registry = MigrationRegistry::new(vec![
            noop(3, "third"),
            noop(1, "first"),
            noop(2, "second"),
        ])
        .expect("registry should build");

        assert_eq!(registry.versions(), vec![1, 2, 3]);
        assert_eq!(registry.latest_version(), 3);
        let descriptions: Vec<&str> = registry.all().map(|m| m.description()).collect();
        assert_eq!(descriptions, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let result = MigrationRegistry::new(vec![noop(1, "a"), noop(2, "b"), noop(2, "c")]);
        match result {
            Err(MigrationError::DuplicateVersion { version }) => assert_eq!(version, 2),
            other => panic!("Expected DuplicateVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_gap_rejected() {
        let result = MigrationRegistry::new(vec![noop(1, "a"), noop(3, "c")]);
        match result {
            Err(MigrationError::NonSequentialVersion { version, expected }) => {
                assert_eq!(version, 3);
                assert_eq!(expected, 2);
            }
            other => panic!("Expected NonSequentialVersion, got {other:?}"),
        }
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_retired_gap_allowed() {
        let registry = MigrationRegistry::builder()
            .register_boxed(noop(1, "a"))
            .register_boxed(noop(3, "c"))
            .retire(2)
            .build()
            .expect("retired version may be skipped");

        assert_eq!(registry.versions(), vec![1, 3]);
        assert!(registry.is_retired(2));
        assert!(!registry.contains(2));
    }

    #[test]
    fn test_retired_version_cannot_be_registered() {
        let result = MigrationRegistry::builder()
            .register_boxed(noop(1, "a"))
            .register_boxed(noop(2, "b"))
            .retire(2)
            .build();
        assert!(matches!(result, Err(MigrationError::DuplicateVersion { version: 2 })));
    }

    #[test]
    fn test_non_positive_version_rejected() {
        let result = MigrationRegistry::new(vec![noop(0, "zero"), noop(1, "one")]);
        assert!(matches!(
            result,
            Err(MigrationError::NonSequentialVersion { version: 0, expected: 1 })
        ));

        let result = MigrationRegistry::new(vec![noop(-4, "negative")]);
        assert!(matches!(
            result,
            Err(MigrationError::NonSequentialVersion { version: -4, .. })
        ));
    }

    #[test]
    fn test_first_version_must_be_one() {
        let result = MigrationRegistry::new(vec![noop(2, "b"), noop(3, "c")]);
        assert!(matches!(
            result,
            Err(MigrationError::NonSequentialVersion { version: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_empty_description_rejected() {
        let result = MigrationRegistry::new(vec![noop(1, "   ")]);
        assert!(matches!(result, Err(MigrationError::EmptyDescription { version: 1 })));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_since_and_up_to() {
        let registry = MigrationRegistry::new(vec![
            noop(1, "a"),
            noop(2, "b"),
            noop(3, "c"),
            noop(4, "d"),
        ])
        .expect("registry should build");

        let since: Vec<i64> = registry.since(2).map(|m| m.version()).collect();
        assert_eq!(since, vec![3, 4]);
        assert_eq!(registry.since(0).count(), 4);
        assert_eq!(registry.since(4).count(), 0);
        assert_eq!(registry.since(99).count(), 0);

        let up_to: Vec<i64> = registry.up_to(2).map(|m| m.version()).collect();
        assert_eq!(up_to, vec![1, 2]);
        assert_eq!(registry.up_to(0).count(), 0);

        // Restartable
        assert_eq!(registry.all().count(), registry.all().count());
        assert_eq!(registry.get(3).map(|m| m.description()), Some("c"));
        assert!(registry.get(5).is_none());
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_empty_registry() {
        let registry = MigrationRegistry::new(Vec::new()).expect("empty registry is valid");
        assert!(registry.is_empty());
        assert_eq!(registry.latest_version(), 0);
        assert_eq!(registry.since(0).count(), 0);
    }
}
