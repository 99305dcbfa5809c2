use super::Migration;
use std::collections::BTreeMap;

/// Report produced when a migration replaces an earlier one for the same
/// `(from, to)` pair.
#[derive(Debug, Clone)]
pub struct MigrationOverride {
    pub from_version: u32,
    pub to_version: u32,
    pub replaced: Migration,
    pub replacement: Migration,
}

/// Available migrations, indexed by `from_version -> to_version -> Migration`.
///
/// Both levels are ordered maps, so one-hop targets come out sorted by
/// ascending `to_version`. The registry is filled while the database is being
/// built and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<u32, BTreeMap<u32, Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `migration`, returning the override report when it replaced an
    /// earlier migration with the same versions.
    pub fn add_migration(&mut self, migration: Migration) -> Option<MigrationOverride> {
        let from = migration.from_version();
        let to = migration.to_version();
        self.migrations
            .entry(from)
            .or_default()
            .insert(to, migration.clone())
            .map(|replaced| MigrationOverride {
                from_version: from,
                to_version: to,
                replaced,
                replacement: migration,
            })
    }

    /// Inserts every migration in order; later entries win.
    pub fn add_migrations<I>(&mut self, migrations: I) -> Vec<MigrationOverride>
    where
        I: IntoIterator<Item = Migration>,
    {
        migrations
            .into_iter()
            .filter_map(|migration| self.add_migration(migration))
            .collect()
    }

    /// One-hop targets from `version`, by ascending target version.
    pub fn migrations_from(&self, version: u32) -> Vec<(u32, &Migration)> {
        self.migrations
            .get(&version)
            .map(|targets| targets.iter().map(|(to, m)| (*to, m)).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, from_version: u32, to_version: u32) -> Option<&Migration> {
        self.migrations.get(&from_version)?.get(&to_version)
    }

    pub(crate) fn targets(&self, version: u32) -> Option<&BTreeMap<u32, Migration>> {
        self.migrations.get(&version)
    }

    /// Number of distinct `(from, to)` pairs.
    pub fn len(&self) -> usize {
        self.migrations.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
