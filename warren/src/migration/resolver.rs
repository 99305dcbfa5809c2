use super::{Migration, MigrationRegistry};
use crate::errors::{ErrorKind, WarrenError};
use std::fmt::{Display, Formatter};
use std::ops::Bound::{Excluded, Included};

/// Direction of a migration chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Upgrade,
    Downgrade,
}

/// Ordered chain of migrations leading from `start` to `end`.
///
/// Consecutive steps are contiguous: each step starts where the previous one
/// ended, the first starts at `start` and the last ends at `end`. An empty
/// path means `start == end`.
#[derive(Debug, Clone)]
pub struct MigrationPath {
    start: u32,
    end: u32,
    steps: Vec<Migration>,
}

impl MigrationPath {
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn steps(&self) -> &[Migration] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn direction(&self) -> MigrationDirection {
        if self.end >= self.start {
            MigrationDirection::Upgrade
        } else {
            MigrationDirection::Downgrade
        }
    }

    /// `(from, to)` pairs of every step, in application order.
    pub fn hops(&self) -> Vec<(u32, u32)> {
        self.steps
            .iter()
            .map(|m| (m.from_version(), m.to_version()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.steps.iter()
    }
}

/// The resolver found no candidate step at `stuck_at` before reaching `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unreachable {
    pub from: u32,
    pub to: u32,
    pub stuck_at: u32,
}

impl Display for Unreachable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "A migration from {} to {} is necessary but no migration leads on from version {}",
            self.from, self.to, self.stuck_at
        )
    }
}

impl From<Unreachable> for WarrenError {
    fn from(value: Unreachable) -> Self {
        WarrenError::new(
            &value.to_string(),
            ErrorKind::UnreachableMigration {
                from: value.from,
                to: value.to,
                stuck_at: value.stuck_at,
            },
        )
    }
}

/// Greedy largest-hop path finder.
///
/// From the current version it always takes the single candidate that moves
/// furthest towards the target without passing it: the highest `to_version`
/// when upgrading, the lowest when downgrading. Chosen hops are never
/// revisited, so a longer path that needs a shorter first hop is not found.
/// Each step strictly approaches the target, which bounds the walk by the
/// distance between the two versions.
pub struct MigrationPathResolver;

impl MigrationPathResolver {
    pub fn resolve(
        registry: &MigrationRegistry,
        start: u32,
        end: u32,
    ) -> Result<MigrationPath, Unreachable> {
        let upgrade = end > start;
        let mut steps = Vec::new();
        let mut current = start;

        while current != end {
            let next = registry.targets(current).and_then(|targets| {
                if upgrade {
                    // current < to <= end, largest first
                    targets.range((Excluded(current), Included(end))).next_back()
                } else {
                    // end <= to < current, smallest first
                    targets.range((Included(end), Excluded(current))).next()
                }
            });

            match next {
                Some((to, migration)) => {
                    log::debug!("Migration hop {} -> {} selected", current, to);
                    steps.push(migration.clone());
                    current = *to;
                }
                None => {
                    log::debug!(
                        "No migration leads on from {} towards {} (started at {})",
                        current,
                        end,
                        start
                    );
                    return Err(Unreachable {
                        from: start,
                        to: end,
                        stuck_at: current,
                    });
                }
            }
        }

        Ok(MigrationPath { start, end, steps })
    }
}
