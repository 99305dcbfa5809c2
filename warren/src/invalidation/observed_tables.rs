/// Change to the trigger set of one tracked table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerAction {
    Install,
    Remove,
}

/// Observer reference counts per tracked table.
///
/// A table needs its triggers while at least one observer watches it. The
/// tracker remembers which tables currently have triggers installed, so a
/// sync only touches tables whose desired state differs from the installed
/// one. Failed actions are simply not acknowledged and come up again on the
/// next sync.
#[derive(Debug)]
pub(crate) struct ObservedTableTracker {
    observer_counts: Vec<usize>,
    installed: Vec<bool>,
}

impl ObservedTableTracker {
    pub(crate) fn new(table_count: usize) -> Self {
        ObservedTableTracker {
            observer_counts: vec![0; table_count],
            installed: vec![false; table_count],
        }
    }

    pub(crate) fn on_added(&mut self, table_ids: &[usize]) {
        for id in table_ids {
            if let Some(count) = self.observer_counts.get_mut(*id) {
                *count += 1;
            }
        }
    }

    pub(crate) fn on_removed(&mut self, table_ids: &[usize]) {
        for id in table_ids {
            if let Some(count) = self.observer_counts.get_mut(*id) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub(crate) fn observer_count(&self, table_id: usize) -> usize {
        self.observer_counts.get(table_id).copied().unwrap_or(0)
    }

    pub(crate) fn needs_sync(&self) -> bool {
        self.observer_counts
            .iter()
            .zip(&self.installed)
            .any(|(count, installed)| (*count > 0) != *installed)
    }

    /// Actions that bring the installed triggers in line with the counts.
    pub(crate) fn sync_plan(&self) -> Vec<(usize, TriggerAction)> {
        self.observer_counts
            .iter()
            .zip(&self.installed)
            .enumerate()
            .filter_map(|(id, (count, installed))| match (*count > 0, *installed) {
                (true, false) => Some((id, TriggerAction::Install)),
                (false, true) => Some((id, TriggerAction::Remove)),
                _ => None,
            })
            .collect()
    }

    /// Tables whose triggers were last seen installed.
    pub(crate) fn installed_tables(&self) -> Vec<usize> {
        self.installed
            .iter()
            .enumerate()
            .filter_map(|(id, installed)| installed.then_some(id))
            .collect()
    }

    /// Forgets an install the schema no longer has, e.g. after the table
    /// was dropped and recreated.
    pub(crate) fn mark_lost(&mut self, table_id: usize) {
        if let Some(installed) = self.installed.get_mut(table_id) {
            *installed = false;
        }
    }

    /// Records that `action` succeeded for `table_id`.
    pub(crate) fn acknowledge(&mut self, table_id: usize, action: TriggerAction) {
        if let Some(installed) = self.installed.get_mut(table_id) {
            *installed = action == TriggerAction::Install;
        }
    }
}
