//! Known-target bookkeeping for long-lived observers.

use std::collections::HashMap;

use crate::target::Target;

/// Result of reconciling a new discovery snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub appeared: Vec<Target>,
    /// Targets no longer listed; returned once with `live = false`.
    pub disappeared: Vec<Target>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }
}

/// Map of currently listed targets keyed by id. Only the owner mutates it, through
/// [`TargetRegistry::apply`].
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, snapshot: Vec<Target>) -> RegistryDiff {
        let mut diff = RegistryDiff::default();
        let mut next = HashMap::with_capacity(snapshot.len());

        for target in snapshot {
            match self.targets.remove(&target.id) {
                Some(_) => {}
                None => diff.appeared.push(target.clone()),
            }
            next.insert(target.id.clone(), target);
        }

        diff.disappeared = self
            .targets
            .drain()
            .map(|(_, mut gone)| {
                gone.live = false;
                gone
            })
            .collect();
        diff.disappeared.sort_by(|a, b| a.id.cmp(&b.id));
        self.targets = next;
        diff
    }

    pub fn get(&self, id: &str) -> Option<&Target> {
        self.targets.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.targets.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.targets.values().cloned().collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        targets
    }
}
