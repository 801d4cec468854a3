//! Units: one loadable piece of code and its loading state

use crate::context::ContextId;
use crate::executor::{UnitBody, VehicleHandle};
use crate::resolver::PathResolver;
use crate::value::Module;
use crate::LoadError;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Arena index of a unit within its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId(pub(crate) usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Loading state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Waiting to be run
    Pending,
    /// Currently executing; at most one unit at a time
    Running,
    /// Executed successfully
    Loaded,
    /// Failed with no fallback locations left
    Failed,
}

impl UnitStatus {
    /// Whether the unit will never run again
    pub fn is_settled(self) -> bool {
        matches!(self, UnitStatus::Loaded | UnitStatus::Failed)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Loaded => "loaded",
            UnitStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a unit's code comes from
#[derive(Clone)]
pub(crate) enum UnitSource {
    /// Fetched by the executor from `location`. `request` is the id as
    /// written, re-resolved against each fallback base.
    Location { request: String },
    /// Inline code run without the executor
    Callback(UnitBody),
    /// Seeded as loaded; never runs
    Preloaded,
}

/// One loadable unit
pub(crate) struct Unit {
    pub id: UnitId,
    pub key: String,
    pub context: ContextId,
    pub source: UnitSource,
    pub location: Option<String>,
    pub remaining: VecDeque<String>,
    pub tried: Vec<String>,
    pub dependencies: Vec<UnitId>,
    pub allowed: FxHashSet<UnitId>,
    pub module: Module,
    pub status: UnitStatus,
    pub requester: Option<UnitId>,
    pub vehicle: Option<VehicleHandle>,
    /// Bumped on every run and abort; completions carry the value they were
    /// issued with so stale ones can be ignored
    pub attempt: u32,
    pub replays: u32,
    /// Anonymous defines issued during the current run
    pub defines: u32,
    pub failure: Option<LoadError>,
    /// Execution failure at an earlier fallback location
    pub first_error: Option<LoadError>,
}

impl Unit {
    pub fn new(
        id: UnitId,
        key: String,
        context: ContextId,
        source: UnitSource,
        location: Option<String>,
        remaining: VecDeque<String>,
        requester: Option<UnitId>,
    ) -> Self {
        let module = Module::new(key.clone());
        Self {
            id,
            key,
            context,
            source,
            location,
            remaining,
            tried: Vec::new(),
            dependencies: Vec::new(),
            allowed: FxHashSet::default(),
            module,
            status: UnitStatus::Pending,
            requester,
            vehicle: None,
            attempt: 0,
            replays: 0,
            defines: 0,
            failure: None,
            first_error: None,
        }
    }

    /// Declare a need for `dependency`
    pub fn depend(&mut self, dependency: UnitId) -> bool {
        if dependency == self.id || self.dependencies.contains(&dependency) {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    /// Treat `dependency` as resolved enough to break a cycle
    pub fn allow(&mut self, dependency: UnitId) {
        self.allowed.insert(dependency);
    }

    /// Move on to the next fallback base. Returns false when none remain.
    pub fn next_location(&mut self, resolver: &dyn PathResolver) -> bool {
        let UnitSource::Location { request } = &self.source else {
            return false;
        };
        match self.remaining.pop_front() {
            Some(base) => {
                self.location = Some(resolver.absolute(request, &base));
                true
            }
            None => false,
        }
    }

    /// Whether the unit is the one a completion was issued for
    pub fn is_current(&self, attempt: u32) -> bool {
        self.status == UnitStatus::Running && self.attempt == attempt
    }
}

/// Whether every dependency of `id` is loaded, failed or cycle-allowed.
/// A failed dependency does not block: the dependent fails when it touches
/// the missing exports.
pub(crate) fn satisfied(units: &[Unit], id: UnitId) -> bool {
    let unit = &units[id.0];
    unit.dependencies
        .iter()
        .all(|dep| units[dep.0].status.is_settled() || unit.allowed.contains(dep))
}

/// Depth-first search for a circular wait starting at `start`.
///
/// Only unsettled, not yet allowed edges are followed. Returns the
/// `(parent, target)` edge that closes the first cycle found.
pub(crate) fn find_cycle(units: &[Unit], start: UnitId) -> Option<(UnitId, UnitId)> {
    let mut visited = FxHashSet::default();
    let mut path = FxHashSet::default();
    visit(units, start, &mut visited, &mut path)
}

fn visit(
    units: &[Unit],
    id: UnitId,
    visited: &mut FxHashSet<UnitId>,
    path: &mut FxHashSet<UnitId>,
) -> Option<(UnitId, UnitId)> {
    visited.insert(id);
    path.insert(id);

    let unit = &units[id.0];
    for &dep in &unit.dependencies {
        if unit.allowed.contains(&dep) || units[dep.0].status.is_settled() {
            continue;
        }
        if path.contains(&dep) {
            return Some((id, dep));
        }
        if !visited.contains(&dep) {
            if let Some(edge) = visit(units, dep, visited, path) {
                return Some(edge);
            }
        }
    }

    path.remove(&id);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::UrlResolver;

    fn arena(edges: &[(usize, usize)], count: usize) -> Vec<Unit> {
        let mut units: Vec<Unit> = (0..count)
            .map(|index| {
                Unit::new(
                    UnitId(index),
                    format!("u{}", index),
                    ContextId(0),
                    UnitSource::Location { request: format!("u{}", index) },
                    None,
                    VecDeque::new(),
                    None,
                )
            })
            .collect();
        for &(from, to) in edges {
            units[from].depend(UnitId(to));
        }
        units
    }

    #[test]
    fn test_satisfied_counts_settled_and_allowed() {
        let mut units = arena(&[(0, 1), (0, 2)], 3);
        assert!(!satisfied(&units, UnitId(0)));

        units[1].status = UnitStatus::Loaded;
        units[2].status = UnitStatus::Failed;
        assert!(satisfied(&units, UnitId(0)));

        units[2].status = UnitStatus::Pending;
        units[0].allow(UnitId(2));
        assert!(satisfied(&units, UnitId(0)));
    }

    #[test]
    fn test_find_simple_cycle() {
        let units = arena(&[(0, 1), (1, 0)], 2);
        assert_eq!(find_cycle(&units, UnitId(0)), Some((UnitId(1), UnitId(0))));
    }

    #[test]
    fn test_find_cycle_past_acyclic_branch() {
        // 0 -> 1 -> 2 (dead end), 0 -> 3 -> 4 -> 3
        let units = arena(&[(0, 1), (1, 2), (0, 3), (3, 4), (4, 3)], 5);
        assert_eq!(find_cycle(&units, UnitId(0)), Some((UnitId(4), UnitId(3))));
    }

    #[test]
    fn test_allowed_and_settled_edges_are_ignored() {
        let mut units = arena(&[(0, 1), (1, 0)], 2);
        units[1].allow(UnitId(0));
        assert_eq!(find_cycle(&units, UnitId(0)), None);

        let mut units = arena(&[(0, 1), (1, 2), (2, 1)], 3);
        units[1].status = UnitStatus::Loaded;
        assert_eq!(find_cycle(&units, UnitId(0)), None);
    }

    #[test]
    fn test_depend_is_deduplicated() {
        let mut units = arena(&[], 2);
        assert!(units[0].depend(UnitId(1)));
        assert!(!units[0].depend(UnitId(1)));
        assert!(!units[0].depend(UnitId(0)));
        assert_eq!(units[0].dependencies, vec![UnitId(1)]);
    }

    #[test]
    fn test_next_location_walks_fallbacks() {
        let mut unit = Unit::new(
            UnitId(0),
            "x".to_string(),
            ContextId(0),
            UnitSource::Location { request: "x".to_string() },
            Some("/a/x".to_string()),
            VecDeque::from(vec!["/b/".to_string()]),
            None,
        );

        assert!(unit.next_location(&UrlResolver));
        assert_eq!(unit.location.as_deref(), Some("/b/x"));
        assert!(!unit.next_location(&UrlResolver));
    }
}
