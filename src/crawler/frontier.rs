//! Frontier for choosing the next listing to fetch
//!
//! This module handles:
//! - Cycling through priority targets, then derived targets
//! - Substituting the firehose listing on every Nth fetch
//! - Remembering pagination cursors per listing
//! - Rebuilding derived targets from known communities

use crate::config::FrontierConfig;
use crate::identity::normalize_identity;
use crate::store::SeenSet;
use std::collections::{HashMap, HashSet};

/// Where a frontier target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Configured, always visited first in a cycle
    Priority,
    /// Rebuilt from communities already discovered
    Derived,
    /// Global listing substituted periodically
    Firehose,
}

/// A listing to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierTarget {
    /// Normalized listing name
    pub name: String,
    /// Page to continue from, if cursors are followed
    pub cursor: Option<String>,
    pub kind: TargetKind,
}

/// Cyclic target scheduler
///
/// A cycle visits every priority target in configured order, then every
/// derived target in sorted order. Firehose substitutions do not consume a
/// cyclic slot.
#[derive(Debug)]
pub struct Frontier {
    priority: Vec<String>,
    derived: Vec<String>,
    /// Next slot in `priority ++ derived`
    position: usize,
    firehose: String,
    firehose_every: u64,
    self_extend: bool,
    rederive_every: u64,
    follow_cursors: bool,
    cursors: HashMap<String, String>,
    fetches: u64,
    cycles: u64,
    boundary: bool,
}

impl Frontier {
    /// Creates a frontier with only the configured priority targets
    pub fn new(config: &FrontierConfig) -> Self {
        let mut unique = HashSet::new();
        let priority = config
            .priority_targets
            .iter()
            .filter_map(|name| normalize_identity(name))
            .filter(|name| unique.insert(name.clone()))
            .collect();

        Self {
            priority,
            derived: Vec::new(),
            position: 0,
            firehose: config.firehose_target.trim().to_ascii_lowercase(),
            firehose_every: config.firehose_every,
            self_extend: config.self_extend,
            rederive_every: config.rederive_every.max(1),
            follow_cursors: config.follow_cursors,
            cursors: HashMap::new(),
            fetches: 0,
            cycles: 0,
            boundary: false,
        }
    }

    /// Creates a frontier and, when self-extension is on, derives targets
    /// from the already known communities
    pub fn with_seen(config: &FrontierConfig, seen: &SeenSet) -> Self {
        let mut frontier = Self::new(config);
        if frontier.self_extend {
            frontier.rederive(seen);
        }
        frontier
    }

    /// Picks the next target and advances the schedule
    pub fn next_target(&mut self) -> FrontierTarget {
        self.fetches += 1;

        let total = self.priority.len() + self.derived.len();
        let firehose_due = self.firehose_every >= 2 && self.fetches % self.firehose_every == 0;
        if firehose_due || total == 0 {
            return self.target(self.firehose.clone(), TargetKind::Firehose);
        }
        if self.position >= total {
            self.position = 0;
        }

        let (name, kind) = match self.priority.get(self.position) {
            Some(name) => (name.clone(), TargetKind::Priority),
            None => (
                self.derived[self.position - self.priority.len()].clone(),
                TargetKind::Derived,
            ),
        };

        self.position += 1;
        if self.position >= total {
            self.position = 0;
            self.cycles += 1;
            self.boundary = true;
        }

        self.target(name, kind)
    }

    fn target(&self, name: String, kind: TargetKind) -> FrontierTarget {
        let cursor = if self.follow_cursors {
            self.cursors.get(&name).cloned()
        } else {
            None
        };
        FrontierTarget { name, cursor, kind }
    }

    /// Remembers where a listing should continue on its next visit
    ///
    /// A listing that returned no cursor starts over from its first page.
    pub fn record_cursor(&mut self, name: &str, next: Option<String>) {
        if !self.follow_cursors {
            return;
        }
        match next {
            Some(cursor) => {
                self.cursors.insert(name.to_string(), cursor);
            }
            None => {
                self.cursors.remove(name);
            }
        }
    }

    /// Returns true once after each completed cycle
    pub fn take_cycle_boundary(&mut self) -> bool {
        std::mem::take(&mut self.boundary)
    }

    /// Whether derived targets are due for a rebuild
    pub fn should_rederive(&self) -> bool {
        self.self_extend && self.cycles > 0 && self.cycles % self.rederive_every == 0
    }

    /// Replaces derived targets with known communities not already prioritized
    pub fn rederive(&mut self, seen: &SeenSet) {
        let priority: HashSet<&String> = self.priority.iter().collect();
        self.derived = seen
            .sorted()
            .into_iter()
            .filter(|name| !priority.contains(name))
            .collect();
        if self.position >= self.len() {
            self.position = 0;
        }
        tracing::debug!("Frontier now has {} derived targets", self.derived.len());
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Targets handed out, including firehose substitutions
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    /// Cyclic targets (priority plus derived)
    pub fn len(&self) -> usize {
        self.priority.len() + self.derived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
