//! Interface state tracked by the dispatcher.
//!
//! The tracker only knows which interface names exist and which of them were
//! created during this session and have not been seen up yet. It exists so
//! that the not-up report an interface emits while it is still initializing
//! is not logged as the interface going down.
//!
//! # State Invariant
//!
//! ```text
//! name ∈ newly_created  ⟹  name ∈ interfaces
//! ```

use std::collections::HashSet;

use crate::iface::types::LinkChange;

#[derive(Debug, Default)]
pub struct InterfaceTracker {
    /// Interfaces currently known to exist.
    interfaces: HashSet<String>,
    /// Interfaces added during the session and not yet observed up.
    newly_created: HashSet<String>,
}

impl InterfaceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interfaces that already exist when the session starts.
    /// Seeded interfaces are never treated as newly created.
    pub fn seed<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.interfaces.extend(names);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.interfaces.contains(name)
    }

    pub fn is_newly_created(&self, name: &str) -> bool {
        self.newly_created.contains(name)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn newly_created_len(&self) -> usize {
        self.newly_created.len()
    }

    /// Forget an interface. Deleting an unknown name is a no-op.
    pub fn on_link_deleted(&mut self, name: &str) -> LinkChange {
        self.newly_created.remove(name);
        self.interfaces.remove(name);
        self.check_invariant();
        LinkChange::Removed
    }

    /// Apply an RTM_NEWLINK/RTM_SETLINK observation and classify it.
    pub fn on_link_observed(&mut self, name: &str, is_new: bool, is_up: bool) -> LinkChange {
        let change = if is_new && !self.interfaces.contains(name) {
            self.interfaces.insert(name.to_string());
            self.newly_created.insert(name.to_string());
            LinkChange::Added
        } else if is_up {
            self.newly_created.remove(name);
            LinkChange::Up
        } else if self.newly_created.contains(name) {
            LinkChange::SuppressedDown
        } else {
            LinkChange::Down
        };

        self.check_invariant();
        change
    }

    fn check_invariant(&self) {
        debug_assert!(
            self.newly_created.is_subset(&self.interfaces),
            "newly created interfaces must be a subset of known interfaces"
        );
    }
}
