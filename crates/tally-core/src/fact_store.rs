//! Working memory: the identity-tracked set of facts a session reasons over
//!
//! The store is the source of truth for fact contents. The matching network keeps
//! only handles and reads field values back from here, so a fact must stay in the
//! store until the network has finished retracting it.
//!
//! # Identity modes
//! - **Identity**: every insert yields a fresh handle, even for equal values
//! - **Equality**: an insert equal to a live fact returns that fact's handle; when
//!   updates make two facts equal, the lowest live handle answers for the value

use crate::config::IdentityMode;
use crate::error::{TallyError, TallyResult};
use crate::types::{Fact, FactHandle};
use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// A stored fact with its temporal and revision metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FactEntry {
    pub fact: Fact,
    /// Event time in epoch millis
    pub timestamp: i64,
    /// Incremented on every update
    pub generation: u64,
}

#[derive(Debug)]
pub struct WorkingMemory {
    mode: IdentityMode,
    facts: BTreeMap<FactHandle, FactEntry>,
    by_value: AHashMap<Fact, BTreeSet<FactHandle>>,
    by_type: AHashMap<String, BTreeSet<FactHandle>>,
    next_handle: u64,
}

impl WorkingMemory {
    pub fn new(mode: IdentityMode) -> Self {
        Self {
            mode,
            facts: BTreeMap::new(),
            by_value: AHashMap::new(),
            by_type: AHashMap::new(),
            next_handle: 1,
        }
    }

    pub fn mode(&self) -> IdentityMode {
        self.mode
    }

    /// Handle of a live fact equal to `fact`, in equality mode
    pub fn find_equal(&self, fact: &Fact) -> Option<FactHandle> {
        match self.mode {
            IdentityMode::Identity => None,
            IdentityMode::Equality => self.by_value.get(fact).and_then(|handles| handles.first().copied()),
        }
    }

    /// Store a new fact under a fresh handle
    pub fn insert(&mut self, fact: Fact, timestamp: i64) -> FactHandle {
        let handle = FactHandle(self.next_handle);
        self.next_handle += 1;
        if self.mode == IdentityMode::Equality {
            self.by_value.entry(fact.clone()).or_default().insert(handle);
        }
        self.by_type.entry(fact.fact_type.clone()).or_default().insert(handle);
        self.facts.insert(handle, FactEntry { fact, timestamp, generation: 0 });
        handle
    }

    /// Replace a fact's value in place, returning the previous entry
    pub fn replace(&mut self, handle: FactHandle, fact: Fact, timestamp: i64) -> TallyResult<FactEntry> {
        let entry = self.facts.get_mut(&handle).ok_or(TallyError::UnknownHandle { handle })?;
        if entry.fact.fact_type != fact.fact_type {
            return Err(TallyError::schema(
                &entry.fact.fact_type,
                format!("update of {handle} cannot change its type to '{}'", fact.fact_type),
            ));
        }
        let previous = FactEntry {
            fact: std::mem::replace(&mut entry.fact, fact),
            timestamp: entry.timestamp,
            generation: entry.generation,
        };
        entry.timestamp = timestamp;
        entry.generation += 1;

        if self.mode == IdentityMode::Equality {
            let fact = entry.fact.clone();
            self.unindex_value(&previous.fact, handle);
            self.by_value.entry(fact).or_default().insert(handle);
        }
        Ok(previous)
    }

    /// Remove a fact; fails for handles that were never issued or already removed
    pub fn remove(&mut self, handle: FactHandle) -> TallyResult<FactEntry> {
        let entry = self.facts.remove(&handle).ok_or(TallyError::UnknownHandle { handle })?;
        if self.mode == IdentityMode::Equality {
            self.unindex_value(&entry.fact, handle);
        }
        if let Some(handles) = self.by_type.get_mut(&entry.fact.fact_type) {
            handles.remove(&handle);
        }
        Ok(entry)
    }

    fn unindex_value(&mut self, fact: &Fact, handle: FactHandle) {
        if let Some(handles) = self.by_value.get_mut(fact) {
            handles.remove(&handle);
            if handles.is_empty() {
                self.by_value.remove(fact);
            }
        }
    }

    pub fn contains(&self, handle: FactHandle) -> bool {
        self.facts.contains_key(&handle)
    }

    pub fn get(&self, handle: FactHandle) -> Option<&Fact> {
        self.facts.get(&handle).map(|entry| &entry.fact)
    }

    pub fn entry(&self, handle: FactHandle) -> Option<&FactEntry> {
        self.facts.get(&handle)
    }

    pub fn timestamp(&self, handle: FactHandle) -> Option<i64> {
        self.facts.get(&handle).map(|entry| entry.timestamp)
    }

    /// All live facts in handle order
    pub fn iter(&self) -> impl Iterator<Item = (FactHandle, &Fact)> + '_ {
        self.facts.iter().map(|(handle, entry)| (*handle, &entry.fact))
    }

    /// Live facts of one type in handle order
    pub fn iter_type<'a>(&'a self, fact_type: &str) -> impl Iterator<Item = (FactHandle, &'a Fact)> + 'a {
        self.by_type
            .get(fact_type)
            .into_iter()
            .flat_map(|handles| handles.iter())
            .filter_map(|handle| self.get(*handle).map(|fact| (*handle, fact)))
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}
