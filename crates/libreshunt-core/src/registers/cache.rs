//! Register cache
//!
//! Owns every descriptor in one slot store and resolves three indexes
//! (address, telemetry key, display name) to the same slot, so a mutation
//! through any index is visible through the others. Staged values arrive
//! from the parser, get committed when a frame validates, and committed
//! changes fan out to per-register listeners plus the aggregated
//! change-list listeners.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};

use super::{Descriptor, Value, ValueListener};
use crate::protocol::ProtocolError;

/// Token returned by listener registration, used to deregister.
pub type ListenerId = usize;

/// One committed change, in display form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub old: Option<String>,
    pub new: String,
}

/// Listener over the aggregated per-frame change map.
pub type ChangeListListener = Box<dyn Fn(&BTreeMap<String, Change>, DateTime<Utc>) + Send>;

struct Slot {
    desc: Descriptor,
    value: Option<Value>,
    staged: Option<Value>,
    listeners: Vec<(ListenerId, ValueListener)>,
}

/// Three-index mirror of the device registers.
pub struct RegisterCache {
    slots: Vec<Slot>,
    by_address: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    change_listeners: Vec<(ListenerId, ChangeListListener)>,
    next_listener: ListenerId,
}

fn address_key(address: u16) -> String {
    format!("0x{:04X}", address)
}

impl RegisterCache {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            by_address: HashMap::new(),
            by_key: HashMap::new(),
            by_name: HashMap::new(),
            change_listeners: Vec::new(),
            next_listener: 1,
        }
    }

    /// Add a descriptor and wire up all applicable indexes.
    pub fn insert(&mut self, desc: Descriptor) -> usize {
        let id = self.slots.len();
        if let Some(addr) = desc.address {
            self.by_address.insert(address_key(addr), id);
        }
        if let Some(key) = &desc.telemetry_key {
            self.by_key.insert(key.clone(), id);
        }
        self.by_name.insert(desc.name.clone(), id);
        self.slots.push(Slot {
            desc,
            value: None,
            staged: None,
            listeners: Vec::new(),
        });
        id
    }

    /// Register a generic descriptor for an unknown telemetry key so the
    /// field is retained rather than dropped.
    pub fn register_dynamic(&mut self, key: &str) -> usize {
        eprintln!("[INFO] cache: registering unknown telemetry key {:?}", key);
        self.insert(Descriptor::dynamic(key))
    }

    pub fn descriptor_by_name(&self, name: &str) -> Option<&Descriptor> {
        self.by_name.get(name).map(|id| &self.slots[*id].desc)
    }

    pub fn descriptor_by_address(&self, address: u16) -> Option<&Descriptor> {
        self.by_address
            .get(&address_key(address))
            .map(|id| &self.slots[*id].desc)
    }

    pub fn descriptor_by_key(&self, key: &str) -> Option<&Descriptor> {
        self.by_key.get(key).map(|id| &self.slots[*id].desc)
    }

    /// Committed value, looked up by display name.
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.by_name
            .get(name)
            .and_then(|id| self.slots[*id].value.as_ref())
    }

    /// Committed value, looked up by telemetry key.
    pub fn value_by_key(&self, key: &str) -> Option<&Value> {
        self.by_key
            .get(key)
            .and_then(|id| self.slots[*id].value.as_ref())
    }

    /// Stage a raw telemetry token against its key, registering a dynamic
    /// descriptor when the key is unknown.
    pub fn stage_by_key(&mut self, key: &str, raw: &str) {
        let id = match self.by_key.get(key) {
            Some(id) => *id,
            None => self.register_dynamic(key),
        };
        self.slots[id].staged = Some(Value::from_raw(raw));
    }

    /// Stage a value against a register address. Returns false on an
    /// unknown address.
    pub fn stage_by_address(&mut self, address: u16, value: Value) -> bool {
        match self.by_address.get(&address_key(address)) {
            Some(id) => {
                self.slots[*id].staged = Some(value);
                true
            }
            None => false,
        }
    }

    /// Stage a value against a display name. Returns false on an unknown
    /// name.
    pub fn stage_by_name(&mut self, name: &str, value: Value) -> bool {
        match self.by_name.get(name) {
            Some(id) => {
                self.slots[*id].staged = Some(value);
                true
            }
            None => false,
        }
    }

    /// Commit staged values and dispatch listeners.
    ///
    /// Loops until a full pass commits nothing, since listeners may stage
    /// further changes while running. Staged values that do not clear the
    /// descriptor's delta threshold are discarded without touching the
    /// committed value, so small drifts accumulate against the last
    /// notified reading.
    pub fn commit_and_dispatch(&mut self, timestamp: DateTime<Utc>) -> BTreeMap<String, Change> {
        let mut changes: BTreeMap<String, Change> = BTreeMap::new();
        let mut dirty = true;
        while dirty {
            dirty = false;
            for i in 0..self.slots.len() {
                let staged = match self.slots[i].staged.take() {
                    Some(v) => v,
                    None => continue,
                };
                let slot = &self.slots[i];
                if slot.value.as_ref() == Some(&staged) {
                    continue;
                }
                if !slot.desc.should_notify(slot.value.as_ref(), &staged) {
                    continue;
                }
                let old = slot.value.as_ref().map(|v| slot.desc.format(v));
                let new = slot.desc.format(&staged);
                let name = slot.desc.name.clone();
                for (id, listener) in &self.slots[i].listeners {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        listener(&new, old.as_deref(), timestamp, &name)
                    }));
                    if outcome.is_err() {
                        eprintln!("[WARN] cache: listener {} for {:?} panicked", id, name);
                    }
                }
                self.slots[i].value = Some(staged);
                changes.insert(name, Change { old, new });
                dirty = true;
            }
        }

        if !changes.is_empty() {
            for (id, listener) in &self.change_listeners {
                let outcome = catch_unwind(AssertUnwindSafe(|| listener(&changes, timestamp)));
                if outcome.is_err() {
                    eprintln!("[WARN] cache: change-list listener {} panicked", id);
                }
            }
        }
        changes
    }

    /// Drop staged values on telemetry-associated descriptors; command-only
    /// registers keep whatever a response staged.
    pub fn discard_staged(&mut self) {
        for slot in &mut self.slots {
            if slot.desc.telemetry_key.is_some() {
                slot.staged = None;
            }
        }
    }

    pub fn add_listener(
        &mut self,
        name: &str,
        listener: ValueListener,
    ) -> Result<ListenerId, ProtocolError> {
        let id = *self
            .by_name
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownRegister(name.to_string()))?;
        let token = self.next_listener;
        self.next_listener += 1;
        self.slots[id].listeners.push((token, listener));
        Ok(token)
    }

    pub fn remove_listener(&mut self, name: &str, token: ListenerId) -> bool {
        let Some(id) = self.by_name.get(name) else {
            return false;
        };
        let listeners = &mut self.slots[*id].listeners;
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    pub fn add_change_listener(&mut self, listener: ChangeListListener) -> ListenerId {
        let token = self.next_listener;
        self.next_listener += 1;
        self.change_listeners.push((token, listener));
        token
    }

    pub fn remove_change_listener(&mut self, token: ListenerId) -> bool {
        let before = self.change_listeners.len();
        self.change_listeners.retain(|(t, _)| *t != token);
        self.change_listeners.len() != before
    }

    /// True when the named register (or the `ChangeList` pseudo-property)
    /// has at least one listener.
    pub fn has_listeners(&self, name: &str) -> bool {
        if name == "ChangeList" {
            return !self.change_listeners.is_empty();
        }
        self.by_name
            .get(name)
            .map(|id| !self.slots[*id].listeners.is_empty())
            .unwrap_or(false)
    }
}

impl Default for RegisterCache {
    fn default() -> Self {
        Self::new()
    }
}
