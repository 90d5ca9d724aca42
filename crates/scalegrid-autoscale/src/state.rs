//! Per-resource runtime state: the capacity model and the cooldown timer.
//!
//! The control loop owns one [`StateTable`]. Each entry sits behind its own
//! mutex, so passes for different resources never contend while two passes
//! for the same resource cannot overlap.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use scalegrid_core::{Inventory, ResourceConfig, ResourceKind, ScalerConfig, ScalingAction};

/// Everything the loop remembers about a resource between iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState {
    pub inventory: Inventory,
    /// Unix seconds before which no new action may be applied.
    pub cooldown_until: u64,
    pub last_action_at: Option<u64>,
}

impl ResourceState {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory,
            cooldown_until: 0,
            last_action_at: None,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.inventory.capacity()
    }

    pub fn cooling_down(&self, now: u64) -> bool {
        now < self.cooldown_until
    }

    /// Record an action the actuator confirmed: advance the capacity model
    /// and restart the cooldown.
    pub fn apply(&mut self, action: &ScalingAction, now: u64, cooldown_secs: u64) {
        self.inventory.apply(action);
        self.cooldown_until = now.saturating_add(cooldown_secs);
        self.last_action_at = Some(now);
    }
}

/// Shared handle to one resource's state.
pub type StateHandle = Arc<Mutex<ResourceState>>;

/// resource_id → state.
#[derive(Debug, Default)]
pub struct StateTable {
    entries: HashMap<String, StateHandle>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed state for a resource from its declared inventory, unless it
    /// already has some of the same kind.
    pub fn ensure(&mut self, resource: &ResourceConfig) -> StateHandle {
        if let Some(handle) = self.entries.get(&resource.id)
            && handle
                .try_lock()
                .map_or(true, |state| state.inventory.kind() == resource.kind)
        {
            return handle.clone();
        }

        debug!(resource = %resource.id, kind = %resource.kind, "initialising resource state");
        let handle = Arc::new(Mutex::new(ResourceState::new(resource.inventory.clone())));
        self.entries.insert(resource.id.clone(), handle.clone());
        handle
    }

    /// Bring the table in line with `config`: new resources get fresh
    /// state, removed ones are dropped, the rest keep theirs.
    pub fn sync(&mut self, config: &ScalerConfig) -> Vec<(Arc<ResourceConfig>, StateHandle)> {
        let handles: Vec<_> = config
            .resources
            .iter()
            .map(|resource| (resource.clone(), self.ensure(resource)))
            .collect();

        let before = self.entries.len();
        self.entries
            .retain(|id, _| config.resources.iter().any(|r| &r.id == id));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            info!(dropped, "dropped state for resources no longer configured");
        }

        handles
    }

    pub fn get(&self, resource_id: &str) -> Option<StateHandle> {
        self.entries.get(resource_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kind of the state currently held for `resource_id`.
    pub async fn kind_of(&self, resource_id: &str) -> Option<ResourceKind> {
        match self.entries.get(resource_id) {
            Some(handle) => Some(handle.lock().await.inventory.kind()),
            None => None,
        }
    }
}
