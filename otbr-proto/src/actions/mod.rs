//! Long-running tasks created from JSON:API action documents.
//!
//! Each action kind registers a [`Handler`]: a validator for its attributes
//! and a constructor. The [`ActionsList`] owns created actions, drives them
//! through their lifecycle on every tick, and stops whatever is still
//! pending or active once its timeout passes.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::ot::ThreadApi;
use crate::services::Services;
use crate::{Error, Result};

mod add_thread_device;
mod discover_network;
mod energy_scan;
mod network_diagnostic;
mod reset_diagnostic_counters;

pub use add_thread_device::AddThreadDevice;
pub use discover_network::DiscoverNetwork;
pub use energy_scan::EnergyScan;
pub use network_diagnostic::NetworkDiagnostic;
pub use reset_diagnostic_counters::ResetDiagnosticCounters;

pub const MAX_ACTIONS_COLLECTION_ITEMS: usize = 200;

/// Actions without a `timeout` attribute turn inactive after this long.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Active,
    Completed,
    Stopped,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Active => "active",
            ActionStatus::Completed => "completed",
            ActionStatus::Stopped => "stopped",
            ActionStatus::Failed => "failed",
        }
    }
}

/// Reference from an action to the result entry it produced.
#[derive(Debug, Clone)]
pub struct ResultRelationship {
    pub collection: &'static str,
    pub uuid: String,
}

/// State every action carries.
#[derive(Debug, Clone)]
pub struct ActionCore {
    pub status: ActionStatus,
    pub created: Instant,
    pub timeout: Duration,
    pub result: Option<ResultRelationship>,
}

impl ActionCore {
    fn new(json: &Value, now: Instant) -> Self {
        Self {
            status: ActionStatus::Pending,
            created: now,
            timeout: read_timeout_or_default(json, DEFAULT_TIMEOUT),
            result: None,
        }
    }
}

/// One long-running task.
///
/// `update` is called while the action is pending or active; `stop` only
/// after a final `update`, so finished work is never cut short.
pub trait Action {
    fn type_name(&self) -> &'static str;
    fn core(&self) -> &ActionCore;
    fn core_mut(&mut self) -> &mut ActionCore;

    fn update(&mut self, ot: &mut dyn ThreadApi, services: &mut Services, now: Instant);
    fn stop(&mut self, ot: &mut dyn ThreadApi, services: &mut Services);

    /// Class specific attributes for the JSON:API item.
    fn jsonify(&self) -> Value;

    fn status(&self) -> ActionStatus {
        self.core().status
    }

    fn is_pending_or_active(&self) -> bool {
        matches!(self.status(), ActionStatus::Pending | ActionStatus::Active)
    }

    /// Purely compares timepoints, the status is not considered.
    fn is_beyond_timeout(&self, now: Instant) -> bool {
        self.core().created + self.core().timeout < now
    }
}

type ValidateFn = fn(&Value) -> bool;
type CreateFn =
    fn(&Value, &mut dyn ThreadApi, &mut Services, Instant) -> Box<dyn Action + Send>;

/// Validator and constructor for one action type.
pub struct Handler {
    pub type_name: &'static str,
    pub validate: ValidateFn,
    pub create: CreateFn,
}

const HANDLERS: &[Handler] = &[
    Handler {
        type_name: AddThreadDevice::TYPE_NAME,
        validate: AddThreadDevice::validate,
        create: AddThreadDevice::create,
    },
    Handler {
        type_name: EnergyScan::TYPE_NAME,
        validate: EnergyScan::validate,
        create: EnergyScan::create,
    },
    Handler {
        type_name: NetworkDiagnostic::TYPE_NAME,
        validate: NetworkDiagnostic::validate,
        create: NetworkDiagnostic::create,
    },
    Handler {
        type_name: DiscoverNetwork::TYPE_NAME,
        validate: DiscoverNetwork::validate,
        create: DiscoverNetwork::create,
    },
    Handler {
        type_name: ResetDiagnosticCounters::TYPE_NAME,
        validate: ResetDiagnosticCounters::validate,
        create: ResetDiagnosticCounters::create,
    },
];

fn find_handler(type_name: &str) -> Option<&'static Handler> {
    HANDLERS.iter().find(|handler| handler.type_name == type_name)
}

/// Reads the `timeout` attribute in seconds; missing or malformed values
/// fall back to `default`.
fn read_timeout_or_default(json: &Value, default: Duration) -> Duration {
    match json.get("timeout") {
        None => default,
        Some(value) => value
            .as_f64()
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(default),
    }
}

struct Entry {
    uuid: String,
    action: Box<dyn Action + Send>,
}

/// Ordered, bounded registry of created actions.
pub struct ActionsList {
    entries: Vec<Entry>,
    max_actions: usize,
}

impl Default for ActionsList {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionsList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_actions: MAX_ACTIONS_COLLECTION_ITEMS,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_or_active(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.action.is_pending_or_active())
            .count()
    }

    /// Validates a JSON:API request document: `data` must be an array of
    /// items whose `type` names a known action and whose `attributes` pass
    /// that action's validator.
    pub fn validate_request(&self, request: &Value) -> Result<()> {
        let items = request
            .get("data")
            .and_then(Value::as_array)
            .ok_or(Error::InvalidArgs)?;

        for item in items {
            let type_name = item
                .get("type")
                .and_then(Value::as_str)
                .ok_or(Error::InvalidArgs)?;
            let handler = find_handler(type_name).ok_or_else(|| {
                warn!(action = type_name, "unknown action type");
                Error::InvalidArgs
            })?;
            let attributes = item.get("attributes").ok_or(Error::InvalidArgs)?;
            if !(handler.validate)(attributes) {
                warn!(action = type_name, "action attributes failed validation");
                return Err(Error::InvalidArgs);
            }
        }
        Ok(())
    }

    /// Creates one action from a validated item and runs its first update.
    pub fn create_action(
        &mut self,
        item: &Value,
        ot: &mut dyn ThreadApi,
        services: &mut Services,
        now: Instant,
    ) -> Result<String> {
        // at capacity the oldest entry makes room, stopped if still running
        while self.entries.len() >= self.max_actions {
            let mut evicted = self.entries.remove(0);
            evicted.action.update(ot, services, now);
            if evicted.action.is_pending_or_active() {
                evicted.action.stop(ot, services);
            }
            debug!(uuid = %evicted.uuid, "evicted oldest action");
        }
        let type_name = item
            .get("type")
            .and_then(Value::as_str)
            .ok_or(Error::InvalidArgs)?;
        let handler = find_handler(type_name).ok_or(Error::InvalidArgs)?;
        let attributes = item.get("attributes").ok_or(Error::InvalidArgs)?;

        let mut action = (handler.create)(attributes, ot, services, now);
        action.update(ot, services, now);

        let uuid = uuid::Uuid::new_v4().to_string();
        self.entries.push(Entry {
            uuid: uuid.clone(),
            action,
        });
        Ok(uuid)
    }

    /// Updates one action, stopping it if its timeout has passed.
    pub fn update_action(
        &mut self,
        uuid: &str,
        ot: &mut dyn ThreadApi,
        services: &mut Services,
        now: Instant,
    ) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.uuid == uuid)
            .ok_or(Error::NotFound)?;
        Self::drive(entry.action.as_mut(), ot, services, now);
        Ok(())
    }

    /// Updates every pending or active action.
    pub fn update_all(&mut self, ot: &mut dyn ThreadApi, services: &mut Services, now: Instant) {
        for entry in &mut self.entries {
            if entry.action.is_pending_or_active() {
                Self::drive(entry.action.as_mut(), ot, services, now);
            }
        }
    }

    fn drive(
        action: &mut (dyn Action + Send),
        ot: &mut dyn ThreadApi,
        services: &mut Services,
        now: Instant,
    ) {
        action.update(ot, services, now);
        if action.is_pending_or_active() && action.is_beyond_timeout(now) {
            action.stop(ot, services);
        }
    }

    pub fn stop_action(
        &mut self,
        uuid: &str,
        ot: &mut dyn ThreadApi,
        services: &mut Services,
        now: Instant,
    ) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.uuid == uuid)
            .ok_or(Error::NotFound)?;
        // a final update first so finished work is not reported stopped
        entry.action.update(ot, services, now);
        if entry.action.is_pending_or_active() {
            entry.action.stop(ot, services);
        }
        Ok(())
    }

    pub fn delete_action(
        &mut self,
        uuid: &str,
        ot: &mut dyn ThreadApi,
        services: &mut Services,
        now: Instant,
    ) -> Result<()> {
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.uuid == uuid)
            .ok_or(Error::NotFound)?;
        {
            let entry = &mut self.entries[pos];
            entry.action.update(ot, services, now);
            if entry.action.is_pending_or_active() {
                entry.action.stop(ot, services);
            }
        }
        self.entries.remove(pos);
        Ok(())
    }

    pub fn delete_all(&mut self, ot: &mut dyn ThreadApi, services: &mut Services, now: Instant) {
        for entry in &mut self.entries {
            entry.action.update(ot, services, now);
            if entry.action.is_pending_or_active() {
                entry.action.stop(ot, services);
            }
        }
        self.entries.clear();
    }

    pub fn status(&self, uuid: &str) -> Result<ActionStatus> {
        self.entries
            .iter()
            .find(|entry| entry.uuid == uuid)
            .map(|entry| entry.action.status())
            .ok_or(Error::NotFound)
    }

    /// JSON:API item for one action.
    pub fn jsonify_action(&self, uuid: &str) -> Result<Value> {
        self.entries
            .iter()
            .find(|entry| entry.uuid == uuid)
            .map(Self::to_json_api_item)
            .ok_or(Error::NotFound)
    }

    /// JSON:API items for every action, oldest first.
    pub fn jsonify(&self) -> Value {
        Value::Array(self.entries.iter().map(Self::to_json_api_item).collect())
    }

    fn to_json_api_item(entry: &Entry) -> Value {
        let action = entry.action.as_ref();
        let mut item = json!({
            "id": entry.uuid,
            "type": action.type_name(),
            "attributes": action.jsonify(),
        });
        if let Some(result) = &action.core().result {
            item["relationships"] = json!({
                "result": {
                    "data": { "type": result.collection, "id": result.uuid },
                },
            });
        }
        item
    }
}

/// Timeout attribute for items that are still pending or active.
fn jsonify_timeout(core: &ActionCore, attributes: &mut Value) {
    if matches!(core.status, ActionStatus::Pending | ActionStatus::Active) {
        attributes["timeout"] = json!(core.timeout.as_secs());
    }
}
