//! One-shot reset of counter TLVs, on one device or the whole mesh.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use super::{jsonify_timeout, Action, ActionCore, ActionStatus};
use crate::diag_types;
use crate::ot::ThreadApi;
use crate::services::{Destination, Services};

pub struct ResetDiagnosticCounters {
    core: ActionCore,
    /// None resets the whole mesh via the realm-local multicast group
    destination: Option<Destination>,
    types: Vec<u8>,
}

impl ResetDiagnosticCounters {
    pub const TYPE_NAME: &'static str = "resetNetworkDiagCounterTask";

    pub fn create(
        json: &Value,
        _ot: &mut dyn ThreadApi,
        _services: &mut Services,
        now: Instant,
    ) -> Box<dyn Action + Send> {
        // validate has run already
        let destination = json
            .get("destination")
            .and_then(Value::as_str)
            .and_then(|s| Destination::parse(s).ok());

        let mut types = Vec::new();
        if let Some(keys) = json.get("types").and_then(Value::as_array) {
            for key in keys.iter().filter_map(Value::as_str) {
                if let Ok(id) = diag_types::find_id(key) {
                    if !types.contains(&id) {
                        types.push(id);
                    }
                }
            }
        }

        Box::new(Self {
            core: ActionCore::new(json, now),
            destination,
            types,
        })
    }

    pub fn validate(json: &Value) -> bool {
        if super::read_timeout_or_default(json, super::DEFAULT_TIMEOUT).is_zero() {
            return false;
        }
        if let Some(destination) = json.get("destination") {
            let ok = destination
                .as_str()
                .is_some_and(|s| Destination::parse(s).is_ok());
            if !ok {
                return false;
            }
        }
        let Some(types) = json.get("types").and_then(Value::as_array) else {
            return false;
        };
        types.iter().all(|t| {
            t.as_str()
                .and_then(|key| diag_types::find_id(key).ok())
                .is_some_and(diag_types::can_reset)
        })
    }
}

impl Action for ResetDiagnosticCounters {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActionCore {
        &mut self.core
    }

    fn update(&mut self, ot: &mut dyn ThreadApi, services: &mut Services, _now: Instant) {
        if !self.is_pending_or_active() {
            return;
        }

        let address = match &self.destination {
            Some(destination) => match destination.resolve(ot, &services.devices) {
                Ok(address) => address,
                Err(err) => {
                    warn!(?err, "destination not resolvable");
                    return;
                }
            },
            None => ot.realm_local_all_thread_nodes(),
        };

        self.core.status = match ot.send_diagnostic_reset(&address, &self.types) {
            Ok(()) => ActionStatus::Completed,
            Err(_) => ActionStatus::Failed,
        };
    }

    fn stop(&mut self, _ot: &mut dyn ThreadApi, _services: &mut Services) {
        if self.is_pending_or_active() {
            self.core.status = ActionStatus::Stopped;
        }
    }

    fn jsonify(&self) -> Value {
        let mut attributes = json!({});
        if let Some(destination) = &self.destination {
            let destination = match destination {
                Destination::Extended(addr) | Destination::MlEidIid(addr) => addr.to_string(),
                Destination::Rloc16(rloc16) => format!("{rloc16:04x}"),
            };
            attributes["destination"] = json!(destination);
        }
        let types: Vec<&str> = self
            .types
            .iter()
            .filter_map(|&id| diag_types::json_key(id))
            .collect();
        attributes["types"] = json!(types);
        jsonify_timeout(&self.core, &mut attributes);
        attributes["status"] = json!(self.core.status.as_str());
        attributes
    }
}
