//! Collects a chosen set of diagnostic TLVs from one device.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use super::{jsonify_timeout, Action, ActionCore, ActionStatus, ResultRelationship};
use crate::diag_types;
use crate::ot::ThreadApi;
use crate::services::{Destination, Services};
use crate::Error;

pub struct NetworkDiagnostic {
    core: ActionCore,
    destination: Destination,
    types: Vec<u8>,
}

impl NetworkDiagnostic {
    pub const TYPE_NAME: &'static str = "getNetworkDiagnosticTask";

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
            .and_then(|s| Destination::parse(s).ok())
            .unwrap_or(Destination::Rloc16(0));

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
            warn!("timeout invalid");
            return false;
        }
        let destination_ok = json
            .get("destination")
            .and_then(Value::as_str)
            .is_some_and(|s| Destination::parse(s).is_ok());
        if !destination_ok {
            warn!("destination invalid");
            return false;
        }
        let Some(types) = json.get("types").and_then(Value::as_array) else {
            warn!("types invalid");
            return false;
        };
        if !types
            .iter()
            .all(|t| t.as_str().is_some_and(|key| diag_types::find_id(key).is_ok()))
        {
            warn!("types invalid");
            return false;
        }
        true
    }
}

impl Action for NetworkDiagnostic {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActionCore {
        &mut self.core
    }

    fn update(&mut self, ot: &mut dyn ThreadApi, services: &mut Services, now: Instant) {
        if self.core.status == ActionStatus::Pending {
            let Ok(address) = self.destination.resolve(ot, &services.devices) else {
                return;
            };
            if services
                .diag
                .start_diagnostics_request(ot, address, &self.types, self.core.timeout, now)
                .is_ok()
            {
                self.core.status = ActionStatus::Active;
            }
        }

        if self.core.status == ActionStatus::Active {
            // results are keyed by the extended address of the target
            let ext_addr = self.destination.ext_address().unwrap_or_default();
            match services
                .diag
                .get_diagnostics_status(ot, &mut services.diagnostics, &ext_addr)
            {
                Ok(uuids) => {
                    self.core.result = Some(ResultRelationship {
                        collection: services.diagnostics.name(),
                        uuid: uuids,
                    });
                    self.core.status = ActionStatus::Completed;
                }
                Err(Error::Pending) => {}
                Err(_) => self.core.status = ActionStatus::Failed,
            }

            if self.core.status != ActionStatus::Active {
                services.diag.stop_diagnostics_request();
            }
        }
    }

    fn stop(&mut self, _ot: &mut dyn ThreadApi, services: &mut Services) {
        match self.core.status {
            ActionStatus::Pending => self.core.status = ActionStatus::Stopped,
            ActionStatus::Active => {
                services.diag.stop_diagnostics_request();
                self.core.status = ActionStatus::Stopped;
            }
            _ => {}
        }
    }

    fn jsonify(&self) -> Value {
        let destination = match self.destination {
            Destination::Extended(addr) | Destination::MlEidIid(addr) => addr.to_string(),
            Destination::Rloc16(rloc16) => format!("{rloc16:04x}"),
        };
        let types: Vec<&str> = self
            .types
            .iter()
            .filter_map(|&id| diag_types::json_key(id))
            .collect();
        let mut attributes = json!({
            "destination": destination,
            "types": types,
        });
        jsonify_timeout(&self.core, &mut attributes);
        attributes["status"] = json!(self.core.status.as_str());
        attributes
    }
}
