//! Walks the whole mesh and refreshes the devices collection.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::warn;

use super::{jsonify_timeout, Action, ActionCore, ActionStatus};
use crate::ot::ThreadApi;
use crate::services::Services;
use crate::Error;

pub struct DiscoverNetwork {
    core: ActionCore,
    max_age: Duration,
    max_retries: u8,
    device_count: usize,
    actual_device_count: usize,
    retries: u8,
}

impl DiscoverNetwork {
    pub const TYPE_NAME: &'static str = "updateDeviceCollectionTask";

    pub fn create(
        json: &Value,
        _ot: &mut dyn ThreadApi,
        _services: &mut Services,
        now: Instant,
    ) -> Box<dyn Action + Send> {
        // validate has run already; maxAge is fractional seconds
        let max_age = json
            .get("maxAge")
            .and_then(Value::as_f64)
            .map(Duration::from_secs_f64)
            .unwrap_or_default();

        Box::new(Self {
            core: ActionCore::new(json, now),
            max_age,
            max_retries: json.get("maxRetries").and_then(Value::as_u64).unwrap_or(0) as u8,
            device_count: json.get("deviceCount").and_then(Value::as_u64).unwrap_or(0) as usize,
            actual_device_count: 0,
            retries: 0,
        })
    }

    pub fn validate(json: &Value) -> bool {
        for key in ["maxAge", "maxRetries", "deviceCount"] {
            if !json.get(key).is_some_and(Value::is_number) {
                warn!(key, "missing or not a number");
                return false;
            }
        }
        if super::read_timeout_or_default(json, super::DEFAULT_TIMEOUT).is_zero() {
            warn!("timeout invalid");
            return false;
        }
        true
    }
}

impl Action for DiscoverNetwork {
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
            if services
                .diag
                .handle_network_discovery_request(
                    ot,
                    self.core.timeout,
                    self.max_age,
                    self.max_retries,
                    now,
                )
                .is_ok()
            {
                self.core.status = ActionStatus::Active;
            }
        } else if self.core.status == ActionStatus::Active {
            match services.diag.get_discovery_status(ot, &mut services.devices) {
                Ok(count) => {
                    self.actual_device_count = count;
                    if count < self.device_count && self.retries <= self.max_retries {
                        // not enough devices yet, run another round
                        self.retries += 1;
                        self.core.status = ActionStatus::Pending;
                    } else {
                        self.core.status = ActionStatus::Completed;
                    }
                }
                Err(Error::Pending) => {}
                Err(err) => {
                    warn!(?err, "error while processing discovery request");
                    self.core.status = ActionStatus::Failed;
                }
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
        let mut attributes = json!({
            "maxAge": self.max_age.as_secs_f64(),
            "maxRetries": self.max_retries,
            "deviceCount": self.device_count,
        });
        jsonify_timeout(&self.core, &mut attributes);
        attributes["status"] = json!(self.core.status.as_str());
        attributes
    }
}
