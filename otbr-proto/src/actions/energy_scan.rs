//! Runs an energy scan on a remote device and stores the report.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use super::{jsonify_timeout, Action, ActionCore, ActionStatus, ResultRelationship};
use crate::collection::DiagnosticRecord;
use crate::ot::ThreadApi;
use crate::services::{Destination, Services};
use crate::Error;

pub struct EnergyScan {
    core: ActionCore,
    destination: Destination,
    mask: u32,
    count: u8,
    period: u16,
    scan_duration: u16,
}

impl EnergyScan {
    pub const TYPE_NAME: &'static str = "getEnergyScanTask";

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

        let mut mask = 0u32;
        if let Some(channels) = json.get("channelMask").and_then(Value::as_array) {
            for channel in channels.iter().filter_map(Value::as_u64) {
                mask |= 1 << channel;
            }
        }

        Box::new(Self {
            core: ActionCore::new(json, now),
            destination,
            mask,
            count: json.get("count").and_then(Value::as_u64).unwrap_or(0) as u8,
            period: json.get("period").and_then(Value::as_u64).unwrap_or(0) as u16,
            scan_duration: json.get("scanDuration").and_then(Value::as_u64).unwrap_or(0) as u16,
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
        let Some(channels) = json.get("channelMask").and_then(Value::as_array) else {
            warn!("channelMask invalid");
            return false;
        };
        if !channels
            .iter()
            .all(|c| c.as_u64().is_some_and(|ch| (11..=26).contains(&ch)))
        {
            warn!("channelMask invalid");
            return false;
        }
        for key in ["count", "period", "scanDuration"] {
            if !json.get(key).is_some_and(Value::is_number) {
                warn!(key, "missing or not a number");
                return false;
            }
        }
        true
    }
}

impl Action for EnergyScan {
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
            match services.commissioner.start_energy_scan(
                ot,
                self.mask,
                self.count,
                self.period,
                self.scan_duration,
                address,
                now,
            ) {
                Ok(()) => self.core.status = ActionStatus::Active,
                Err(err) => warn!(?err, "failed to activate"),
            }
        }

        if self.core.status == ActionStatus::Active {
            match services.commissioner.get_energy_scan_status(now) {
                Ok(()) => {
                    let report = services.commissioner.energy_scan_result().clone();
                    let uuid = uuid::Uuid::new_v4().to_string();
                    self.core.result = Some(ResultRelationship {
                        collection: services.diagnostics.name(),
                        uuid: uuid.clone(),
                    });
                    services
                        .diagnostics
                        .insert(&uuid, DiagnosticRecord::EnergyScan(report));
                    self.core.status = ActionStatus::Completed;
                }
                Err(Error::Pending) => {}
                Err(_) => self.core.status = ActionStatus::Failed,
            }

            if self.core.status != ActionStatus::Active {
                services.commissioner.stop_energy_scan();
            }
        }
    }

    fn stop(&mut self, _ot: &mut dyn ThreadApi, services: &mut Services) {
        match self.core.status {
            ActionStatus::Pending => self.core.status = ActionStatus::Stopped,
            ActionStatus::Active => {
                services.commissioner.stop_energy_scan();
                self.core.status = ActionStatus::Stopped;
            }
            _ => {}
        }
    }

    fn jsonify(&self) -> Value {
        let channels: Vec<u32> = (0..32).filter(|i| self.mask & (1 << i) != 0).collect();
        let destination = match self.destination {
            Destination::Extended(addr) | Destination::MlEidIid(addr) => addr.to_string(),
            Destination::Rloc16(rloc16) => format!("{rloc16:04x}"),
        };
        let mut attributes = json!({
            "destination": destination,
            "channelMask": channels,
            "count": self.count,
            "period": self.period,
            "scanDuration": self.scan_duration,
        });
        jsonify_timeout(&self.core, &mut attributes);
        attributes["status"] = json!(self.core.status.as_str());
        attributes
    }
}
