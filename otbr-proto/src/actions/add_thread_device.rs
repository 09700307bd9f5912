//! Admits one joiner to the network and tracks it until it joins or fails.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use super::{jsonify_timeout, Action, ActionCore, ActionStatus};
use crate::manager::JoinerState;
use crate::ot::{ExtAddress, JoinerId, ThreadApi};
use crate::services::Services;

pub struct AddThreadDevice {
    core: ActionCore,
    joiner: JoinerId,
    pskd: String,
    state_string: &'static str,
}

impl AddThreadDevice {
    pub const TYPE_NAME: &'static str = "addThreadDeviceTask";

    pub fn create(
        json: &Value,
        ot: &mut dyn ThreadApi,
        services: &mut Services,
        now: Instant,
    ) -> Box<dyn Action + Send> {
        // validate has run already
        let joiner = read_joiner(json).unwrap_or(JoinerId::Any);
        let pskd = json
            .get("pskd")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut action = Self {
            core: ActionCore::new(json, now),
            joiner,
            pskd,
            state_string: JoinerState::Waiting.as_str(),
        };

        if services
            .commissioner
            .add_joiner(ot, action.joiner, &action.pskd, action.core.timeout, now)
            .is_ok()
        {
            if let Some(entry) = services.commissioner.find_joiner(&action.joiner) {
                action.state_string = entry.state().as_str();
            }
            action.core.status = ActionStatus::Active;
        }
        Box::new(action)
    }

    pub fn validate(json: &Value) -> bool {
        if super::read_timeout_or_default(json, super::DEFAULT_TIMEOUT).is_zero() {
            warn!("timeout invalid");
            return false;
        }
        if read_joiner(json).is_none() {
            warn!("eui missing or invalid");
            return false;
        }
        let Some(pskd) = json.get("pskd").and_then(Value::as_str) else {
            warn!("pskd missing or not a string");
            return false;
        };
        if !(6..=32).contains(&pskd.len()) {
            warn!("pskd length invalid");
            return false;
        }
        if pskd.chars().any(|c| matches!(c, 'I' | 'O' | 'Q' | 'Z')) {
            warn!("pskd invalid");
            return false;
        }
        true
    }
}

fn read_joiner(json: &Value) -> Option<JoinerId> {
    let eui = json.get("eui").and_then(Value::as_str)?;
    if eui == "*" {
        return Some(JoinerId::Any);
    }
    if eui.len() != 16 {
        return None;
    }
    ExtAddress::parse(eui).ok().map(JoinerId::Eui64)
}

impl Action for AddThreadDevice {
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
                .commissioner
                .add_joiner(ot, self.joiner, &self.pskd, self.core.timeout, now)
                .is_err()
            {
                return;
            }
            self.core.status = ActionStatus::Active;
        }

        if self.core.status == ActionStatus::Active {
            let Some(entry) = services.commissioner.find_joiner(&self.joiner) else {
                self.core.status = ActionStatus::Failed;
                return;
            };

            self.state_string = entry.state().as_str();
            match entry.state() {
                JoinerState::Joined => self.core.status = ActionStatus::Completed,
                JoinerState::Failed => self.core.status = ActionStatus::Failed,
                JoinerState::Expired => self.core.status = ActionStatus::Stopped,
                _ => {}
            }

            if !self.is_pending_or_active() {
                services.commissioner.remove_joiner(ot, &self.joiner);
            }
        }
    }

    fn stop(&mut self, ot: &mut dyn ThreadApi, services: &mut Services) {
        match self.core.status {
            ActionStatus::Pending => self.core.status = ActionStatus::Stopped,
            ActionStatus::Active => {
                services.commissioner.remove_joiner(ot, &self.joiner);
                self.core.status = ActionStatus::Stopped;
            }
            _ => {}
        }
    }

    fn jsonify(&self) -> Value {
        let eui = match self.joiner {
            JoinerId::Eui64(addr) => addr.to_string(),
            _ => "*".to_string(),
        };
        let mut attributes = json!({
            "eui": eui,
            "pskd": self.pskd,
        });
        jsonify_timeout(&self.core, &mut attributes);

        // while active the joiner state is more telling than our own
        attributes["status"] = if self.core.status == ActionStatus::Active {
            json!(self.state_string)
        } else {
            json!(self.core.status.as_str())
        };
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert!(AddThreadDevice::validate(&json!({
            "eui": "0011223344556677",
            "pskd": "J01NME",
        })));
        assert!(AddThreadDevice::validate(&json!({
            "eui": "*",
            "pskd": "J01NME",
            "timeout": 120,
        })));
        // forbidden pskd characters
        assert!(!AddThreadDevice::validate(&json!({
            "eui": "0011223344556677",
            "pskd": "J01NIZ",
        })));
        // pskd too short
        assert!(!AddThreadDevice::validate(&json!({
            "eui": "0011223344556677",
            "pskd": "ABC",
        })));
        // eui malformed
        assert!(!AddThreadDevice::validate(&json!({
            "eui": "00112233445566",
            "pskd": "J01NME",
        })));
        assert!(!AddThreadDevice::validate(&json!({ "pskd": "J01NME" })));
    }
}
