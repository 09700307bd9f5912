//! On-device commissioner manager.
//!
//! Owns the local commissioner role on the Thread stack on behalf of its
//! users: a joiner allow-list with per-entry deadlines, and at most one
//! MGMT_ED_SCAN exchange. The role is started while either user needs it
//! and stopped from [`process`](CommissionerManager::process) once neither
//! does; stopping is deferred to the next `process` call so a stack event
//! callback never re-enters the stack.

use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::ot::{CommissionerState, JoinerEvent, JoinerId, ThreadApi};
use crate::{Error, Result};

/// Network propagation allowance added to every energy scan wait.
pub const ENERGY_SCAN_NET_DELAY: Duration = Duration::from_millis(1500);

/// Least time a scan needs: every selected channel is measured `count`
/// times, each measurement occupying one period plus the scan duration.
pub fn energy_scan_min_delay(channel_mask: u32, count: u8, period: u16, duration: u16) -> Duration {
    let channels = channel_mask.count_ones() as u64;
    Duration::from_millis(channels * count as u64 * (period as u64 + duration as u64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerState {
    /// Not handed to the commissioner yet
    Waiting,
    /// Registered, no joiner seen so far
    Pending,
    /// Joined successfully
    Joined,
    /// A joiner connected at least once
    Attempted,
    /// Attempted and then expired
    Failed,
    /// Expired without any attempt
    Expired,
}

impl JoinerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinerState::Waiting => "waiting",
            JoinerState::Pending => "undiscovered",
            JoinerState::Joined => "completed",
            JoinerState::Attempted => "attempted",
            JoinerState::Failed => "failed",
            JoinerState::Expired => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinerEntry {
    id: JoinerId,
    pskd: String,
    state: JoinerState,
    deadline: Instant,
}

impl JoinerEntry {
    pub fn id(&self) -> &JoinerId {
        &self.id
    }

    pub fn pskd(&self) -> &str {
        &self.pskd
    }

    pub fn state(&self) -> JoinerState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_joined(&self) -> bool {
        self.state == JoinerState::Joined
    }

    /// True while the entry still wants the commissioner role.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.state,
            JoinerState::Waiting | JoinerState::Pending | JoinerState::Attempted
        )
    }

    fn register(&mut self, ot: &mut dyn ThreadApi, now: Instant) -> Result<()> {
        if !self.is_pending() {
            return Err(Error::InvalidState);
        }
        if now >= self.deadline {
            self.state = JoinerState::Failed;
            return Err(Error::InvalidState);
        }
        ot.commissioner_add_joiner(&self.id, &self.pskd, self.deadline - now)?;
        if self.state == JoinerState::Waiting {
            self.state = JoinerState::Pending;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnergyScanState {
    Free,
    Waiting,
    Sent,
    Ready,
    Failed,
}

/// Per-channel RSSI maxima, one row per completed measurement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnergyReport {
    pub channel: u8,
    pub max_rssi: Vec<i8>,
}

#[derive(Debug, Clone, Default)]
pub struct EnergyScanReport {
    /// Interface identifier of the scanned device
    pub origin_iid: [u8; 8],
    pub reports: Vec<EnergyReport>,
}

pub struct CommissionerManager {
    joiners: Vec<JoinerEntry>,
    state: CommissionerState,
    scan_state: EnergyScanState,
    scan_channel_mask: u32,
    scan_count: u8,
    scan_period: u16,
    scan_duration: u16,
    scan_address: Ipv6Addr,
    scan_timeout: Option<Instant>,
    scan_report: EnergyScanReport,
}

impl Default for CommissionerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommissionerManager {
    pub fn new() -> Self {
        Self {
            joiners: Vec::new(),
            state: CommissionerState::Disabled,
            scan_state: EnergyScanState::Free,
            scan_channel_mask: 0,
            scan_count: 0,
            scan_period: 0,
            scan_duration: 0,
            scan_address: Ipv6Addr::UNSPECIFIED,
            scan_timeout: None,
            scan_report: EnergyScanReport::default(),
        }
    }

    pub fn joiners(&self) -> &[JoinerEntry] {
        &self.joiners
    }

    /// Adds `joiner` to the allow-list with an absolute deadline of
    /// `now + timeout`.
    pub fn add_joiner(
        &mut self,
        ot: &mut dyn ThreadApi,
        joiner: JoinerId,
        pskd: &str,
        timeout: Duration,
        now: Instant,
    ) -> Result<()> {
        if self.joiners.iter().any(|entry| entry.id == joiner) {
            return Err(Error::Already);
        }

        self.joiners.push(JoinerEntry {
            id: joiner,
            pskd: pskd.to_string(),
            state: JoinerState::Waiting,
            deadline: now + timeout,
        });

        if self.state == CommissionerState::Active {
            if let Some(entry) = self.joiners.last_mut() {
                if let Err(err) = entry.register(ot, now) {
                    debug!(?err, "joiner registration deferred");
                }
            }
        } else {
            self.try_activate(ot);
        }
        Ok(())
    }

    pub fn remove_joiner(&mut self, ot: &mut dyn ThreadApi, joiner: &JoinerId) {
        if let Some(pos) = self.joiners.iter().position(|entry| &entry.id == joiner) {
            if self.state == CommissionerState::Active {
                if let Err(err) = ot.commissioner_remove_joiner(joiner) {
                    warn!(?err, "failed to remove joiner from stack");
                }
            }
            self.joiners.remove(pos);
        }
    }

    pub fn remove_all_joiners(&mut self, ot: &mut dyn ThreadApi) {
        if self.state == CommissionerState::Active {
            for entry in &self.joiners {
                if let Err(err) = ot.commissioner_remove_joiner(&entry.id) {
                    warn!(?err, "failed to remove joiner from stack");
                }
            }
        }
        self.joiners.clear();
    }

    pub fn find_joiner(&self, joiner: &JoinerId) -> Option<&JoinerEntry> {
        self.joiners.iter().find(|entry| &entry.id == joiner)
    }

    /// Starts an energy scan of `channel_mask` on the device at `address`.
    ///
    /// Only one scan can run at a time; another may not start until the
    /// previous scan's minimum-delay window has fully elapsed.
    pub fn start_energy_scan(
        &mut self,
        ot: &mut dyn ThreadApi,
        channel_mask: u32,
        count: u8,
        period: u16,
        duration: u16,
        address: Ipv6Addr,
        now: Instant,
    ) -> Result<()> {
        if self.scan_timeout.is_some_and(|t| now < t) {
            return Err(Error::Already);
        }
        if self.scan_state != EnergyScanState::Free {
            return Err(Error::Already);
        }
        if channel_mask == 0 {
            return Err(Error::InvalidArgs);
        }

        self.scan_state = EnergyScanState::Waiting;
        self.scan_channel_mask = channel_mask;
        self.scan_count = count;
        self.scan_period = period;
        self.scan_duration = duration;
        self.scan_address = address;

        self.scan_report.reports.clear();
        for channel in 0..32u8 {
            if channel_mask & (1 << channel) != 0 {
                self.scan_report.reports.push(EnergyReport {
                    channel,
                    max_rssi: Vec::new(),
                });
            }
        }
        self.scan_report.origin_iid.copy_from_slice(&address.octets()[8..]);

        if self.state == CommissionerState::Active {
            self.send_energy_scan(ot, now);
        } else {
            self.try_activate(ot);
        }
        Ok(())
    }

    /// Polls the scan. `Err(Pending)` while in flight, `Ok` once the
    /// report in [`energy_scan_result`](Self::energy_scan_result) is final.
    pub fn get_energy_scan_status(&mut self, now: Instant) -> Result<()> {
        match self.scan_state {
            EnergyScanState::Free => Err(Error::InvalidState),
            EnergyScanState::Waiting => Err(Error::Pending),
            EnergyScanState::Sent => {
                if self.scan_timeout.is_some_and(|t| now < t) {
                    Err(Error::Pending)
                } else {
                    self.scan_state = EnergyScanState::Ready;
                    Ok(())
                }
            }
            EnergyScanState::Ready => Ok(()),
            EnergyScanState::Failed => Err(Error::Failed),
        }
    }

    pub fn energy_scan_result(&self) -> &EnergyScanReport {
        &self.scan_report
    }

    pub fn stop_energy_scan(&mut self) {
        self.scan_state = EnergyScanState::Free;
    }

    /// Periodic upkeep. Stops the commissioner role here rather than from
    /// event handlers.
    pub fn process(&mut self, ot: &mut dyn ThreadApi, _now: Instant) {
        if self.should_activate() {
            self.try_activate(ot);
        } else if self.state != CommissionerState::Disabled {
            if let Err(err) = ot.commissioner_stop() {
                warn!(?err, "failed to stop commissioner");
            }
        }
    }

    fn should_activate(&self) -> bool {
        self.joiners.iter().any(|entry| entry.is_pending())
            || matches!(
                self.scan_state,
                EnergyScanState::Waiting | EnergyScanState::Sent
            )
    }

    fn try_activate(&mut self, ot: &mut dyn ThreadApi) {
        if self.state == CommissionerState::Disabled {
            if let Err(err) = ot.commissioner_start() {
                debug!(?err, "commissioner start refused");
            }
        }
    }

    fn send_energy_scan(&mut self, ot: &mut dyn ThreadApi, now: Instant) {
        if self.scan_state != EnergyScanState::Waiting {
            return;
        }
        match ot.commissioner_energy_scan(
            self.scan_channel_mask,
            self.scan_count,
            self.scan_period,
            self.scan_duration,
            &self.scan_address,
        ) {
            Ok(()) => {
                self.scan_state = EnergyScanState::Sent;
                let delay = ENERGY_SCAN_NET_DELAY
                    + energy_scan_min_delay(
                        self.scan_channel_mask,
                        self.scan_count,
                        self.scan_period,
                        self.scan_duration,
                    );
                self.scan_timeout = Some(now + delay);
            }
            Err(err) => warn!(?err, "failed to start energy scan"),
        }
    }

    /// Commissioner role transition reported by the stack.
    pub fn handle_state_event(&mut self, ot: &mut dyn ThreadApi, state: CommissionerState, now: Instant) {
        if self.state != CommissionerState::Active && state == CommissionerState::Active {
            for entry in &mut self.joiners {
                if let Err(err) = entry.register(ot, now) {
                    debug!(?err, "joiner registration skipped");
                }
            }
            self.send_energy_scan(ot, now);
        }

        if state == CommissionerState::Disabled && self.scan_state == EnergyScanState::Sent {
            self.scan_state = EnergyScanState::Failed;
        }

        self.state = state;
    }

    /// Joiner lifecycle event reported by the stack.
    pub fn handle_joiner_event(&mut self, event: JoinerEvent, joiner: &JoinerId) {
        let Some(entry) = self.joiners.iter_mut().find(|entry| &entry.id == joiner) else {
            return;
        };

        match event {
            JoinerEvent::Start => entry.state = JoinerState::Attempted,
            JoinerEvent::Connected | JoinerEvent::Finalize => {}
            JoinerEvent::End => entry.state = JoinerState::Joined,
            JoinerEvent::Removed => {
                entry.state = match entry.state {
                    JoinerState::Pending => JoinerState::Expired,
                    JoinerState::Attempted => JoinerState::Failed,
                    other => other,
                };
            }
        }
    }

    /// Energy scan report burst from the stack. `energy_list` holds one
    /// RSSI per selected channel per completed pass, in mask order.
    pub fn handle_energy_report(&mut self, channel_mask: u32, energy_list: &[i8]) {
        if self.scan_state != EnergyScanState::Sent || self.scan_channel_mask != channel_mask {
            return;
        }
        let channels = channel_mask.count_ones() as usize;
        if channels == 0 || energy_list.len() % channels != 0 {
            warn!("malformed energy scan report");
            return;
        }

        for pass in energy_list.chunks(channels) {
            for (report, rssi) in self.scan_report.reports.iter_mut().zip(pass) {
                report.max_rssi.push(*rssi);
            }
        }
    }
}
