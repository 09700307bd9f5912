//! Network diagnostics collection state machine.
//!
//! Runs one request at a time, in two flavors: a network discovery that
//! multicasts `DIAG_GET.qry` to every device and walks each router's child
//! and neighbor tables, and a targeted per-device request for an explicit
//! TLV list. Responses arrive through `handle_*` methods; the driver calls
//! [`process`](NetworkDiagHandler::process) periodically to drive retries
//! until the request completes or its overall deadline passes, at which
//! point whatever was collected is read back into the collections.

use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::collection::{
    Collection, Device, DeviceInfo, DiagnosticRecord, NetworkDiagnostics, NodeInfo,
    ServiceRoleFlags,
};
use crate::diag_types;
use crate::ot::{
    rloc16_is_router, rloc_address, ChildIp6AddrList, DiagTlv, DiagValue, ExtAddress,
    MeshDiagChildEntry, MeshDiagRouterNeighborEntry, Mode, ThreadApi,
};
use crate::{Error, Result};

/// Cached diagnostics older than this are collected again.
pub const DIAG_MAX_AGE: Duration = Duration::from_millis(30_000);
const DIAG_MAX_AGE_UPPER_LIMIT: Duration = Duration::from_millis(300_000);

/// Default overall collection deadline.
pub const DIAG_COLLECT_TIMEOUT: Duration = Duration::from_millis(10_000);
const DIAG_COLLECT_TIMEOUT_UPPER_LIMIT: Duration = Duration::from_millis(100_000);

const DIAG_RETRY_DELAY: Duration = Duration::from_millis(100);
const DIAG_RETRY_DELAY_UPPER_LIMIT: Duration = Duration::from_millis(5_000);

/// Default retry budget for a request or query.
pub const DIAG_MAX_RETRIES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Idle,
    Waiting,
    Pending,
    Failed,
    Done,
}

#[derive(Debug, Clone, Default)]
struct DiagInfo {
    start_time: Option<Instant>,
    content: Vec<DiagTlv>,
}

/// Cached result of one mesh-diag query against one router.
#[derive(Debug, Clone)]
struct QueryCache<T> {
    state: RequestState,
    update_time: Option<Instant>,
    retries: u8,
    entries: Vec<T>,
}

impl<T> Default for QueryCache<T> {
    fn default() -> Self {
        Self {
            state: RequestState::Idle,
            update_time: None,
            retries: 0,
            entries: Vec::new(),
        }
    }
}

impl<T> QueryCache<T> {
    fn reset(&mut self) {
        self.entries.clear();
        self.retries = 0;
    }

    fn is_fresh(&self, cutoff: Option<Instant>, max_retries: u8) -> bool {
        let fresh = match (self.update_time, cutoff) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(t), Some(c)) => t > c,
        };
        fresh || self.retries > max_retries
    }
}

enum QueryOutcome {
    Started,
    /// Start refused but retryable (stack busy or out of buffers)
    Retry,
    /// Start refused permanently, give up on this router
    GiveUp,
}

pub struct NetworkDiagHandler {
    request_state: RequestState,
    query_state: RequestState,
    is_discovery: bool,
    dest: Ipv6Addr,
    req_tlvs: Vec<u8>,
    req_omittable: usize,
    query_tlvs: Vec<u8>,
    retries: u8,
    max_retries: u8,
    /// Entries updated before this instant count as stale
    max_age_cutoff: Option<Instant>,
    timeout: Option<Instant>,
    time_last_attempt: Option<Instant>,
    /// Router the in-flight mesh-diag query was sent to
    query_rloc: u16,
    diag_set: FxHashMap<u16, DiagInfo>,
    child_tables: FxHashMap<u16, QueryCache<MeshDiagChildEntry>>,
    child_ips: FxHashMap<u16, QueryCache<ChildIp6AddrList>>,
    router_neighbors: FxHashMap<u16, QueryCache<MeshDiagRouterNeighborEntry>>,
    result_uuids: String,
}

impl Default for NetworkDiagHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkDiagHandler {
    pub fn new() -> Self {
        Self {
            request_state: RequestState::Idle,
            query_state: RequestState::Idle,
            is_discovery: false,
            dest: Ipv6Addr::UNSPECIFIED,
            req_tlvs: Vec::new(),
            req_omittable: 0,
            query_tlvs: Vec::new(),
            retries: 0,
            max_retries: DIAG_MAX_RETRIES,
            max_age_cutoff: None,
            timeout: None,
            time_last_attempt: None,
            query_rloc: 0,
            diag_set: FxHashMap::default(),
            child_tables: FxHashMap::default(),
            child_ips: FxHashMap::default(),
            router_neighbors: FxHashMap::default(),
            result_uuids: String::new(),
        }
    }

    /// Starts a targeted diagnostic request toward `dest`.
    ///
    /// `tlv_list` is split into `DIAG_GET` types and mesh-diag query types;
    /// RLOC16 and extended address are always requested so responses can be
    /// keyed and matched.
    pub fn start_diagnostics_request(
        &mut self,
        ot: &mut dyn ThreadApi,
        dest: Ipv6Addr,
        tlv_list: &[u8],
        timeout: Duration,
        now: Instant,
    ) -> Result<()> {
        if self.request_state != RequestState::Idle {
            return Err(Error::Already);
        }
        self.request_state = RequestState::Waiting;
        self.is_discovery = false;
        self.result_uuids.clear();
        self.retries = 0;
        self.max_retries = DIAG_MAX_RETRIES;
        self.max_age_cutoff = now.checked_sub(DIAG_MAX_AGE);
        self.timeout = Some(now + timeout);

        match self.split_tlv_list(tlv_list) {
            Ok(()) => {}
            Err(err) => {
                self.request_state = RequestState::Idle;
                self.query_state = RequestState::Idle;
                return Err(err);
            }
        }

        self.dest = dest;

        self.reset_router_diag(ot, false);
        self.reset_child_diag(now);
        self.reset_child_tables(ot, false);
        self.reset_child_ips(ot, false);
        self.reset_router_neighbors(ot, false);

        self.query_state = if self.query_tlvs.is_empty() {
            RequestState::Done
        } else {
            RequestState::Waiting
        };

        if let Err(err) = ot.send_diagnostic_get(&self.dest, &self.req_tlvs) {
            warn!(?err, "failed to send diagnostic request");
            self.request_state = RequestState::Idle;
            self.query_state = RequestState::Idle;
            return Err(err);
        }
        self.time_last_attempt = Some(now);
        Ok(())
    }

    fn split_tlv_list(&mut self, tlv_list: &[u8]) -> Result<()> {
        let mut rloc_requested = false;
        let mut ext_addr_requested = false;

        self.req_tlvs.clear();
        self.req_omittable = 0;
        self.query_tlvs.clear();

        for &ty in tlv_list {
            if diag_types::requires_query(ty) {
                if self.query_tlvs.len() >= diag_types::MAX_QUERY_COUNT {
                    return Err(Error::Parse);
                }
                self.query_tlvs.push(ty);
            } else {
                if self.req_tlvs.len() >= diag_types::MAX_TOTAL_COUNT {
                    return Err(Error::Parse);
                }
                self.req_tlvs.push(ty);
                rloc_requested |= ty == diag_types::SHORT_ADDRESS;
                ext_addr_requested |= ty == diag_types::EXT_ADDRESS;
                if diag_types::omittable(ty) {
                    self.req_omittable += 1;
                }
            }
        }
        if !rloc_requested {
            if self.req_tlvs.len() >= diag_types::MAX_TOTAL_COUNT {
                return Err(Error::Parse);
            }
            self.req_tlvs.push(diag_types::SHORT_ADDRESS);
        }
        if !ext_addr_requested {
            if self.req_tlvs.len() >= diag_types::MAX_TOTAL_COUNT {
                return Err(Error::Parse);
            }
            self.req_tlvs.push(diag_types::EXT_ADDRESS);
        }
        Ok(())
    }

    // Minimal TLVs needed to fill the device collection.
    fn set_default_tlvs(&mut self) {
        self.req_tlvs = vec![
            diag_types::EXT_ADDRESS,
            diag_types::SHORT_ADDRESS,
            diag_types::IP6_ADDR_LIST,
        ];
        self.req_omittable = 0;
        self.query_tlvs = vec![diag_types::CHILD, diag_types::CHILD_IP6_ADDR_LIST];
    }

    /// Starts a whole-network discovery.
    ///
    /// `timeout` and `max_age` are clamped to their default at the low end
    /// and ten times the default at the high end.
    pub fn handle_network_discovery_request(
        &mut self,
        ot: &mut dyn ThreadApi,
        timeout: Duration,
        max_age: Duration,
        retry_count: u8,
        now: Instant,
    ) -> Result<()> {
        if self.request_state != RequestState::Idle {
            return Err(Error::InvalidState);
        }
        self.request_state = RequestState::Waiting;
        self.is_discovery = true;

        self.timeout =
            Some(now + timeout.clamp(DIAG_COLLECT_TIMEOUT, DIAG_COLLECT_TIMEOUT_UPPER_LIMIT));
        self.max_age_cutoff =
            now.checked_sub(max_age.clamp(DIAG_MAX_AGE, DIAG_MAX_AGE_UPPER_LIMIT));
        self.max_retries = retry_count;

        self.set_default_tlvs();

        if self.start_discovery(ot, now).is_err() {
            self.request_state = RequestState::Idle;
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    fn start_discovery(&mut self, ot: &mut dyn ThreadApi, now: Instant) -> Result<()> {
        self.dest = ot.realm_local_all_thread_nodes();

        if self.query_state == RequestState::Idle {
            // learn current router rloc16s and drop outdated entries
            self.reset_router_diag(ot, true);
            self.reset_child_diag(self.max_age_cutoff.unwrap_or(now));
            self.reset_child_tables(ot, true);
            self.reset_child_ips(ot, true);
            self.reset_router_neighbors(ot, true);

            debug!(dest = %self.dest, "sending discovery multicast");
            ot.send_diagnostic_get(&self.dest, &self.req_tlvs)?;
            self.query_state = RequestState::Waiting;
            self.time_last_attempt = Some(now);
            self.retries = 0;
        }
        Ok(())
    }

    /// Clears collected state between requests.
    pub fn clear(&mut self) {
        self.diag_set.clear();
        self.child_tables.clear();
        self.child_ips.clear();
        self.router_neighbors.clear();
    }

    /// Marks the handler idle so a new request can start. Collected
    /// results stay readable until the next request resets them.
    pub fn stop_diagnostics_request(&mut self) {
        self.request_state = RequestState::Idle;
        self.query_state = RequestState::Idle;
    }

    /// Drives retries and the query pipeline; called periodically.
    pub fn process(&mut self, ot: &mut dyn ThreadApi, now: Instant) -> Result<()> {
        if !matches!(
            self.request_state,
            RequestState::Waiting | RequestState::Pending
        ) {
            return Ok(());
        }

        let timed_out = self.timeout.is_some_and(|t| now >= t);
        let mut complete = true;

        if !timed_out {
            if self.request_state == RequestState::Waiting {
                complete = self.is_diag_set_complete();

                if complete || self.retries >= self.max_retries {
                    self.request_state = RequestState::Pending;
                    if self.query_state == RequestState::Waiting {
                        self.query_state = RequestState::Pending;
                    }
                } else {
                    let backoff = retry_backoff(self.retries);
                    let due = self
                        .time_last_attempt
                        .map_or(true, |last| last + backoff < now);
                    if due {
                        self.retries += 1;
                        self.time_last_attempt = Some(now);
                        debug!(retries = self.retries, "retrying diagnostic request");
                        if let Err(err) = ot.send_diagnostic_get(&self.dest, &self.req_tlvs) {
                            warn!(?err, "diagnostic retry refused");
                            if self.retries >= self.max_retries {
                                self.request_state = RequestState::Failed;
                                self.query_state = RequestState::Done;
                            }
                            return Err(Error::NoBufs);
                        }
                    }
                }
            }

            if self.query_state == RequestState::Pending {
                if self.handle_next_diag_query(ot) {
                    self.query_state = RequestState::Done;
                } else {
                    complete = false;
                }
            }

            if self.request_state == RequestState::Pending
                && self.query_state == RequestState::Done
            {
                if self.is_discovery {
                    if let Some(reed) = self.find_unknown_reed() {
                        // REEDs respond to unicast only; restart the
                        // request phase against each one in turn
                        debug!(rloc16 = format_args!("0x{reed:04x}"), "following up REED");
                        self.diag_set.insert(reed, DiagInfo::default());
                        self.retries = 0;
                        self.request_state = RequestState::Waiting;
                        self.dest = rloc_address(&ot.mesh_local_prefix(), reed);
                        return Ok(());
                    }
                }
                if !self.is_diag_set_complete() {
                    complete = false;
                }
            }
        }

        if complete || timed_out {
            if timed_out {
                warn!("diagnostic collection deadline reached");
            }
            self.request_state = RequestState::Done;
            self.query_state = RequestState::Done;
        }
        Ok(())
    }

    /// Discovery status poll. On completion fills `devices` and returns
    /// the number of devices known.
    pub fn get_discovery_status(
        &mut self,
        ot: &mut dyn ThreadApi,
        devices: &mut Collection<Device>,
    ) -> Result<usize> {
        match self.request_state {
            RequestState::Idle => Err(Error::InvalidState),
            RequestState::Waiting | RequestState::Pending => Err(Error::Pending),
            RequestState::Failed => Err(Error::Failed),
            RequestState::Done => {
                self.fill_device_collection(ot, devices);
                Ok(devices.len())
            }
        }
    }

    /// Targeted request status poll. On completion fills `diagnostics`
    /// with records for `ext_addr` and returns their UUIDs.
    pub fn get_diagnostics_status(
        &mut self,
        ot: &mut dyn ThreadApi,
        diagnostics: &mut Collection<DiagnosticRecord>,
        ext_addr: &ExtAddress,
    ) -> Result<String> {
        match self.request_state {
            RequestState::Idle => Err(Error::InvalidState),
            RequestState::Waiting | RequestState::Pending => Err(Error::Pending),
            RequestState::Failed => Err(Error::Failed),
            RequestState::Done => {
                self.fill_diagnostic_collection(ot, diagnostics, ext_addr);
                Ok(self.result_uuids.clone())
            }
        }
    }

    fn is_diag_content_incomplete(&self, content: &[DiagTlv]) -> bool {
        content.is_empty() || content.len() < self.req_tlvs.len() - self.req_omittable
    }

    fn is_diag_set_complete(&self) -> bool {
        if self.is_discovery {
            if self.diag_set.len() < self.router_neighbors.len() {
                return false;
            }
        } else if self.diag_set.is_empty() {
            return false;
        }
        self.diag_set
            .values()
            .all(|info| !self.is_diag_content_incomplete(&info.content))
    }

    /// `DIAG_GET` response delivered by the driver.
    pub fn handle_diag_response(&mut self, source: &Ipv6Addr, tlvs: Vec<DiagTlv>, now: Instant) {
        let key_rloc = tlvs.iter().find_map(|tlv| match tlv.value {
            DiagValue::U16(rloc16) if tlv.ty == diag_types::SHORT_ADDRESS => Some(rloc16),
            _ => None,
        });
        let Some(key_rloc) = key_rloc else {
            warn!("diagnostic response without rloc16, dropped");
            return;
        };

        if !self.is_discovery {
            // single unicast request, drop responses from anyone else
            if source.octets()[8..] != self.dest.octets()[8..] {
                return;
            }
        }

        debug!(
            rloc16 = format_args!("0x{key_rloc:04x}"),
            count = tlvs.len(),
            "received diagnostic response"
        );
        self.update_diag(key_rloc, tlvs, now);
    }

    // Merge into the existing content: update TLVs in place, keep the
    // rest, append new types at the end.
    fn update_diag(&mut self, key: u16, mut new_tlvs: Vec<DiagTlv>, now: Instant) {
        let mut merged = Vec::new();

        match self.diag_set.get(&key) {
            Some(existing) if !existing.content.is_empty() => {
                for old in &existing.content {
                    if let Some(pos) = new_tlvs.iter().position(|tlv| tlv.ty == old.ty) {
                        merged.push(new_tlvs.remove(pos));
                    } else {
                        merged.push(old.clone());
                    }
                }
            }
            Some(_) => {}
            None => self.add_single_rloc16_lookup(key),
        }
        merged.extend(new_tlvs);

        self.diag_set.insert(
            key,
            DiagInfo {
                start_time: Some(now),
                content: merged,
            },
        );
    }

    // An unplanned unicast responder; routers also get query cache slots.
    fn add_single_rloc16_lookup(&mut self, rloc16: u16) {
        if rloc16_is_router(rloc16) {
            self.child_tables.entry(rloc16).or_default();
            self.child_ips.entry(rloc16).or_default();
            self.router_neighbors.entry(rloc16).or_default();
        }
    }

    fn router_rlocs(ot: &dyn ThreadApi) -> Vec<u16> {
        (0..=ot.max_router_id())
            .map(crate::ot::rloc16_from_router_id)
            .filter(|&rloc| ot.router_info(rloc).is_ok())
            .collect()
    }

    fn reset_router_diag(&mut self, ot: &mut dyn ThreadApi, learn_rloc16: bool) {
        for id in 0..=ot.max_router_id() {
            let rloc = crate::ot::rloc16_from_router_id(id);
            if ot.router_info(rloc).is_ok() && learn_rloc16 {
                self.diag_set.entry(rloc).or_default();
            } else if self.diag_set.remove(&rloc).is_some() {
                debug!(rloc16 = format_args!("0x{rloc:04x}"), "dropped outdated router diag");
            }
        }
    }

    fn reset_child_diag(&mut self, cutoff: Instant) {
        self.diag_set.retain(|&rloc, info| {
            rloc16_is_router(rloc) || info.start_time.is_some_and(|t| t >= cutoff)
        });
    }

    fn reset_child_tables(&mut self, ot: &mut dyn ThreadApi, learn_rloc16: bool) {
        Self::reset_cache(&mut self.child_tables, ot, learn_rloc16);
    }

    fn reset_child_ips(&mut self, ot: &mut dyn ThreadApi, learn_rloc16: bool) {
        Self::reset_cache(&mut self.child_ips, ot, learn_rloc16);
    }

    fn reset_router_neighbors(&mut self, ot: &mut dyn ThreadApi, learn_rloc16: bool) {
        Self::reset_cache(&mut self.router_neighbors, ot, learn_rloc16);
    }

    fn reset_cache<T>(
        cache: &mut FxHashMap<u16, QueryCache<T>>,
        ot: &mut dyn ThreadApi,
        learn_rloc16: bool,
    ) {
        for id in 0..=ot.max_router_id() {
            let rloc = crate::ot::rloc16_from_router_id(id);
            if ot.router_info(rloc).is_ok() && learn_rloc16 {
                cache.entry(rloc).or_default().reset();
            } else {
                cache.remove(&rloc);
            }
        }
    }

    // One query in flight at a time; returns true once every cache for
    // every requested query type is served.
    fn handle_next_diag_query(&mut self, ot: &mut dyn ThreadApi) -> bool {
        for ty in self.query_tlvs.clone() {
            let rlocs: Vec<u16> = match ty {
                diag_types::CHILD => self.child_tables.keys().copied().collect(),
                diag_types::CHILD_IP6_ADDR_LIST => self.child_ips.keys().copied().collect(),
                diag_types::ROUTER_NEIGHBOR => self.router_neighbors.keys().copied().collect(),
                _ => continue,
            };
            for rloc in rlocs {
                if !self.request_query(ot, ty, rloc) {
                    return false;
                }
            }
        }
        true
    }

    // Returns true when this cache is served (fresh, exhausted, or
    // permanently refused); false while a query is or stays in flight.
    fn request_query(&mut self, ot: &mut dyn ThreadApi, ty: u8, rloc: u16) -> bool {
        let cutoff = self.max_age_cutoff;
        let max_retries = self.max_retries;

        let Some(state) = self.cache_state(ty, rloc) else {
            return true;
        };

        match state {
            RequestState::Idle | RequestState::Failed | RequestState::Done => {
                let fresh = match ty {
                    diag_types::CHILD => self
                        .child_tables
                        .get(&rloc)
                        .is_some_and(|c| c.is_fresh(cutoff, max_retries)),
                    diag_types::CHILD_IP6_ADDR_LIST => self
                        .child_ips
                        .get(&rloc)
                        .is_some_and(|c| c.is_fresh(cutoff, max_retries)),
                    _ => self
                        .router_neighbors
                        .get(&rloc)
                        .is_some_and(|c| c.is_fresh(cutoff, max_retries)),
                };
                if fresh {
                    return true;
                }
                self.bump_cache(ty, rloc);
                self.send_query(ot, ty, rloc)
            }
            RequestState::Waiting => self.send_query(ot, ty, rloc),
            RequestState::Pending => false,
        }
    }

    fn send_query(&mut self, ot: &mut dyn ThreadApi, ty: u8, rloc: u16) -> bool {
        let result = match ty {
            diag_types::CHILD => ot.mesh_diag_query_child_table(rloc),
            diag_types::CHILD_IP6_ADDR_LIST => ot.mesh_diag_query_child_ip6_addrs(rloc),
            _ => ot.mesh_diag_query_router_neighbor_table(rloc),
        };
        let outcome = match result {
            Ok(()) => QueryOutcome::Started,
            Err(Error::Busy) | Err(Error::NoBufs) | Err(Error::InvalidArgs) => {
                warn!(?ty, rloc16 = format_args!("0x{rloc:04x}"), "query start refused");
                QueryOutcome::Retry
            }
            Err(_) => QueryOutcome::GiveUp,
        };
        match outcome {
            QueryOutcome::Started => {
                self.query_rloc = rloc;
                self.set_cache_state(ty, rloc, RequestState::Pending);
                false
            }
            QueryOutcome::Retry => false,
            QueryOutcome::GiveUp => {
                self.set_cache_state(ty, rloc, RequestState::Done);
                true
            }
        }
    }

    fn cache_state(&self, ty: u8, rloc: u16) -> Option<RequestState> {
        match ty {
            diag_types::CHILD => self.child_tables.get(&rloc).map(|c| c.state),
            diag_types::CHILD_IP6_ADDR_LIST => self.child_ips.get(&rloc).map(|c| c.state),
            _ => self.router_neighbors.get(&rloc).map(|c| c.state),
        }
    }

    fn set_cache_state(&mut self, ty: u8, rloc: u16, state: RequestState) {
        match ty {
            diag_types::CHILD => {
                if let Some(cache) = self.child_tables.get_mut(&rloc) {
                    cache.state = state;
                }
            }
            diag_types::CHILD_IP6_ADDR_LIST => {
                if let Some(cache) = self.child_ips.get_mut(&rloc) {
                    cache.state = state;
                }
            }
            _ => {
                if let Some(cache) = self.router_neighbors.get_mut(&rloc) {
                    cache.state = state;
                }
            }
        }
    }

    fn bump_cache(&mut self, ty: u8, rloc: u16) {
        match ty {
            diag_types::CHILD => {
                if let Some(cache) = self.child_tables.get_mut(&rloc) {
                    cache.state = RequestState::Waiting;
                    cache.retries += 1;
                }
            }
            diag_types::CHILD_IP6_ADDR_LIST => {
                if let Some(cache) = self.child_ips.get_mut(&rloc) {
                    cache.state = RequestState::Waiting;
                    cache.retries += 1;
                }
            }
            _ => {
                if let Some(cache) = self.router_neighbors.get_mut(&rloc) {
                    cache.state = RequestState::Waiting;
                    cache.retries += 1;
                }
            }
        }
    }

    /// Child table query outcome for the router it was sent to.
    pub fn handle_child_table_result(
        &mut self,
        result: Result<Vec<MeshDiagChildEntry>>,
        now: Instant,
    ) {
        let rloc = self.query_rloc;
        let Some(cache) = self.child_tables.get_mut(&rloc) else {
            return;
        };
        if cache.state != RequestState::Pending {
            return;
        }
        match result {
            Ok(entries) => {
                cache.entries.extend(entries);
                cache.update_time = Some(now);
                cache.state = RequestState::Done;
            }
            Err(Error::ResponseTimeout) => {
                // retried later based on the stale timestamp
                cache.state = RequestState::Done;
            }
            Err(_) => {}
        }
    }

    /// Children IPv6 address query outcome.
    pub fn handle_child_ip6_addrs_result(
        &mut self,
        result: Result<Vec<ChildIp6AddrList>>,
        now: Instant,
    ) {
        let rloc = self.query_rloc;
        let Some(cache) = self.child_ips.get_mut(&rloc) else {
            return;
        };
        if cache.state != RequestState::Pending {
            return;
        }
        match result {
            Ok(entries) => {
                cache.entries.extend(entries);
                cache.update_time = Some(now);
                cache.state = RequestState::Done;
            }
            Err(Error::ResponseTimeout) => {
                cache.state = RequestState::Done;
            }
            Err(_) => {}
        }
    }

    /// Router neighbor query outcome.
    pub fn handle_router_neighbors_result(
        &mut self,
        result: Result<Vec<MeshDiagRouterNeighborEntry>>,
        now: Instant,
    ) {
        let rloc = self.query_rloc;
        let Some(cache) = self.router_neighbors.get_mut(&rloc) else {
            return;
        };
        if cache.state != RequestState::Pending {
            return;
        }
        match result {
            Ok(entries) => {
                cache.entries.extend(entries);
                cache.update_time = Some(now);
                cache.state = RequestState::Done;
            }
            Err(Error::ResponseTimeout) => {
                cache.state = RequestState::Done;
            }
            Err(_) => {}
        }
    }

    // An FTD child without a diag response is a REED; it only answers
    // unicast.
    fn find_unknown_reed(&self) -> Option<u16> {
        for cache in self.child_tables.values() {
            for child in &cache.entries {
                if child.device_type_ftd && !self.diag_set.contains_key(&child.rloc16) {
                    return Some(child.rloc16);
                }
            }
        }
        None
    }

    fn fill_device_collection(&self, ot: &mut dyn ThreadApi, devices: &mut Collection<Device>) {
        for (&rloc, info) in &self.diag_set {
            if info.content.is_empty() {
                warn!(rloc16 = format_args!("0x{rloc:04x}"), "no diagnostic response");
                continue;
            }

            let mut device_info = DeviceInfo {
                needs_update: true,
                update_time: info.start_time,
                ..DeviceInfo::default()
            };
            let mut ext_addr = None;

            for tlv in &info.content {
                match (tlv.ty, &tlv.value) {
                    (diag_types::EXT_ADDRESS, DiagValue::ExtAddress(addr)) => {
                        ext_addr = Some(*addr);
                        device_info.ext_address = *addr;
                    }
                    (diag_types::SHORT_ADDRESS, DiagValue::U16(addr16)) => {
                        if rloc16_is_router(*addr16) {
                            device_info.role = Some("router".to_string());
                            device_info.mode = Mode {
                                rx_on_when_idle: true,
                                device_type_ftd: true,
                                full_network_data: true,
                            };
                            device_info.needs_update = false;
                            self.collect_children(ot, devices, *addr16);
                        } else {
                            device_info.role = Some("child".to_string());
                        }
                    }
                    (diag_types::EUI64, DiagValue::Eui64(eui64)) => {
                        device_info.eui64 = *eui64;
                    }
                    (diag_types::IP6_ADDR_LIST, DiagValue::Ip6AddrList(addrs)) => {
                        let prefix = ot.mesh_local_prefix();
                        for addr in addrs {
                            filter_ipv6(&mut device_info, addr, &prefix);
                        }
                        lookup_host_name(ot, &mut device_info);
                    }
                    _ => {}
                }
            }

            match ext_addr {
                Some(addr) => self.set_device_item_attributes(ot, devices, addr, device_info),
                None => warn!(rloc16 = format_args!("0x{rloc:04x}"), "response without extAddress"),
            }
        }
    }

    // Children are known from the parent's tables, not from their own
    // responses.
    fn collect_children(
        &self,
        ot: &mut dyn ThreadApi,
        devices: &mut Collection<Device>,
        parent_rloc: u16,
    ) {
        let Some(child_table) = self.child_tables.get(&parent_rloc) else {
            warn!(rloc16 = format_args!("0x{parent_rloc:04x}"), "parent rloc not found");
            return;
        };

        for child in &child_table.entries {
            let mut device_info = DeviceInfo {
                ext_address: child.ext_address,
                role: Some("child".to_string()),
                mode: child.mode(),
                needs_update: true,
                update_time: self.diag_set.get(&parent_rloc).and_then(|d| d.start_time),
                ..DeviceInfo::default()
            };

            if let Some(ip_cache) = self.child_ips.get(&parent_rloc) {
                if let Some(list) = ip_cache
                    .entries
                    .iter()
                    .find(|list| list.rloc16 == child.rloc16)
                {
                    let prefix = ot.mesh_local_prefix();
                    for addr in &list.addresses {
                        filter_ipv6(&mut device_info, addr, &prefix);
                    }
                    lookup_host_name(ot, &mut device_info);
                }
            }

            if child.ext_address.is_zero() {
                warn!("child entry without extAddress");
                continue;
            }
            self.set_device_item_attributes(ot, devices, child.ext_address, device_info);
        }
    }

    fn set_device_item_attributes(
        &self,
        ot: &mut dyn ThreadApi,
        devices: &mut Collection<Device>,
        ext_addr: ExtAddress,
        mut device_info: DeviceInfo,
    ) {
        let id = ext_addr.to_string();
        let is_this_node = ext_addr == ot.ext_address();

        match devices.get_mut(&id) {
            None => {
                device_info.needs_update = !device_info.is_complete();
                if device_info.needs_update {
                    debug!(device = %id, "device entry missing attributes");
                }

                let node_info = if is_this_node {
                    device_info.eui64 = ot.eui64();
                    Some(build_node_info(ot))
                } else {
                    None
                };
                devices.insert(
                    &id,
                    Device {
                        device_info,
                        node_info,
                    },
                );
            }
            Some(item) => {
                if is_this_node {
                    item.node_info = Some(build_node_info(ot));
                }
                if !device_info.eui64.is_zero() {
                    item.device_info.eui64 = device_info.eui64;
                }
                if let Some(omr) = device_info.omr_address {
                    item.device_info.omr_address = Some(omr);
                }
                if !device_info.ml_eid_iid.is_zero() {
                    item.device_info.ml_eid_iid = device_info.ml_eid_iid;
                }
                if let Some(host_name) = device_info.host_name {
                    item.device_info.host_name = Some(host_name);
                }
                if device_info.role.is_some() {
                    item.device_info.role = device_info.role;
                }
                if device_info.mode != item.device_info.mode {
                    item.device_info.mode = device_info.mode;
                }
                item.device_info.needs_update = !item.device_info.is_complete();
                item.device_info.update_time = device_info.update_time;
            }
        }
    }

    fn fill_diagnostic_collection(
        &mut self,
        ot: &mut dyn ThreadApi,
        diagnostics: &mut Collection<DiagnosticRecord>,
        ext_addr: &ExtAddress,
    ) {
        if self.diag_set.is_empty() {
            warn!("diag set is empty");
        }

        for (&rloc, info) in &self.diag_set {
            if info.content.is_empty() {
                warn!(rloc16 = format_args!("0x{rloc:04x}"), "no diagnostic response");
                continue;
            }

            // keep request and response 1-1: only the requested device.
            // Destinations given as an RLOC16 carry no extended address;
            // source verification already narrowed the set to the target.
            if !ext_addr.is_zero() {
                let matches = info.content.iter().any(|tlv| {
                    matches!(&tlv.value, DiagValue::ExtAddress(addr)
                        if tlv.ty == diag_types::EXT_ADDRESS && addr == ext_addr)
                });
                if !matches {
                    continue;
                }
            }

            let mut record = NetworkDiagnostics::default();

            for tlv in &info.content {
                match (tlv.ty, &tlv.value) {
                    (diag_types::EXT_ADDRESS, DiagValue::ExtAddress(addr)) => {
                        if *addr == ot.ext_address() {
                            record.br_counters = ot.border_routing_counters();
                        }
                    }
                    (diag_types::SHORT_ADDRESS, DiagValue::U16(addr16)) => {
                        self.set_diag_query_tlvs(&mut record, *addr16);
                    }
                    (diag_types::IP6_ADDR_LIST, DiagValue::Ip6AddrList(addrs)) => {
                        record.service_flags = Some(service_role_flags(ot, addrs));
                    }
                    _ => {}
                }
                if self.req_tlvs.contains(&tlv.ty) {
                    record.tlvs.push(tlv.clone());
                }
            }

            let uuid = uuid::Uuid::new_v4().to_string();
            if !self.result_uuids.is_empty() {
                self.result_uuids.push(',');
            }
            self.result_uuids.push_str(&uuid);
            diagnostics.insert(&uuid, DiagnosticRecord::Network(record));
        }
    }

    fn set_diag_query_tlvs(&self, record: &mut NetworkDiagnostics, parent_rloc: u16) {
        if !rloc16_is_router(parent_rloc) {
            return;
        }
        if self.query_tlvs.contains(&diag_types::CHILD) {
            if let Some(cache) = self.child_tables.get(&parent_rloc) {
                record.children = cache.entries.clone();
            }
        }
        if self.query_tlvs.contains(&diag_types::CHILD_IP6_ADDR_LIST) {
            if let Some(cache) = self.child_ips.get(&parent_rloc) {
                record.children_ip6_addrs = cache.entries.clone();
            }
        }
        if self.query_tlvs.contains(&diag_types::ROUTER_NEIGHBOR) {
            if let Some(cache) = self.router_neighbors.get(&parent_rloc) {
                record.neighbors = cache.entries.clone();
            }
        }
    }

    pub fn router_count(ot: &dyn ThreadApi) -> u8 {
        Self::router_rlocs(ot).len() as u8
    }
}

fn retry_backoff(retries: u8) -> Duration {
    let factor = 1u32 << retries.min(16);
    (DIAG_RETRY_DELAY * factor).min(DIAG_RETRY_DELAY_UPPER_LIMIT)
}

/// Classifies one registered address: extracts the mesh-local EID's IID
/// and the off-mesh-routable address, skipping RLOCs/ALOCs, link-local
/// and multicast addresses.
fn filter_ipv6(device_info: &mut DeviceInfo, addr: &Ipv6Addr, ml_prefix: &[u8; 8]) {
    let segments = addr.segments();

    // rloc and aloc iid is 0000:00ff:fe00:xxxx
    if segments[4] == 0 && segments[5] == 0x00ff && segments[6] == 0xfe00 {
        return;
    }

    if addr.octets()[..8] == *ml_prefix {
        let mut iid = [0u8; 8];
        iid.copy_from_slice(&addr.octets()[8..]);
        device_info.ml_eid_iid = ExtAddress(iid);
    } else if segments[0] != 0xfe80 && !(0xff00..=0xff0f).contains(&segments[0]) {
        device_info.omr_address = Some(*addr);
    }
}

fn lookup_host_name(ot: &dyn ThreadApi, device_info: &mut DeviceInfo) {
    let Some(omr) = device_info.omr_address else {
        return;
    };
    if let Some(host_name) = ot.srp_host_name(&omr) {
        // strip the domain
        let short = host_name.split('.').next().unwrap_or(&host_name);
        device_info.host_name = Some(short.to_string());
    }
}

fn build_node_info(ot: &dyn ThreadApi) -> NodeInfo {
    let role = ot.device_role();
    let attached = role.is_attached();
    NodeInfo {
        role: role.as_str().to_string(),
        num_of_router: NetworkDiagHandler::router_count(ot),
        rloc16: if attached { ot.rloc16() } else { 0 },
        ext_address: ot.ext_address(),
        network_name: if attached { ot.network_name() } else { String::new() },
        rloc_address: attached.then(|| rloc_address(&ot.mesh_local_prefix(), ot.rloc16())),
        leader_data: ot.leader_data().ok(),
    }
}

/// Derives role flags from a device's registered ALOCs and network data.
fn service_role_flags(ot: &dyn ThreadApi, addrs: &[Ipv6Addr]) -> ServiceRoleFlags {
    let mut flags = ServiceRoleFlags::default();
    let mut rloc16 = None;

    for addr in addrs {
        let segments = addr.segments();
        if segments[4] == 0 && segments[5] == 0x00ff && segments[6] == 0xfe00 {
            let locator = segments[7];
            if locator < 0xfc00 {
                rloc16 = Some(locator);
            }
            flags.is_leader |= locator == 0xfc00;
            flags.is_primary_bbr |= locator == 0xfc38;
            flags.hosts_service |= (0xfc10..=0xfc2f).contains(&locator);
        }
    }

    if let Some(rloc16) = rloc16 {
        flags.is_border_router = ot.is_border_router(rloc16);
    }
    flags
}
