//! Bounded, id-keyed result collections and the records stored in them.
//!
//! Discovery fills the devices collection, keyed by extended address.
//! Per-device diagnostics and energy scans append records to the
//! diagnostics collection, keyed by a fresh UUID. Both collections evict
//! their oldest entry once full.

use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::manager::EnergyScanReport;
use crate::ot::{
    BorderRoutingCounters, ChildIp6AddrList, DiagTlv, ExtAddress, LeaderData,
    MeshDiagChildEntry, MeshDiagRouterNeighborEntry, Mode,
};

pub const MAX_DEVICES_COLLECTION_ITEMS: usize = 200;
pub const MAX_DIAGNOSTICS_COLLECTION_ITEMS: usize = 200;

/// What discovery learned about one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub ext_address: ExtAddress,
    /// Interface identifier of the mesh-local EID
    pub ml_eid_iid: ExtAddress,
    pub eui64: ExtAddress,
    /// Off-mesh-routable address, when one is registered
    pub omr_address: Option<Ipv6Addr>,
    pub host_name: Option<String>,
    pub role: Option<String>,
    pub mode: Mode,
    /// Set while some attribute is still missing
    pub needs_update: bool,
    pub update_time: Option<Instant>,
}

impl DeviceInfo {
    pub fn is_complete(&self) -> bool {
        self.role.as_deref().is_some_and(|role| !role.is_empty())
            && !self.ml_eid_iid.is_zero()
            && !self.eui64.is_zero()
            && self.omr_address.is_some()
    }
}

/// Extra attributes kept for the device this process runs on.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub role: String,
    pub num_of_router: u8,
    pub rloc16: u16,
    pub ext_address: ExtAddress,
    pub network_name: String,
    pub rloc_address: Option<Ipv6Addr>,
    pub leader_data: Option<LeaderData>,
}

/// One entry of the devices collection.
#[derive(Debug, Clone, Default)]
pub struct Device {
    pub device_info: DeviceInfo,
    /// Present only on the entry describing this border router
    pub node_info: Option<NodeInfo>,
}

/// Network-role flags derived from a device's registered ALOCs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceRoleFlags {
    pub is_leader: bool,
    pub is_primary_bbr: bool,
    pub hosts_service: bool,
    pub is_border_router: bool,
}

/// Diagnostic results for a single device.
#[derive(Debug, Clone, Default)]
pub struct NetworkDiagnostics {
    pub tlvs: Vec<DiagTlv>,
    pub children: Vec<MeshDiagChildEntry>,
    pub children_ip6_addrs: Vec<ChildIp6AddrList>,
    pub neighbors: Vec<MeshDiagRouterNeighborEntry>,
    pub service_flags: Option<ServiceRoleFlags>,
    /// Local border routing counters, only for this node
    pub br_counters: Option<BorderRoutingCounters>,
}

/// One entry of the diagnostics collection.
#[derive(Debug, Clone)]
pub enum DiagnosticRecord {
    Network(NetworkDiagnostics),
    EnergyScan(EnergyScanReport),
}

/// Id-keyed collection with a size cap and oldest-first eviction.
pub struct Collection<T> {
    name: &'static str,
    max_size: usize,
    items: FxHashMap<String, T>,
    age_order: VecDeque<String>,
}

impl<T> Collection<T> {
    pub fn new(name: &'static str, max_size: usize) -> Self {
        Self {
            name,
            max_size,
            items: FxHashMap::default(),
            age_order: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Inserts or replaces the item under `id`, evicting the oldest
    /// entries if the collection is full.
    pub fn insert(&mut self, id: &str, item: T) {
        if !self.items.contains_key(id) {
            while self.items.len() >= self.max_size {
                if let Some(oldest) = self.age_order.pop_front() {
                    debug!(collection = self.name, id = %oldest, "evicting oldest item");
                    self.items.remove(&oldest);
                } else {
                    break;
                }
            }
            self.age_order.push_back(id.to_string());
        }
        self.items.insert(id.to_string(), item);
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.items.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.age_order.retain(|key| key != id);
        self.items.remove(id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.age_order.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.items.iter()
    }

    /// Ids from oldest to newest.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.age_order.iter()
    }
}
