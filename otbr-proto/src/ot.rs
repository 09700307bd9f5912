//! Value types and the [`ThreadApi`] seam over the co-located Thread stack.
//!
//! Everything in this crate drives the radio-side stack through this trait.
//! Drivers implement it over their FFI layer; tests implement it in memory.
//! Completion callbacks from the stack do not appear here: the driver
//! forwards them to the owning state machine's `handle_*` methods instead.

use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use crate::{Error, Result};

/// Largest router ID a partition can allocate.
pub const MAX_ROUTER_ID: u8 = 62;

/// IEEE 802.15.4 extended address, also used for EUI-64 and joiner IDs.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ExtAddress(pub [u8; 8]);

impl ExtAddress {
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }

    /// Parses 16 hex digits, with or without separators.
    pub fn parse(s: &str) -> Result<Self> {
        let digits: Vec<u8> = s
            .bytes()
            .filter(|b| !matches!(b, b':' | b'-'))
            .collect();
        if digits.len() != 16 {
            return Err(Error::InvalidArgs);
        }
        let mut out = [0u8; 8];
        for (i, pair) in digits.chunks(2).enumerate() {
            let hi = (pair[0] as char).to_digit(16).ok_or(Error::InvalidArgs)?;
            let lo = (pair[1] as char).to_digit(16).ok_or(Error::InvalidArgs)?;
            out[i] = (hi as u8) << 4 | lo as u8;
        }
        Ok(Self(out))
    }
}

impl fmt::Display for ExtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// True for a router's own RLOC16 (child index bits clear).
pub fn rloc16_is_router(rloc16: u16) -> bool {
    rloc16 & 0x1ff == 0
}

pub fn router_id(rloc16: u16) -> u8 {
    (rloc16 >> 10) as u8
}

pub fn rloc16_from_router_id(router_id: u8) -> u16 {
    (router_id as u16) << 10
}

/// Joiner Discerner: up to 64 bits of a joiner's advertised identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoinerDiscerner {
    pub value: u64,
    /// Bit length, 1..=64
    pub length: u8,
}

impl fmt::Display for JoinerDiscerner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/0x{:x}", self.length, self.value)
    }
}

/// The identity a joiner entry is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinerId {
    Eui64(ExtAddress),
    Discerner(JoinerDiscerner),
    /// Wildcard entry admitting any joiner
    Any,
}

/// Local commissioner role as reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionerState {
    Disabled,
    Petitioning,
    Active,
}

/// Joiner lifecycle events reported by the stack while the local
/// commissioner is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerEvent {
    Start,
    Connected,
    Finalize,
    End,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Disabled => "disabled",
            DeviceRole::Detached => "detached",
            DeviceRole::Child => "child",
            DeviceRole::Router => "router",
            DeviceRole::Leader => "leader",
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, DeviceRole::Child | DeviceRole::Router | DeviceRole::Leader)
    }
}

/// MLE device mode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mode {
    pub rx_on_when_idle: bool,
    pub device_type_ftd: bool,
    pub full_network_data: bool,
}

impl Mode {
    /// Decodes the Mode TLV byte.
    pub fn from_tlv_byte(byte: u8) -> Self {
        Self {
            rx_on_when_idle: byte & 0x08 != 0,
            device_type_ftd: byte & 0x02 != 0,
            full_network_data: byte & 0x01 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaderData {
    pub partition_id: u32,
    pub weighting: u8,
    pub data_version: u8,
    pub stable_data_version: u8,
    pub leader_router_id: u8,
}

/// One row of a router's child table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshDiagChildEntry {
    pub rloc16: u16,
    pub ext_address: ExtAddress,
    pub device_type_ftd: bool,
    pub rx_on_when_idle: bool,
    pub full_net_data: bool,
}

impl MeshDiagChildEntry {
    pub fn mode(&self) -> Mode {
        Mode {
            rx_on_when_idle: self.rx_on_when_idle,
            device_type_ftd: self.device_type_ftd,
            full_network_data: self.full_net_data,
        }
    }
}

/// One row of a router's neighboring-router table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshDiagRouterNeighborEntry {
    pub rloc16: u16,
    pub ext_address: ExtAddress,
}

/// IPv6 addresses registered by one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildIp6AddrList {
    pub rloc16: u16,
    pub addresses: Vec<Ipv6Addr>,
}

/// Router table entry for an allocated router ID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterInfo {
    pub rloc16: u16,
    pub router_id: u8,
    pub ext_address: ExtAddress,
    pub link_established: bool,
}

/// Counters kept by the border routing module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorderRoutingCounters {
    pub ra_rx: u32,
    pub ra_tx_success: u32,
    pub ra_tx_failure: u32,
    pub rs_rx: u32,
}

/// One network diagnostic TLV, already lifted off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagTlv {
    /// Diagnostic TLV type id, see [`crate::diag_types`]
    pub ty: u8,
    pub value: DiagValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagValue {
    ExtAddress(ExtAddress),
    U16(u16),
    U32(u32),
    Mode(Mode),
    LeaderData(LeaderData),
    Ip6AddrList(Vec<Ipv6Addr>),
    Eui64(ExtAddress),
    Bytes(Vec<u8>),
}

/// Operations this crate needs from the co-located Thread stack.
///
/// Methods that start an asynchronous stack operation return as soon as the
/// operation is queued; outcomes arrive later through the driver as calls
/// into the owning state machine.
pub trait ThreadApi {
    // Commissioner role

    fn commissioner_start(&mut self) -> Result<()>;
    fn commissioner_stop(&mut self) -> Result<()>;
    fn commissioner_state(&self) -> CommissionerState;
    fn commissioner_add_joiner(
        &mut self,
        joiner: &JoinerId,
        pskd: &str,
        timeout: Duration,
    ) -> Result<()>;
    fn commissioner_remove_joiner(&mut self, joiner: &JoinerId) -> Result<()>;
    fn commissioner_energy_scan(
        &mut self,
        channel_mask: u32,
        count: u8,
        period: u16,
        scan_duration: u16,
        dest: &Ipv6Addr,
    ) -> Result<()>;

    // Network diagnostics

    fn send_diagnostic_get(&mut self, dest: &Ipv6Addr, tlv_types: &[u8]) -> Result<()>;
    fn send_diagnostic_reset(&mut self, dest: &Ipv6Addr, tlv_types: &[u8]) -> Result<()>;
    fn mesh_diag_query_child_table(&mut self, rloc16: u16) -> Result<()>;
    fn mesh_diag_query_child_ip6_addrs(&mut self, rloc16: u16) -> Result<()>;
    fn mesh_diag_query_router_neighbor_table(&mut self, rloc16: u16) -> Result<()>;
    fn mesh_diag_cancel(&mut self) {}

    // Local node

    fn device_role(&self) -> DeviceRole;
    fn rloc16(&self) -> u16;
    fn ext_address(&self) -> ExtAddress;
    fn eui64(&self) -> ExtAddress;
    fn mesh_local_prefix(&self) -> [u8; 8];
    fn mesh_local_eid(&self) -> Option<Ipv6Addr>;
    fn leader_data(&self) -> Result<LeaderData>;
    /// Router table entry for `rloc16`, `Err(NotFound)` while unallocated.
    fn router_info(&self, rloc16: u16) -> Result<RouterInfo>;
    fn network_name(&self) -> String {
        String::new()
    }
    fn max_router_id(&self) -> u8 {
        MAX_ROUTER_ID
    }

    /// Realm-local all-Thread-nodes multicast group.
    fn realm_local_all_thread_nodes(&self) -> Ipv6Addr {
        Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 2)
    }

    /// Hostname registered via SRP for `addr`, when known.
    fn srp_host_name(&self, _addr: &Ipv6Addr) -> Option<String> {
        None
    }

    /// Whether network data lists `rloc16` as a border router.
    fn is_border_router(&self, _rloc16: u16) -> bool {
        false
    }

    fn border_routing_counters(&self) -> Option<BorderRoutingCounters> {
        None
    }
}

/// Builds the RLOC (or ALOC) address for `rloc16` under `prefix`.
pub fn rloc_address(prefix: &[u8; 8], rloc16: u16) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[..8].copy_from_slice(prefix);
    octets[8..14].copy_from_slice(&[0x00, 0x00, 0x00, 0xff, 0xfe, 0x00]);
    octets[14..].copy_from_slice(&rloc16.to_be_bytes());
    Ipv6Addr::from(octets)
}
