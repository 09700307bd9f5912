use std::net::Ipv6Addr;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::ot::{
    CommissionerState, DeviceRole, ExtAddress, JoinerId, LeaderData, RouterInfo, ThreadApi,
};
use crate::{Error, Result};

pub const MESH_LOCAL_PREFIX: [u8; 8] = [0xfd, 0x11, 0x11, 0x11, 0x11, 0x22, 0x00, 0x00];

/// Routes tracing output of one test to the test harness, filtered by
/// `RUST_LOG`.
pub fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(sub)
}

/// In-memory stand-in for the co-located Thread stack.
///
/// Records every call so scenarios can assert what was sent, and exposes
/// the node attributes as plain fields for shaping a scenario.
pub struct MockThread {
    pub commissioner_started: bool,
    pub commissioner_stopped: bool,
    pub commissioner_state: CommissionerState,
    pub joiners_added: Vec<(JoinerId, String, Duration)>,
    pub joiners_removed: Vec<JoinerId>,
    pub scans: Vec<(u32, u8, u16, u16, Ipv6Addr)>,
    pub diag_gets: Vec<(Ipv6Addr, Vec<u8>)>,
    pub diag_resets: Vec<(Ipv6Addr, Vec<u8>)>,
    pub queries: Vec<(&'static str, u16)>,
    /// RLOC16s of currently allocated routers
    pub routers: Vec<u16>,
    pub role: DeviceRole,
    pub rloc16: u16,
    pub ext_address: ExtAddress,
    pub eui64: ExtAddress,
    pub network_name: String,
    pub srp_hosts: FxHashMap<Ipv6Addr, String>,
    pub border_routers: Vec<u16>,
    pub fail_queries: bool,
    pub fail_diag_gets: bool,
}

impl MockThread {
    pub fn new() -> Self {
        Self {
            commissioner_started: false,
            commissioner_stopped: false,
            commissioner_state: CommissionerState::Disabled,
            joiners_added: Vec::new(),
            joiners_removed: Vec::new(),
            scans: Vec::new(),
            diag_gets: Vec::new(),
            diag_resets: Vec::new(),
            queries: Vec::new(),
            routers: vec![0x6c00],
            role: DeviceRole::Leader,
            rloc16: 0x6c00,
            ext_address: ExtAddress([0x11; 8]),
            eui64: ExtAddress([0x22; 8]),
            network_name: "OpenThread-demo".to_string(),
            srp_hosts: FxHashMap::default(),
            border_routers: Vec::new(),
            fail_queries: false,
            fail_diag_gets: false,
        }
    }
}

impl ThreadApi for MockThread {
    fn commissioner_start(&mut self) -> Result<()> {
        self.commissioner_started = true;
        self.commissioner_state = CommissionerState::Petitioning;
        Ok(())
    }

    fn commissioner_stop(&mut self) -> Result<()> {
        self.commissioner_stopped = true;
        self.commissioner_state = CommissionerState::Disabled;
        Ok(())
    }

    fn commissioner_state(&self) -> CommissionerState {
        self.commissioner_state
    }

    fn commissioner_add_joiner(
        &mut self,
        joiner: &JoinerId,
        pskd: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.joiners_added.push((*joiner, pskd.to_string(), timeout));
        Ok(())
    }

    fn commissioner_remove_joiner(&mut self, joiner: &JoinerId) -> Result<()> {
        self.joiners_removed.push(*joiner);
        Ok(())
    }

    fn commissioner_energy_scan(
        &mut self,
        channel_mask: u32,
        count: u8,
        period: u16,
        scan_duration: u16,
        dest: &Ipv6Addr,
    ) -> Result<()> {
        self.scans
            .push((channel_mask, count, period, scan_duration, *dest));
        Ok(())
    }

    fn send_diagnostic_get(&mut self, dest: &Ipv6Addr, tlv_types: &[u8]) -> Result<()> {
        if self.fail_diag_gets {
            return Err(Error::NoBufs);
        }
        self.diag_gets.push((*dest, tlv_types.to_vec()));
        Ok(())
    }

    fn send_diagnostic_reset(&mut self, dest: &Ipv6Addr, tlv_types: &[u8]) -> Result<()> {
        self.diag_resets.push((*dest, tlv_types.to_vec()));
        Ok(())
    }

    fn mesh_diag_query_child_table(&mut self, rloc16: u16) -> Result<()> {
        if self.fail_queries {
            return Err(Error::Busy);
        }
        self.queries.push(("childTable", rloc16));
        Ok(())
    }

    fn mesh_diag_query_child_ip6_addrs(&mut self, rloc16: u16) -> Result<()> {
        if self.fail_queries {
            return Err(Error::Busy);
        }
        self.queries.push(("childIp6Addrs", rloc16));
        Ok(())
    }

    fn mesh_diag_query_router_neighbor_table(&mut self, rloc16: u16) -> Result<()> {
        if self.fail_queries {
            return Err(Error::Busy);
        }
        self.queries.push(("routerNeighbors", rloc16));
        Ok(())
    }

    fn device_role(&self) -> DeviceRole {
        self.role
    }

    fn rloc16(&self) -> u16 {
        self.rloc16
    }

    fn ext_address(&self) -> ExtAddress {
        self.ext_address
    }

    fn eui64(&self) -> ExtAddress {
        self.eui64
    }

    fn mesh_local_prefix(&self) -> [u8; 8] {
        MESH_LOCAL_PREFIX
    }

    fn mesh_local_eid(&self) -> Option<Ipv6Addr> {
        let mut octets = [0u8; 16];
        octets[..8].copy_from_slice(&MESH_LOCAL_PREFIX);
        octets[8..].copy_from_slice(&self.ext_address.0);
        Some(Ipv6Addr::from(octets))
    }

    fn leader_data(&self) -> Result<LeaderData> {
        Ok(LeaderData {
            partition_id: 0x0102_0304,
            weighting: 64,
            data_version: 10,
            stable_data_version: 10,
            leader_router_id: 27,
        })
    }

    fn router_info(&self, rloc16: u16) -> Result<RouterInfo> {
        if !self.routers.contains(&rloc16) {
            return Err(Error::NotFound);
        }
        Ok(RouterInfo {
            rloc16,
            router_id: crate::ot::router_id(rloc16),
            ext_address: self.ext_address,
            link_established: true,
        })
    }

    fn network_name(&self) -> String {
        self.network_name.clone()
    }

    fn srp_host_name(&self, addr: &Ipv6Addr) -> Option<String> {
        self.srp_hosts.get(addr).cloned()
    }

    fn is_border_router(&self, rloc16: u16) -> bool {
        self.border_routers.contains(&rloc16)
    }
}
