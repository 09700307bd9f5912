//! Network diagnostic TLV type registry.
//!
//! Maps TLV type ids to their JSON keys and classifies each type: whether
//! it travels in `DIAG_GET` responses or needs a separate mesh-diag query,
//! whether a device may legitimately omit it, and whether `DIAG_RST` can
//! clear it.

use crate::{Error, Result};

/// Total number of recognized types.
pub const MAX_TOTAL_COUNT: usize = 26;
/// Number of types that need a mesh-diag query instead of `DIAG_GET`.
pub const MAX_QUERY_COUNT: usize = 3;
/// Number of resettable types.
pub const MAX_RESETTABLE_COUNT: usize = 2;

pub const EXT_ADDRESS: u8 = 0;
pub const SHORT_ADDRESS: u8 = 1;
pub const MODE: u8 = 2;
pub const TIMEOUT: u8 = 3;
pub const CONNECTIVITY: u8 = 4;
pub const ROUTE: u8 = 5;
pub const LEADER_DATA: u8 = 6;
pub const NETWORK_DATA: u8 = 7;
pub const IP6_ADDR_LIST: u8 = 8;
pub const MAC_COUNTERS: u8 = 9;
pub const BATTERY_LEVEL: u8 = 14;
pub const SUPPLY_VOLTAGE: u8 = 15;
pub const CHILD_TABLE: u8 = 16;
pub const CHANNEL_PAGES: u8 = 17;
pub const MAX_CHILD_TIMEOUT: u8 = 19;
pub const LDEVID_SUBJECT: u8 = 20;
pub const IDEVID_CERT: u8 = 21;
pub const EUI64: u8 = 23;
pub const VERSION: u8 = 24;
pub const VENDOR_NAME: u8 = 25;
pub const VENDOR_MODEL: u8 = 26;
pub const VENDOR_SW_VERSION: u8 = 27;
pub const THREAD_STACK_VERSION: u8 = 28;
pub const CHILD: u8 = 29;
pub const CHILD_IP6_ADDR_LIST: u8 = 30;
pub const ROUTER_NEIGHBOR: u8 = 31;
pub const MLE_COUNTERS: u8 = 34;

const CAN_RESET: u32 = 1;
const QUERY: u32 = 1 << 1;
const OMITTABLE: u32 = 1 << 2;

struct TypeInfo {
    json_key: &'static str,
    properties: u32,
}

const TYPE_INFOS: [Option<TypeInfo>; 35] = [
    Some(TypeInfo { json_key: "extAddress", properties: 0 }),
    Some(TypeInfo { json_key: "rloc16", properties: 0 }),
    Some(TypeInfo { json_key: "mode", properties: 0 }),
    Some(TypeInfo { json_key: "timeout", properties: OMITTABLE }),
    Some(TypeInfo { json_key: "connectivity", properties: 0 }),
    Some(TypeInfo { json_key: "route", properties: 0 }),
    Some(TypeInfo { json_key: "leaderData", properties: 0 }),
    Some(TypeInfo { json_key: "networkData", properties: 0 }),
    Some(TypeInfo { json_key: "ipv6Addresses", properties: 0 }),
    Some(TypeInfo { json_key: "macCounters", properties: CAN_RESET }),
    None,
    None,
    None,
    None,
    Some(TypeInfo { json_key: "batteryLevel", properties: OMITTABLE }),
    Some(TypeInfo { json_key: "supplyVoltage", properties: OMITTABLE }),
    Some(TypeInfo { json_key: "childTable", properties: 0 }),
    Some(TypeInfo { json_key: "channelPages", properties: 0 }),
    None,
    Some(TypeInfo { json_key: "maxChildTimeout", properties: OMITTABLE }),
    Some(TypeInfo { json_key: "lDevIdSubject", properties: 0 }),
    Some(TypeInfo { json_key: "iDevIdCert", properties: 0 }),
    None,
    Some(TypeInfo { json_key: "eui64", properties: 0 }),
    Some(TypeInfo { json_key: "version", properties: 0 }),
    Some(TypeInfo { json_key: "vendorName", properties: 0 }),
    Some(TypeInfo { json_key: "vendorModel", properties: 0 }),
    Some(TypeInfo { json_key: "vendorSwVersion", properties: 0 }),
    Some(TypeInfo { json_key: "threadStackVersion", properties: 0 }),
    Some(TypeInfo { json_key: "children", properties: QUERY }),
    Some(TypeInfo { json_key: "childIpv6Addresses", properties: QUERY }),
    Some(TypeInfo { json_key: "routerNeighbors", properties: QUERY }),
    None,
    None,
    Some(TypeInfo { json_key: "mleCounters", properties: CAN_RESET }),
];

fn info(type_id: u8) -> Option<&'static TypeInfo> {
    TYPE_INFOS.get(type_id as usize).and_then(|slot| slot.as_ref())
}

/// JSON key for a recognized type id.
pub fn json_key(type_id: u8) -> Option<&'static str> {
    info(type_id).map(|info| info.json_key)
}

/// True for types that are collected with a mesh-diag query.
pub fn requires_query(type_id: u8) -> bool {
    info(type_id).is_some_and(|info| info.properties & QUERY != 0)
}

/// True for counter types that `DIAG_RST` can clear.
pub fn can_reset(type_id: u8) -> bool {
    info(type_id).is_some_and(|info| info.properties & CAN_RESET != 0)
}

/// True for types a device may omit from its response.
pub fn omittable(type_id: u8) -> bool {
    info(type_id).is_some_and(|info| info.properties & OMITTABLE != 0)
}

/// Resolves a JSON key back to its type id.
pub fn find_id(json_key_str: &str) -> Result<u8> {
    TYPE_INFOS
        .iter()
        .position(|slot| slot.as_ref().is_some_and(|info| info.json_key == json_key_str))
        .map(|id| id as u8)
        .ok_or(Error::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_counts() {
        let recognized = (0..TYPE_INFOS.len() as u8).filter(|&id| json_key(id).is_some());
        assert_eq!(recognized.count(), MAX_TOTAL_COUNT);
        let query = (0..TYPE_INFOS.len() as u8).filter(|&id| requires_query(id));
        assert_eq!(query.count(), MAX_QUERY_COUNT);
        let resettable = (0..TYPE_INFOS.len() as u8).filter(|&id| can_reset(id));
        assert_eq!(resettable.count(), MAX_RESETTABLE_COUNT);
    }

    #[test]
    fn key_lookup_round_trips() {
        assert_eq!(find_id("extAddress").unwrap(), EXT_ADDRESS);
        assert_eq!(find_id("children").unwrap(), CHILD);
        assert_eq!(find_id("mleCounters").unwrap(), MLE_COUNTERS);
        assert_eq!(json_key(ROUTER_NEIGHBOR), Some("routerNeighbors"));
        assert_eq!(find_id("noSuchKey"), Err(Error::NotFound));
        assert_eq!(json_key(10), None);
    }

    #[test]
    fn classification() {
        assert!(omittable(TIMEOUT));
        assert!(omittable(BATTERY_LEVEL));
        assert!(omittable(SUPPLY_VOLTAGE));
        assert!(omittable(MAX_CHILD_TIMEOUT));
        assert!(!omittable(EXT_ADDRESS));

        assert!(requires_query(CHILD));
        assert!(requires_query(CHILD_IP6_ADDR_LIST));
        assert!(requires_query(ROUTER_NEIGHBOR));
        assert!(!requires_query(CHILD_TABLE));

        assert!(can_reset(MAC_COUNTERS));
        assert!(can_reset(MLE_COUNTERS));
        assert!(!can_reset(VERSION));
    }
}
