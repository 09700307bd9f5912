//! Top-level service state shared by the driver and the actions layer.

use std::net::Ipv6Addr;
use std::time::Instant;

use crate::collection::{
    Collection, Device, DiagnosticRecord, MAX_DEVICES_COLLECTION_ITEMS,
    MAX_DIAGNOSTICS_COLLECTION_ITEMS,
};
use crate::diag::NetworkDiagHandler;
use crate::manager::CommissionerManager;
use crate::ot::{rloc_address, ExtAddress, ThreadApi};
use crate::{Error, Result};

/// The long-lived service state machines and their result collections.
///
/// Fields are public so callers can borrow them disjointly; the handler
/// methods that fill a collection take it as a parameter.
pub struct Services {
    pub commissioner: CommissionerManager,
    pub diag: NetworkDiagHandler,
    pub devices: Collection<Device>,
    pub diagnostics: Collection<DiagnosticRecord>,
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

impl Services {
    pub fn new() -> Self {
        Self {
            commissioner: CommissionerManager::new(),
            diag: NetworkDiagHandler::new(),
            devices: Collection::new("devices", MAX_DEVICES_COLLECTION_ITEMS),
            diagnostics: Collection::new("diagnostics", MAX_DIAGNOSTICS_COLLECTION_ITEMS),
        }
    }

    /// Periodic tick, called from the driver's main loop.
    pub fn process(&mut self, ot: &mut dyn ThreadApi, now: Instant) -> Result<()> {
        self.commissioner.process(ot, now);
        self.diag.process(ot, now)
    }
}

/// Where a diagnostic request is aimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// A device, by its extended address
    Extended(ExtAddress),
    /// A device, by the interface identifier of its mesh-local EID
    MlEidIid(ExtAddress),
    /// A device, by its current RLOC16
    Rloc16(u16),
}

impl Destination {
    /// Parses a destination string: 4 hex digits name an RLOC16,
    /// 16 hex digits an extended address.
    pub fn parse(s: &str) -> Result<Self> {
        let stripped: String = s.chars().filter(|c| !matches!(c, ':' | '-')).collect();
        match stripped.len() {
            4 => {
                let rloc16 = u16::from_str_radix(&stripped, 16).map_err(|_| Error::InvalidArgs)?;
                Ok(Destination::Rloc16(rloc16))
            }
            16 => Ok(Destination::Extended(ExtAddress::parse(&stripped)?)),
            _ => Err(Error::InvalidArgs),
        }
    }

    /// Resolves to a mesh-local IPv6 address.
    ///
    /// Extended addresses resolve through the devices collection (or this
    /// node's own mesh-local EID), so the device must have been discovered
    /// first.
    pub fn resolve(
        &self,
        ot: &dyn ThreadApi,
        devices: &Collection<Device>,
    ) -> Result<Ipv6Addr> {
        let prefix = ot.mesh_local_prefix();
        match self {
            Destination::Rloc16(rloc16) => Ok(rloc_address(&prefix, *rloc16)),
            Destination::MlEidIid(iid) => Ok(iid_address(&prefix, iid)),
            Destination::Extended(ext_addr) => {
                if *ext_addr == ot.ext_address() {
                    return ot.mesh_local_eid().ok_or(Error::InvalidState);
                }
                let device = devices.get(&ext_addr.to_string()).ok_or(Error::NotFound)?;
                let iid = &device.device_info.ml_eid_iid;
                if iid.is_zero() {
                    return Err(Error::NotFound);
                }
                Ok(iid_address(&prefix, iid))
            }
        }
    }

    /// Extended address, when the destination carries one.
    pub fn ext_address(&self) -> Option<ExtAddress> {
        match self {
            Destination::Extended(addr) => Some(*addr),
            _ => None,
        }
    }
}

fn iid_address(prefix: &[u8; 8], iid: &ExtAddress) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[..8].copy_from_slice(prefix);
    octets[8..].copy_from_slice(&iid.0);
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::DeviceInfo;

    #[test]
    fn destination_parse() {
        assert_eq!(Destination::parse("6c00"), Ok(Destination::Rloc16(0x6c00)));
        assert_eq!(
            Destination::parse("00:11:22:33:44:55:66:77"),
            Ok(Destination::Extended(ExtAddress([
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77
            ])))
        );
        assert_eq!(Destination::parse("112233"), Err(Error::InvalidArgs));
        assert_eq!(Destination::parse("zzzz"), Err(Error::InvalidArgs));
    }

    #[test]
    fn extended_destination_resolves_via_devices() {
        let ot = crate::tests::util::MockThread::new();
        let mut devices = Collection::new("devices", 8);

        // distinct from the mock's own extended address
        let ext_addr = ExtAddress([0x44; 8]);
        let dest = Destination::Extended(ext_addr);
        assert_eq!(dest.resolve(&ot, &devices), Err(Error::NotFound));

        devices.insert(
            &ext_addr.to_string(),
            Device {
                device_info: DeviceInfo {
                    ext_address: ext_addr,
                    ml_eid_iid: ExtAddress([0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
                    ..DeviceInfo::default()
                },
                node_info: None,
            },
        );
        let addr = dest.resolve(&ot, &devices).unwrap();
        assert_eq!(addr.to_string(), "fd11:1111:1122:0:8899:aabb:ccdd:eeff");
    }
}
