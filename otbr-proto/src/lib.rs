//! Protocol logic for Thread border router commissioning and diagnostics
//!
//! otbr-proto contains a fully deterministic implementation of the MeshCoP
//! commissioner role and the network diagnostics collection logic. It
//! contains no networking code and does not get any relevant timestamps
//! from the operating system: drivers feed it decoded CoAP messages and
//! stack events, poll it for outgoing messages and timers, and pass
//! `Instant`s into every time-dependent call.
//!
//! The most important types are [`Commissioner`], the state machine for an
//! external commissioner session toward a border agent, and [`Services`],
//! which bundles the on-device commissioner manager, the diagnostics
//! handler, and their result collections for the actions layer on top.

#![allow(clippy::too_many_arguments)]

pub mod actions;
mod coap;
mod collection;
mod commissioner;
mod diag;
pub mod diag_types;
mod error;
mod joiner;
mod manager;
pub mod meshcop;
pub mod ot;
mod services;
mod steering;
#[cfg(test)]
mod tests;

pub use crate::coap::{Code, Event, Kind, Message};
pub use crate::collection::{
    Collection, Device, DeviceInfo, DiagnosticRecord, NetworkDiagnostics, NodeInfo,
    ServiceRoleFlags, MAX_DEVICES_COLLECTION_ITEMS, MAX_DIAGNOSTICS_COLLECTION_ITEMS,
};
pub use crate::commissioner::{
    Commissioner, Config, State, Stats, COMMISSIONER_ID, DEFAULT_KEEP_ALIVE_RATE,
};
pub use crate::diag::{
    NetworkDiagHandler, DIAG_COLLECT_TIMEOUT, DIAG_MAX_AGE, DIAG_MAX_RETRIES,
};
pub use crate::error::{Error, Result};
pub use crate::joiner::{DtlsEvent, JoinerSession};
pub use crate::manager::{
    CommissionerManager, EnergyReport, EnergyScanReport, JoinerEntry, JoinerState,
};
pub use crate::services::{Destination, Services};
pub use crate::steering::{compute_joiner_id, SteeringData, MAX_STEERING_DATA_LEN};
