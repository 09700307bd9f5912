use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use serde_json::json;

use super::*;
use crate::coap::{Code, Event, Kind, Message};
use crate::meshcop::{self, State as MeshcopState, Tlv, TlvType, KEK_SIZE};
use crate::ot::{
    rloc_address, ChildIp6AddrList, CommissionerState, DiagTlv, DiagValue, ExtAddress, JoinerEvent,
    JoinerId, MeshDiagChildEntry, ThreadApi,
};

pub(crate) mod util;
use util::{subscribe, MockThread, MESH_LOCAL_PREFIX};

fn base_time() -> Instant {
    // headroom so max-age cutoffs stay representable
    Instant::now() + Duration::from_secs(3600)
}

fn accept_payload(session_id: u16) -> Vec<u8> {
    Tlv::encode_all(&[
        Tlv::state(MeshcopState::Accept),
        Tlv::u16_value(TlvType::CommissionerSessionId, session_id),
    ])
}

fn reject_payload() -> Vec<u8> {
    Tlv::encode_all(&[Tlv::state(MeshcopState::Reject)])
}

#[test]
fn petition_accept_and_keep_alive() {
    let mut commissioner = Commissioner::new(Config::default());
    let now = base_time();

    commissioner.handle_connected(now);
    let petition = commissioner.poll_transmit().unwrap();
    assert_eq!(petition.path, meshcop::URI_PETITION);
    assert_eq!(petition.kind, Kind::Confirmable);
    let tlvs = Tlv::decode_all(&petition.payload).unwrap();
    let id = meshcop::find(&tlvs, TlvType::CommissionerId).unwrap();
    assert_eq!(id.value, b"OpenThread");

    commissioner.handle_event(
        Event::Response {
            token: petition.token,
            payload: accept_payload(0xbeef),
        },
        now,
    );
    assert!(commissioner.is_accepted());
    assert_eq!(commissioner.session_id(), 0xbeef);

    // keep-alive timer armed at the configured rate
    let deadline = commissioner.poll_timeout().unwrap();
    assert_eq!(deadline, now + DEFAULT_KEEP_ALIVE_RATE);

    commissioner.handle_timeout(deadline);
    let keep_alive = commissioner.poll_transmit().unwrap();
    assert_eq!(keep_alive.path, meshcop::URI_KEEP_ALIVE);
    let tlvs = Tlv::decode_all(&keep_alive.payload).unwrap();
    assert_eq!(
        meshcop::find(&tlvs, TlvType::State).unwrap().as_state(),
        Ok(MeshcopState::Accept)
    );
    assert_eq!(
        meshcop::find(&tlvs, TlvType::CommissionerSessionId)
            .unwrap()
            .as_u16(),
        Ok(0xbeef)
    );
    assert_eq!(commissioner.stats().keep_alive_tx, 1);

    commissioner.handle_event(
        Event::Response {
            token: keep_alive.token,
            payload: accept_payload(0xbeef),
        },
        deadline,
    );
    assert_eq!(commissioner.stats().keep_alive_rx, 1);
    assert!(commissioner.is_accepted());
}

#[test]
fn petition_retries_then_gives_up() {
    let mut commissioner = Commissioner::new(Config::default());
    let mut now = base_time();

    commissioner.handle_connected(now);

    // two retries are allowed after the first rejection
    for _ in 0..2 {
        let petition = commissioner.poll_transmit().unwrap();
        commissioner.handle_event(
            Event::Response {
                token: petition.token,
                payload: reject_payload(),
            },
            now,
        );
        assert_eq!(commissioner.state(), State::Rejected);

        let retry_at = commissioner.poll_timeout().unwrap();
        assert_eq!(retry_at, now + commissioner::PETITION_ATTEMPT_DELAY);
        now = retry_at;
        commissioner.handle_timeout(now);
    }

    let petition = commissioner.poll_transmit().unwrap();
    commissioner.handle_event(
        Event::Response {
            token: petition.token,
            payload: reject_payload(),
        },
        now,
    );
    assert_eq!(commissioner.state(), State::Invalid);
    assert_eq!(commissioner.poll_timeout(), None);
    assert!(commissioner.poll_transmit().is_none());
}

#[test]
fn unanswered_petition_is_retried() {
    let mut commissioner = Commissioner::new(Config::default());
    let now = base_time();

    commissioner.handle_connected(now);
    let petition = commissioner.poll_transmit().unwrap();

    // response window elapses without an answer
    let deadline = commissioner.poll_timeout().unwrap();
    assert_eq!(deadline, now + commissioner::COAP_RESPONSE_WAIT);
    commissioner.handle_timeout(deadline);
    assert_eq!(commissioner.state(), State::Rejected);

    let retry_at = commissioner.poll_timeout().unwrap();
    commissioner.handle_timeout(retry_at);
    let retry = commissioner.poll_transmit().unwrap();
    assert_eq!(retry.path, meshcop::URI_PETITION);
    assert_ne!(retry.token, petition.token);

    // a late response to the first petition is ignored
    commissioner.handle_event(
        Event::Response {
            token: petition.token,
            payload: accept_payload(1),
        },
        retry_at,
    );
    assert!(!commissioner.is_accepted());
}

#[test]
fn relay_appends_kek_exactly_once() {
    let _guard = subscribe();
    let mut commissioner = Commissioner::new(Config::default());
    let now = base_time();

    commissioner.handle_connected(now);
    let petition = commissioner.poll_transmit().unwrap();
    commissioner.handle_event(
        Event::Response {
            token: petition.token,
            payload: accept_payload(42),
        },
        now,
    );

    let steering = SteeringData::allow_any();
    commissioner.set_joiner("J01NME", &steering, now);
    let set = commissioner.poll_transmit().unwrap();
    assert_eq!(set.path, meshcop::URI_COMMISSIONER_SET);
    let tlvs = Tlv::decode_all(&set.payload).unwrap();
    assert_eq!(
        meshcop::find(&tlvs, TlvType::SteeringData).unwrap().value,
        vec![0xff]
    );

    // joiner shows up at a joiner router
    let relay_rx = Tlv::encode_all(&[
        Tlv::u16_value(TlvType::JoinerUdpPort, 50000),
        Tlv::new(TlvType::JoinerIid, vec![0xaa; 8]),
        Tlv::u16_value(TlvType::JoinerRouterLocator, 0x6c00),
        Tlv::new(TlvType::JoinerDtlsEncapsulation, b"client-hello".to_vec()),
    ]);
    commissioner.handle_event(
        Event::Request {
            path: meshcop::URI_RELAY_RX.to_string(),
            payload: relay_rx,
        },
        now,
    );
    assert_eq!(commissioner.poll_joiner_input().unwrap(), b"client-hello");

    // handshake response goes back without a KEK
    commissioner.relay_transmit(b"server-hello", now).unwrap();
    let relay = commissioner.poll_transmit().unwrap();
    assert_eq!(relay.path, meshcop::URI_RELAY_TX);
    assert_eq!(relay.kind, Kind::NonConfirmable);
    let tlvs = Tlv::decode_all(&relay.payload).unwrap();
    assert!(meshcop::find(&tlvs, TlvType::JoinerRouterKek).is_none());
    assert_eq!(
        meshcop::find(&tlvs, TlvType::JoinerUdpPort).unwrap().as_u16(),
        Ok(50000)
    );

    // handshake completes and the joiner finalizes
    commissioner.handle_joiner_dtls_event(DtlsEvent::Ready { kek: [0x5a; KEK_SIZE] });
    let finalize = Message::request(Kind::Confirmable, meshcop::URI_JOINER_FINALIZE, 9, Vec::new());
    commissioner.handle_joiner_request(&finalize).unwrap();
    let rsp = commissioner.joiner_session_mut().unwrap().poll_transmit().unwrap();
    assert_eq!(rsp.code, Code::Changed);

    // the next relay carries the KEK, later ones do not
    commissioner.relay_transmit(b"finalize-rsp", now).unwrap();
    let relay = commissioner.poll_transmit().unwrap();
    let tlvs = Tlv::decode_all(&relay.payload).unwrap();
    assert_eq!(
        meshcop::find(&tlvs, TlvType::JoinerRouterKek).unwrap().value,
        vec![0x5a; KEK_SIZE]
    );
    assert_eq!(commissioner.stats().finalized_joiners, 1);

    commissioner.relay_transmit(b"close", now).unwrap();
    let relay = commissioner.poll_transmit().unwrap();
    let tlvs = Tlv::decode_all(&relay.payload).unwrap();
    assert!(meshcop::find(&tlvs, TlvType::JoinerRouterKek).is_none());
}

#[test]
fn set_waits_for_in_flight_keep_alive() {
    let mut commissioner = Commissioner::new(Config::default());
    let now = base_time();

    commissioner.handle_connected(now);
    let petition = commissioner.poll_transmit().unwrap();
    commissioner.handle_event(
        Event::Response {
            token: petition.token,
            payload: accept_payload(7),
        },
        now,
    );

    // a keep-alive goes out and its response is still outstanding
    let at = commissioner.poll_timeout().unwrap();
    commissioner.handle_timeout(at);
    let keep_alive = commissioner.poll_transmit().unwrap();
    assert_eq!(keep_alive.path, meshcop::URI_KEEP_ALIVE);

    let steering = SteeringData::allow_any();
    commissioner.commissioner_set(&steering, at);
    assert!(commissioner.poll_transmit().is_none());

    commissioner.handle_event(
        Event::Response {
            token: keep_alive.token,
            payload: accept_payload(7),
        },
        at,
    );
    assert_eq!(commissioner.stats().keep_alive_rx, 1);

    // the held-back set goes out once the keep-alive resolves
    let set = commissioner.poll_transmit().unwrap();
    assert_eq!(set.path, meshcop::URI_COMMISSIONER_SET);
    commissioner.handle_event(
        Event::Response {
            token: set.token,
            payload: accept_payload(7),
        },
        at,
    );
    assert!(commissioner.is_accepted());
    assert!(commissioner.poll_transmit().is_none());
}

fn router_response(ext: [u8; 8], rloc16: u16) -> Vec<DiagTlv> {
    let mut ml_eid = [0u8; 16];
    ml_eid[..8].copy_from_slice(&MESH_LOCAL_PREFIX);
    ml_eid[8..].copy_from_slice(&ext);
    vec![
        DiagTlv {
            ty: diag_types::EXT_ADDRESS,
            value: DiagValue::ExtAddress(ExtAddress(ext)),
        },
        DiagTlv {
            ty: diag_types::SHORT_ADDRESS,
            value: DiagValue::U16(rloc16),
        },
        DiagTlv {
            ty: diag_types::IP6_ADDR_LIST,
            value: DiagValue::Ip6AddrList(vec![
                ml_eid.into(),
                "fd00:db8::1234".parse().unwrap(),
            ]),
        },
    ]
}

#[test]
fn discovery_walks_routers_children_and_reeds() {
    let _guard = subscribe();
    let mut ot = MockThread::new();
    let mut handler = NetworkDiagHandler::new();
    let mut devices = Collection::new("devices", MAX_DEVICES_COLLECTION_ITEMS);
    let now = base_time();

    handler
        .handle_network_discovery_request(&mut ot, DIAG_COLLECT_TIMEOUT, DIAG_MAX_AGE, 2, now)
        .unwrap();
    assert_eq!(ot.diag_gets.len(), 1);
    assert_eq!(ot.diag_gets[0].0, ot.realm_local_all_thread_nodes());
    assert_eq!(
        ot.diag_gets[0].1,
        vec![
            diag_types::EXT_ADDRESS,
            diag_types::SHORT_ADDRESS,
            diag_types::IP6_ADDR_LIST
        ]
    );
    assert_eq!(
        handler.get_discovery_status(&mut ot, &mut devices),
        Err(Error::Pending)
    );

    // the single router answers the multicast; 0x11.. is this node
    let source = rloc_address(&MESH_LOCAL_PREFIX, 0x6c00);
    handler.handle_diag_response(&source, router_response([0x11; 8], 0x6c00), now);

    // child table first, one REED child behind the router
    handler.process(&mut ot, now).unwrap();
    assert_eq!(ot.queries.last(), Some(&("childTable", 0x6c00)));
    handler.handle_child_table_result(
        Ok(vec![MeshDiagChildEntry {
            rloc16: 0x6c01,
            ext_address: ExtAddress([0x33; 8]),
            device_type_ftd: true,
            rx_on_when_idle: true,
            full_net_data: true,
        }]),
        now,
    );

    handler.process(&mut ot, now).unwrap();
    // children addresses are queried from their parent router
    assert_eq!(ot.queries.last(), Some(&("childIp6Addrs", 0x6c00)));
    handler.handle_child_ip6_addrs_result(
        Ok(vec![ChildIp6AddrList {
            rloc16: 0x6c01,
            addresses: vec!["fd00:db8::abcd".parse().unwrap()],
        }]),
        now,
    );

    // the FTD child never answered the multicast, follow it up by unicast
    handler.process(&mut ot, now).unwrap();
    handler.process(&mut ot, now).unwrap();
    assert_eq!(ot.diag_gets.len(), 2);
    assert_eq!(ot.diag_gets[1].0, rloc_address(&MESH_LOCAL_PREFIX, 0x6c01));

    let reed_source = rloc_address(&MESH_LOCAL_PREFIX, 0x6c01);
    handler.handle_diag_response(&reed_source, router_response([0x33; 8], 0x6c01), now);

    handler.process(&mut ot, now).unwrap();
    let count = handler.get_discovery_status(&mut ot, &mut devices).unwrap();
    assert_eq!(count, 2);

    let this_node = devices.get(&ExtAddress([0x11; 8]).to_string()).unwrap();
    assert_eq!(this_node.device_info.role.as_deref(), Some("router"));
    let node_info = this_node.node_info.as_ref().unwrap();
    assert_eq!(node_info.role, "leader");
    assert_eq!(node_info.rloc16, 0x6c00);
    assert_eq!(node_info.num_of_router, 1);
    assert_eq!(node_info.network_name, "OpenThread-demo");

    let reed = devices.get(&ExtAddress([0x33; 8]).to_string()).unwrap();
    assert_eq!(reed.device_info.role.as_deref(), Some("child"));
    assert!(reed.node_info.is_none());
}

#[test]
fn targeted_diagnostics_produce_a_record() {
    let mut ot = MockThread::new();
    let mut handler = NetworkDiagHandler::new();
    let mut diagnostics = Collection::new("diagnostics", MAX_DIAGNOSTICS_COLLECTION_ITEMS);
    let now = base_time();

    let dest = rloc_address(&MESH_LOCAL_PREFIX, 0x6c01);
    handler
        .start_diagnostics_request(
            &mut ot,
            dest,
            &[diag_types::EXT_ADDRESS, diag_types::MAC_COUNTERS],
            DIAG_COLLECT_TIMEOUT,
            now,
        )
        .unwrap();
    // rloc16 is forced into the request so the response can be keyed
    assert_eq!(
        ot.diag_gets[0].1,
        vec![
            diag_types::EXT_ADDRESS,
            diag_types::MAC_COUNTERS,
            diag_types::SHORT_ADDRESS
        ]
    );
    // only one request at a time
    assert_eq!(
        handler.start_diagnostics_request(&mut ot, dest, &[], DIAG_COLLECT_TIMEOUT, now),
        Err(Error::Already)
    );

    // a response from some other device is dropped
    let stranger = rloc_address(&MESH_LOCAL_PREFIX, 0x2400);
    handler.handle_diag_response(
        &stranger,
        vec![DiagTlv {
            ty: diag_types::SHORT_ADDRESS,
            value: DiagValue::U16(0x2400),
        }],
        now,
    );
    assert_eq!(
        handler.get_diagnostics_status(&mut ot, &mut diagnostics, &ExtAddress([0x44; 8])),
        Err(Error::Pending)
    );

    handler.handle_diag_response(
        &dest,
        vec![
            DiagTlv {
                ty: diag_types::EXT_ADDRESS,
                value: DiagValue::ExtAddress(ExtAddress([0x44; 8])),
            },
            DiagTlv {
                ty: diag_types::SHORT_ADDRESS,
                value: DiagValue::U16(0x6c01),
            },
            DiagTlv {
                ty: diag_types::MAC_COUNTERS,
                value: DiagValue::Bytes(vec![0; 36]),
            },
        ],
        now,
    );
    handler.process(&mut ot, now).unwrap();

    let uuids = handler
        .get_diagnostics_status(&mut ot, &mut diagnostics, &ExtAddress([0x44; 8]))
        .unwrap();
    assert!(!uuids.is_empty());
    assert_eq!(diagnostics.len(), 1);
    let record = diagnostics.get(&uuids).unwrap();
    assert_matches!(record, DiagnosticRecord::Network(diag) if diag.tlvs.len() == 3);
}

#[test]
fn first_diagnostic_retry_waits_for_backoff() {
    let mut ot = MockThread::new();
    let mut handler = NetworkDiagHandler::new();
    let now = base_time();

    let dest = rloc_address(&MESH_LOCAL_PREFIX, 0x6c01);
    handler
        .start_diagnostics_request(
            &mut ot,
            dest,
            &[diag_types::EXT_ADDRESS],
            DIAG_COLLECT_TIMEOUT,
            now,
        )
        .unwrap();
    assert_eq!(ot.diag_gets.len(), 1);

    // inside the backoff window nothing is resent
    handler.process(&mut ot, now + Duration::from_millis(1)).unwrap();
    assert_eq!(ot.diag_gets.len(), 1);

    handler.process(&mut ot, now + Duration::from_millis(101)).unwrap();
    assert_eq!(ot.diag_gets.len(), 2);
}

#[test]
fn refused_retries_fail_the_request() {
    let mut ot = MockThread::new();
    let mut handler = NetworkDiagHandler::new();
    let mut diagnostics = Collection::new("diagnostics", MAX_DIAGNOSTICS_COLLECTION_ITEMS);
    let now = base_time();

    let dest = rloc_address(&MESH_LOCAL_PREFIX, 0x6c01);
    handler
        .start_diagnostics_request(
            &mut ot,
            dest,
            &[diag_types::EXT_ADDRESS],
            DIAG_COLLECT_TIMEOUT,
            now,
        )
        .unwrap();

    // the stack refuses every retry from here on
    ot.fail_diag_gets = true;
    let mut at = now;
    for _ in 0..DIAG_MAX_RETRIES {
        at += Duration::from_secs(1);
        assert_eq!(handler.process(&mut ot, at), Err(Error::NoBufs));
    }

    assert_eq!(
        handler.get_diagnostics_status(&mut ot, &mut diagnostics, &ExtAddress([0x44; 8])),
        Err(Error::Failed)
    );
    assert_eq!(diagnostics.len(), 0);
}

#[test]
fn add_device_action_lifecycle() {
    let mut ot = MockThread::new();
    let mut services = Services::new();
    let mut actions = actions::ActionsList::new();
    let now = base_time();

    let item = json!({
        "type": "addThreadDeviceTask",
        "attributes": {
            "eui": "0011223344556677",
            "pskd": "J01NME",
            "timeout": 120,
        },
    });
    actions
        .validate_request(&json!({ "data": [item] }))
        .unwrap();

    let uuid = actions
        .create_action(&item, &mut ot, &mut services, now)
        .unwrap();
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Active));
    assert!(ot.commissioner_started);

    let joiner = JoinerId::Eui64(ExtAddress::parse("0011223344556677").unwrap());
    services
        .commissioner
        .handle_state_event(&mut ot, CommissionerState::Active, now);
    assert_eq!(ot.joiners_added.len(), 1);

    services.commissioner.handle_joiner_event(JoinerEvent::End, &joiner);
    actions.update_all(&mut ot, &mut services, now);
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Completed));
    assert_eq!(ot.joiners_removed, vec![joiner]);

    let jsonified = actions.jsonify_action(&uuid).unwrap();
    assert_eq!(jsonified["attributes"]["status"], "completed");
    assert_eq!(jsonified["type"], "addThreadDeviceTask");
}

#[test]
fn discover_network_action_reruns_until_completed() {
    let _guard = subscribe();
    let mut ot = MockThread::new();
    let mut services = Services::new();
    let mut actions = actions::ActionsList::new();
    let mut now = base_time();

    let item = json!({
        "type": "updateDeviceCollectionTask",
        "attributes": {
            "maxAge": 1.5,
            "maxRetries": 3,
            "deviceCount": 5,
            "timeout": 30,
        },
    });
    actions
        .validate_request(&json!({ "data": [item] }))
        .unwrap();
    let uuid = actions
        .create_action(&item, &mut ot, &mut services, now)
        .unwrap();
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Active));
    assert_eq!(ot.diag_gets.len(), 1);

    // the single router answers the multicast, one MTD child behind it
    let source = rloc_address(&MESH_LOCAL_PREFIX, 0x6c00);
    services
        .diag
        .handle_diag_response(&source, router_response([0x11; 8], 0x6c00), now);
    services.diag.process(&mut ot, now).unwrap();
    assert_eq!(ot.queries.last(), Some(&("childTable", 0x6c00)));
    services.diag.handle_child_table_result(
        Ok(vec![MeshDiagChildEntry {
            rloc16: 0x6c01,
            ext_address: ExtAddress([0x33; 8]),
            device_type_ftd: false,
            rx_on_when_idle: false,
            full_net_data: false,
        }]),
        now,
    );
    services.diag.process(&mut ot, now).unwrap();
    services.diag.handle_child_ip6_addrs_result(Ok(vec![]), now);
    services.diag.process(&mut ot, now).unwrap();

    // two devices known, fewer than requested: the action runs more rounds
    actions.update_all(&mut ot, &mut services, now);
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Pending));
    assert_eq!(services.devices.len(), 2);

    // the cached tables are still fresh, so each re-run completes in one
    // tick until the retry budget runs out
    for _ in 0..4 {
        now += Duration::from_millis(100);
        actions.update_all(&mut ot, &mut services, now);
        services.diag.process(&mut ot, now).unwrap();
        actions.update_all(&mut ot, &mut services, now);
    }
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Completed));
    assert_eq!(services.devices.len(), 2);
    assert_eq!(ot.diag_gets.len(), 5);

    let jsonified = actions.jsonify_action(&uuid).unwrap();
    assert_eq!(jsonified["attributes"]["status"], "completed");
    assert_eq!(jsonified["attributes"]["deviceCount"], 5);
}

#[test]
fn oldest_action_is_evicted_at_capacity() {
    let mut ot = MockThread::new();
    let mut services = Services::new();
    let mut actions = actions::ActionsList::new();
    let now = base_time();

    let item = json!({
        "type": "resetNetworkDiagCounterTask",
        "attributes": { "types": ["macCounters"] },
    });
    let first = actions
        .create_action(&item, &mut ot, &mut services, now)
        .unwrap();
    for _ in 1..actions::MAX_ACTIONS_COLLECTION_ITEMS {
        actions
            .create_action(&item, &mut ot, &mut services, now)
            .unwrap();
    }
    assert_eq!(actions.len(), actions::MAX_ACTIONS_COLLECTION_ITEMS);

    // the next creation pushes out the oldest entry instead of failing
    let newest = actions
        .create_action(&item, &mut ot, &mut services, now)
        .unwrap();
    assert_eq!(actions.len(), actions::MAX_ACTIONS_COLLECTION_ITEMS);
    assert_eq!(actions.status(&first), Err(Error::NotFound));
    assert_eq!(actions.status(&newest), Ok(actions::ActionStatus::Completed));
}

#[test]
fn unknown_action_type_is_rejected() {
    let actions = actions::ActionsList::new();
    let request = json!({
        "data": [{ "type": "noSuchTask", "attributes": {} }],
    });
    assert_eq!(actions.validate_request(&request), Err(Error::InvalidArgs));
    assert_eq!(
        actions.validate_request(&json!({ "data": 5 })),
        Err(Error::InvalidArgs)
    );
}

#[test]
fn pending_action_is_stopped_at_timeout() {
    let mut ot = MockThread::new();
    let mut services = Services::new();
    let mut actions = actions::ActionsList::new();
    let now = base_time();

    // an undiscovered destination keeps the action pending
    let item = json!({
        "type": "getNetworkDiagnosticTask",
        "attributes": {
            "destination": "5566778899aabbcc",
            "types": ["extAddress"],
        },
    });
    let uuid = actions
        .create_action(&item, &mut ot, &mut services, now)
        .unwrap();
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Pending));

    actions.update_all(&mut ot, &mut services, now + Duration::from_secs(59));
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Pending));

    actions.update_all(&mut ot, &mut services, now + Duration::from_secs(61));
    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Stopped));
}

#[test]
fn reset_counters_action_defaults_to_multicast() {
    let mut ot = MockThread::new();
    let mut services = Services::new();
    let mut actions = actions::ActionsList::new();
    let now = base_time();

    let item = json!({
        "type": "resetNetworkDiagCounterTask",
        "attributes": { "types": ["macCounters", "mleCounters"] },
    });
    actions
        .validate_request(&json!({ "data": [item] }))
        .unwrap();
    let uuid = actions
        .create_action(&item, &mut ot, &mut services, now)
        .unwrap();

    assert_eq!(actions.status(&uuid), Ok(actions::ActionStatus::Completed));
    assert_eq!(ot.diag_resets.len(), 1);
    assert_eq!(ot.diag_resets[0].0, ot.realm_local_all_thread_nodes());
    assert_eq!(
        ot.diag_resets[0].1,
        vec![diag_types::MAC_COUNTERS, diag_types::MLE_COUNTERS]
    );
}
