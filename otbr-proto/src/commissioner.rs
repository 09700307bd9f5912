//! External commissioner state machine.
//!
//! Petitions the leader over the border agent's secured CoAP channel, keeps
//! the commissioner session alive, publishes steering data and relays the
//! joiner's DTLS traffic between the `c/rt`/`c/tx` resources and the local
//! [`JoinerSession`].
//!
//! The type performs no I/O and reads no clocks. The driver feeds it
//! inbound CoAP events and the current time, drains [`poll_transmit`], and
//! calls [`handle_timeout`] whenever the instant from [`poll_timeout`] is
//! reached.
//!
//! [`poll_transmit`]: Commissioner::poll_transmit
//! [`poll_timeout`]: Commissioner::poll_timeout
//! [`handle_timeout`]: Commissioner::handle_timeout

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::coap::{Event, Kind, Message};
use crate::joiner::{DtlsEvent, JoinerSession};
use crate::meshcop::{self, State as MeshcopState, Tlv, TlvType};
use crate::steering::SteeringData;
use crate::{Error, Result};

/// Delay between failed petition attempts.
pub const PETITION_ATTEMPT_DELAY: Duration = Duration::from_secs(5);
/// Petition attempts after the first before giving up.
pub const PETITION_MAX_RETRY: u32 = 2;
/// Response window for confirmable requests.
pub const COAP_RESPONSE_WAIT: Duration = Duration::from_secs(10);
/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE_RATE: Duration = Duration::from_secs(15);

/// Commissioner ID announced in the petition.
pub const COMMISSIONER_ID: &str = "OpenThread";

/// Commissioner session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not petitioning and no session; terminal until reconnected
    Invalid,
    /// Secure channel to the border agent is up, petition in progress
    Connected,
    /// Petition succeeded, we are the active commissioner
    Accepted,
    /// Petition or keep-alive was rejected, retry pending
    Rejected,
}

/// Commissioner parameters supplied by the driver.
#[derive(Debug, Clone)]
pub struct Config {
    pub commissioner_id: String,
    /// Zero disables periodic keep-alives
    pub keep_alive_rate: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commissioner_id: COMMISSIONER_ID.to_string(),
            keep_alive_rate: DEFAULT_KEEP_ALIVE_RATE,
        }
    }
}

/// Session counters, exposed for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub keep_alive_tx: u64,
    pub keep_alive_rx: u64,
    pub finalized_joiners: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Petition,
    KeepAlive,
    Set,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    token: u16,
    request: Request,
    deadline: Instant,
}

pub struct Commissioner {
    config: Config,
    state: State,
    session_id: u16,
    next_token: u16,
    pending: Option<Pending>,
    petition_retries: u32,
    next_petition: Option<Instant>,
    next_keep_alive: Option<Instant>,
    stats: Stats,
    joiner_udp_port: u16,
    joiner_iid: [u8; 8],
    joiner_router_locator: u16,
    /// Steering data held back while another confirmable is in flight
    queued_steering: Option<SteeringData>,
    session: Option<JoinerSession>,
    transmits: VecDeque<Message>,
    joiner_input: VecDeque<Vec<u8>>,
}

impl Commissioner {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: State::Invalid,
            session_id: 0,
            next_token: rand::thread_rng().gen(),
            pending: None,
            petition_retries: 0,
            next_petition: None,
            next_keep_alive: None,
            stats: Stats::default(),
            joiner_udp_port: 0,
            joiner_iid: [0; 8],
            joiner_router_locator: 0,
            queued_steering: None,
            session: None,
            transmits: VecDeque::new(),
            joiner_input: VecDeque::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state != State::Invalid
    }

    pub fn is_accepted(&self) -> bool {
        self.state == State::Accepted
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn joiner_session(&self) -> Option<&JoinerSession> {
        self.session.as_ref()
    }

    pub fn joiner_session_mut(&mut self) -> Option<&mut JoinerSession> {
        self.session.as_mut()
    }

    /// Next outbound CoAP message for the border agent channel.
    pub fn poll_transmit(&mut self) -> Option<Message> {
        self.transmits.pop_front()
    }

    /// Earliest instant at which [`handle_timeout`](Self::handle_timeout)
    /// must be called.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut next = self.pending.map(|p| p.deadline);
        for candidate in [self.next_petition, self.next_keep_alive] {
            next = match (next, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        next
    }

    /// Called when the secure channel to the border agent comes up.
    pub fn handle_connected(&mut self, now: Instant) {
        info!("connected to border agent, petitioning");
        self.state = State::Connected;
        self.petition_retries = 0;
        self.send_petition(now);
    }

    /// Called when the secure channel is lost.
    pub fn handle_disconnected(&mut self) {
        warn!("border agent channel lost");
        self.state = State::Invalid;
        self.pending = None;
        self.next_petition = None;
        self.next_keep_alive = None;
        self.queued_steering = None;
    }

    /// Called when the driver hit an unrecoverable transport error.
    pub fn handle_transport_error(&mut self) {
        warn!("transport error on border agent channel");
        self.handle_disconnected();
    }

    /// Feeds an inbound CoAP event from the border agent channel.
    pub fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::Response { token, payload } => self.handle_response(token, &payload, now),
            Event::Request { path, payload } => self.handle_request(&path, &payload, now),
        }
    }

    fn next_token(&mut self) -> u16 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }

    fn send_confirmable(&mut self, path: &str, request: Request, payload: Vec<u8>, now: Instant) {
        let token = self.next_token();
        self.transmits
            .push_back(Message::request(Kind::Confirmable, path, token, payload));
        self.pending = Some(Pending {
            token,
            request,
            deadline: now + COAP_RESPONSE_WAIT,
        });
    }

    fn send_petition(&mut self, now: Instant) {
        if self.pending.is_some() {
            trace!("petition skipped, request in flight");
            return;
        }
        debug!(attempt = self.petition_retries, "sending petition");
        let payload = Tlv::encode_all(&[Tlv::new(
            TlvType::CommissionerId,
            self.config.commissioner_id.clone().into_bytes(),
        )]);
        self.next_petition = None;
        self.send_confirmable(meshcop::URI_PETITION, Request::Petition, payload, now);
    }

    fn send_keep_alive(&mut self, state: MeshcopState, now: Instant) {
        let payload = Tlv::encode_all(&[
            Tlv::state(state),
            Tlv::u16_value(TlvType::CommissionerSessionId, self.session_id),
        ]);
        self.send_confirmable(meshcop::URI_KEEP_ALIVE, Request::KeepAlive, payload, now);
        self.stats.keep_alive_tx += 1;
        self.schedule_keep_alive(now);
    }

    fn schedule_keep_alive(&mut self, now: Instant) {
        self.next_keep_alive = if self.config.keep_alive_rate > Duration::ZERO {
            Some(now + self.config.keep_alive_rate)
        } else {
            None
        };
    }

    /// Publishes `steering` and opens a joiner session keyed by `pskd`.
    pub fn set_joiner(&mut self, pskd: &str, steering: &SteeringData, now: Instant) {
        info!(steering = ?steering, "setting joiner credentials");
        self.session = Some(JoinerSession::new(pskd));
        self.commissioner_set(steering, now);
    }

    /// Sends `MGMT_COMMISSIONER_SET` with the given steering data.
    ///
    /// While another confirmable exchange is outstanding the steering data
    /// is held back and sent once that exchange resolves.
    pub fn commissioner_set(&mut self, steering: &SteeringData, now: Instant) {
        if self.pending.is_some() {
            debug!("request in flight, steering data queued");
            self.queued_steering = Some(steering.clone());
            return;
        }
        self.send_set(steering, now);
    }

    fn send_set(&mut self, steering: &SteeringData, now: Instant) {
        let payload = Tlv::encode_all(&[
            Tlv::u16_value(TlvType::CommissionerSessionId, self.session_id),
            Tlv::new(TlvType::SteeringData, steering.as_bytes().to_vec()),
        ]);
        self.send_confirmable(meshcop::URI_COMMISSIONER_SET, Request::Set, payload, now);
    }

    fn flush_queued_set(&mut self, now: Instant) {
        if self.pending.is_some() || self.state != State::Accepted {
            return;
        }
        if let Some(steering) = self.queued_steering.take() {
            self.send_set(&steering, now);
        }
    }

    /// Gracefully gives up the commissioner role.
    pub fn resign(&mut self, now: Instant) {
        if self.state == State::Accepted {
            self.send_keep_alive(MeshcopState::Reject, now);
        }
        self.state = State::Invalid;
        // fire and forget, the session is over either way
        self.pending = None;
        self.next_keep_alive = None;
        self.next_petition = None;
        self.queued_steering = None;
    }

    fn handle_response(&mut self, token: u16, payload: &[u8], now: Instant) {
        let pending = match self.pending {
            Some(p) if p.token == token => p,
            _ => {
                trace!(token, "response with unknown token");
                return;
            }
        };
        self.pending = None;

        let tlvs = match Tlv::decode_all(payload) {
            Ok(tlvs) => tlvs,
            Err(_) => {
                warn!("malformed response payload");
                return;
            }
        };

        match pending.request {
            Request::Petition => self.handle_petition_response(&tlvs, now),
            Request::KeepAlive => self.handle_keep_alive_response(&tlvs, now),
            Request::Set => self.handle_set_response(&tlvs),
        }
        self.flush_queued_set(now);
    }

    fn handle_petition_response(&mut self, tlvs: &[Tlv], now: Instant) {
        let mut state = None;
        for tlv in tlvs {
            match tlv.ty {
                TlvType::State => state = tlv.as_state().ok(),
                TlvType::CommissionerSessionId => {
                    if let Ok(id) = tlv.as_u16() {
                        self.session_id = id;
                    }
                }
                _ => {}
            }
        }
        match state {
            Some(MeshcopState::Accept) => {
                info!(session_id = self.session_id, "petition accepted");
                self.state = State::Accepted;
                self.petition_retries = 0;
                self.schedule_keep_alive(now);
            }
            Some(MeshcopState::Pending) => {
                debug!("petition pending");
            }
            _ => {
                warn!("petition rejected");
                self.retry_petition(now);
            }
        }
    }

    fn handle_keep_alive_response(&mut self, tlvs: &[Tlv], now: Instant) {
        self.stats.keep_alive_rx += 1;
        match meshcop::find(tlvs, TlvType::State).and_then(|t| t.as_state().ok()) {
            Some(MeshcopState::Accept) => {
                trace!("keep-alive accepted");
                self.state = State::Accepted;
            }
            _ => {
                warn!("keep-alive rejected");
                self.next_keep_alive = None;
                self.retry_petition(now);
            }
        }
    }

    fn handle_set_response(&mut self, tlvs: &[Tlv]) {
        if let Some(id) = meshcop::find(tlvs, TlvType::CommissionerSessionId).and_then(|t| t.as_u16().ok())
        {
            self.session_id = id;
        }
        debug!("commissioner set acknowledged");
    }

    fn retry_petition(&mut self, now: Instant) {
        self.state = State::Rejected;
        if self.petition_retries < PETITION_MAX_RETRY {
            self.petition_retries += 1;
            self.next_petition = Some(now + PETITION_ATTEMPT_DELAY);
            debug!(attempt = self.petition_retries, "petition retry scheduled");
        } else {
            warn!("petition attempts exhausted");
            self.state = State::Invalid;
            self.next_petition = None;
            self.next_keep_alive = None;
        }
    }

    /// Advances timers. Must be called once the instant returned by
    /// [`poll_timeout`](Self::poll_timeout) has passed.
    pub fn handle_timeout(&mut self, now: Instant) {
        if let Some(pending) = self.pending {
            if now >= pending.deadline {
                self.pending = None;
                warn!(request = ?pending.request, "no response within window");
                match pending.request {
                    Request::Petition | Request::KeepAlive => self.retry_petition(now),
                    Request::Set => {}
                }
                self.flush_queued_set(now);
            }
        }

        if let Some(at) = self.next_petition {
            if now >= at && self.state != State::Invalid {
                self.send_petition(now);
            }
        }

        if let Some(at) = self.next_keep_alive {
            if now >= at && self.state == State::Accepted && self.pending.is_none() {
                self.send_keep_alive(MeshcopState::Accept, now);
            }
        }
    }

    fn handle_request(&mut self, path: &str, payload: &[u8], now: Instant) {
        match path {
            meshcop::URI_RELAY_RX => self.handle_relay_receive(payload, now),
            _ => warn!(path, "request for unknown resource"),
        }
    }

    // RLY_RX.ntf: record where the joiner sits and hand the encapsulated
    // DTLS record to the joiner session transport.
    fn handle_relay_receive(&mut self, payload: &[u8], _now: Instant) {
        let tlvs = match Tlv::decode_all(payload) {
            Ok(tlvs) => tlvs,
            Err(_) => {
                warn!("malformed relay receive");
                return;
            }
        };
        for tlv in &tlvs {
            match tlv.ty {
                TlvType::JoinerUdpPort => {
                    if let Ok(port) = tlv.as_u16() {
                        self.joiner_udp_port = port;
                    }
                }
                TlvType::JoinerIid => {
                    if tlv.value.len() == 8 {
                        self.joiner_iid.copy_from_slice(&tlv.value);
                    }
                }
                TlvType::JoinerRouterLocator => {
                    if let Ok(locator) = tlv.as_u16() {
                        self.joiner_router_locator = locator;
                    }
                }
                TlvType::JoinerDtlsEncapsulation => {
                    self.joiner_input.push_back(tlv.value.clone());
                }
                _ => {}
            }
        }
    }

    /// Next DTLS record received from the joiner, for the driver to feed
    /// into the joiner-side DTLS endpoint.
    pub fn poll_joiner_input(&mut self) -> Option<Vec<u8>> {
        self.joiner_input.pop_front()
    }

    /// Wraps an outbound joiner DTLS record in `RLY_TX.ntf`.
    ///
    /// Appends the KEK exactly once after the joiner was finalized, which
    /// tells the joiner router to deliver the security material and release
    /// the joiner.
    pub fn relay_transmit(&mut self, frame: &[u8], _now: Instant) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::InvalidState)?;
        let mut tlvs = vec![
            Tlv::u16_value(TlvType::JoinerUdpPort, self.joiner_udp_port),
            Tlv::new(TlvType::JoinerIid, self.joiner_iid.to_vec()),
            Tlv::u16_value(TlvType::JoinerRouterLocator, self.joiner_router_locator),
            Tlv::new(TlvType::JoinerDtlsEncapsulation, frame.to_vec()),
        ];
        if session.need_append_kek() {
            if let Some(kek) = session.kek() {
                debug!("appending KEK to relay transmit");
                tlvs.push(Tlv::new(TlvType::JoinerRouterKek, kek.to_vec()));
                session.mark_kek_sent();
                self.stats.finalized_joiners += 1;
            }
        }
        let token = self.next_token();
        self.transmits.push_back(Message::request(
            Kind::NonConfirmable,
            meshcop::URI_RELAY_TX,
            token,
            Tlv::encode_all(&tlvs),
        ));
        Ok(())
    }

    /// Forwards a DTLS lifecycle event to the joiner session.
    pub fn handle_joiner_dtls_event(&mut self, event: DtlsEvent) {
        if let Some(session) = self.session.as_mut() {
            session.handle_dtls_event(event);
        }
    }

    /// Handles a decrypted CoAP request from the joiner.
    pub fn handle_joiner_request(&mut self, msg: &Message) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::InvalidState)?;
        session.handle_coap_request(msg)?;
        Ok(())
    }
}
