//! Joiner-side DTLS session state.
//!
//! A [`JoinerSession`] is created when the commissioner publishes steering
//! data and serves the `c/fj` finalize resource over the joiner's DTLS
//! session. The DTLS handshake itself happens elsewhere; the session only
//! tracks whether a secure channel currently exists and latches the KEK the
//! handshake produced so the commissioner can hand it to the joiner router
//! exactly once.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::coap::{self, Message};
use crate::meshcop::{self, State, Tlv, KEK_SIZE};
use crate::{Error, Result};

/// DTLS session lifecycle events delivered by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsEvent {
    /// Handshake finished; the exporter produced the KEK
    Ready { kek: [u8; KEK_SIZE] },
    /// Peer closed the session
    Close,
    /// Fatal session error
    Error,
    /// Session torn down locally
    End,
}

pub struct JoinerSession {
    pskd: String,
    kek: Option<[u8; KEK_SIZE]>,
    need_append_kek: bool,
    active: bool,
    transmits: VecDeque<Message>,
}

impl JoinerSession {
    pub fn new(pskd: &str) -> Self {
        Self {
            pskd: pskd.to_string(),
            kek: None,
            need_append_kek: false,
            active: false,
            transmits: VecDeque::new(),
        }
    }

    pub fn pskd(&self) -> &str {
        &self.pskd
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn handle_dtls_event(&mut self, event: DtlsEvent) {
        match event {
            DtlsEvent::Ready { kek } => {
                debug!("joiner session established");
                self.kek = Some(kek);
                self.active = true;
            }
            DtlsEvent::Close | DtlsEvent::Error | DtlsEvent::End => {
                debug!(?event, "joiner session closed");
                self.active = false;
            }
        }
    }

    /// Queues a CoAP message toward the joiner.
    ///
    /// Fails without sending anything when no DTLS session is established.
    pub fn send(&mut self, msg: Message) -> Result<()> {
        if !self.active {
            warn!("cannot send to joiner, no session");
            return Err(Error::InvalidState);
        }
        self.transmits.push_back(msg);
        Ok(())
    }

    /// Next CoAP message to write into the DTLS session, if any.
    pub fn poll_transmit(&mut self) -> Option<Message> {
        self.transmits.pop_front()
    }

    /// Handles a CoAP request received over the joiner's DTLS session.
    ///
    /// Returns true when the request was a finalize and the joiner was
    /// accepted.
    pub fn handle_coap_request(&mut self, msg: &Message) -> Result<bool> {
        if msg.path == meshcop::URI_JOINER_FINALIZE {
            self.handle_finalize(msg)?;
            return Ok(true);
        }
        warn!(path = %msg.path, "unexpected request from joiner");
        self.send(Message::response(coap::Code::NotFound, msg.token, Vec::new()))?;
        Ok(false)
    }

    // JOIN_FIN.req is answered unconditionally with Accept; vendor data in
    // the request is not evaluated. The KEK becomes due for delivery to the
    // joiner router on the next relay transmit.
    fn handle_finalize(&mut self, msg: &Message) -> Result<()> {
        debug!("received joiner finalize");
        let payload = Tlv::encode_all(&[Tlv::state(State::Accept)]);
        self.send(Message::response(coap::Code::Changed, msg.token, payload))?;
        self.need_append_kek = true;
        Ok(())
    }

    pub fn kek(&self) -> Option<&[u8; KEK_SIZE]> {
        self.kek.as_ref()
    }

    /// True when a KEK is latched and has not been relayed yet.
    pub fn need_append_kek(&self) -> bool {
        self.need_append_kek && self.kek.is_some()
    }

    pub fn mark_kek_sent(&mut self) {
        self.need_append_kek = false;
    }
}
