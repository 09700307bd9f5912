//! Structural CoAP message model.
//!
//! The commissioner state machine produces and consumes CoAP messages as
//! values; serialization to the wire and the DTLS transport underneath are
//! the driver's concern. Only the fields the MeshCoP exchanges actually use
//! are modeled: type, code, a two-byte token and a URI path.

use std::fmt;

/// CoAP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Confirmable,
    NonConfirmable,
}

/// CoAP method and response codes used by MeshCoP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// 0.02
    Post,
    /// 2.04, piggybacked in the ACK for confirmable requests
    Changed,
    /// 4.04
    NotFound,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Post => write!(f, "0.02"),
            Code::Changed => write!(f, "2.04"),
            Code::NotFound => write!(f, "4.04"),
        }
    }
}

/// A CoAP message as the state machines see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: Kind,
    pub code: Code,
    /// Two-byte token correlating a response with its request
    pub token: u16,
    /// URI path for requests, empty for responses
    pub path: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds a POST request for `path`.
    pub fn request(kind: Kind, path: &str, token: u16, payload: Vec<u8>) -> Self {
        Self {
            kind,
            code: Code::Post,
            token,
            path: path.to_string(),
            payload,
        }
    }

    /// Builds a response carrying the request's token.
    pub fn response(code: Code, token: u16, payload: Vec<u8>) -> Self {
        Self {
            kind: Kind::Confirmable,
            code,
            token,
            path: String::new(),
            payload,
        }
    }

    pub fn is_request(&self) -> bool {
        self.code == Code::Post
    }
}

/// An inbound CoAP event handed to the state machine by the driver.
#[derive(Debug, Clone)]
pub enum Event {
    /// A response matched by token
    Response { token: u16, payload: Vec<u8> },
    /// A request addressed to one of our resources
    Request { path: String, payload: Vec<u8> },
}
