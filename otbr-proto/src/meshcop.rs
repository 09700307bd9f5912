//! MeshCoP TLV codec, URI constants and protocol values.

use bytes::{Buf, BufMut};

use crate::{Error, Result};

/// `MGMT_COMMISSIONER_PETITION` resource
pub const URI_PETITION: &str = "c/cp";
/// `MGMT_COMMISSIONER_KEEP_ALIVE` resource
pub const URI_KEEP_ALIVE: &str = "c/ca";
/// `MGMT_COMMISSIONER_SET` resource
pub const URI_COMMISSIONER_SET: &str = "c/cs";
/// `RLY_RX` resource, served by the commissioner
pub const URI_RELAY_RX: &str = "c/rt";
/// `RLY_TX` resource, served by the joiner router
pub const URI_RELAY_TX: &str = "c/tx";
/// `JOIN_FIN` resource, served over the joiner DTLS session
pub const URI_JOINER_FINALIZE: &str = "c/fj";

/// Size of the Key Encryption Key delivered to the joiner router
pub const KEK_SIZE: usize = 32;
/// UDP port the joiner session DTLS server listens on
pub const JOINER_SESSION_PORT: u16 = 49192;

/// MeshCoP TLV types carried by the commissioning exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlvType {
    SteeringData,
    CommissionerId,
    CommissionerSessionId,
    State,
    JoinerDtlsEncapsulation,
    JoinerUdpPort,
    JoinerIid,
    JoinerRouterLocator,
    JoinerRouterKek,
    Unknown(u8),
}

impl From<u8> for TlvType {
    fn from(value: u8) -> Self {
        match value {
            0x08 => TlvType::SteeringData,
            0x0a => TlvType::CommissionerId,
            0x0b => TlvType::CommissionerSessionId,
            0x10 => TlvType::State,
            0x12 => TlvType::JoinerUdpPort,
            0x13 => TlvType::JoinerIid,
            0x14 => TlvType::JoinerRouterLocator,
            0x15 => TlvType::JoinerDtlsEncapsulation,
            0x16 => TlvType::JoinerRouterKek,
            other => TlvType::Unknown(other),
        }
    }
}

impl From<TlvType> for u8 {
    fn from(ty: TlvType) -> u8 {
        match ty {
            TlvType::SteeringData => 0x08,
            TlvType::CommissionerId => 0x0a,
            TlvType::CommissionerSessionId => 0x0b,
            TlvType::State => 0x10,
            TlvType::JoinerUdpPort => 0x12,
            TlvType::JoinerIid => 0x13,
            TlvType::JoinerRouterLocator => 0x14,
            TlvType::JoinerDtlsEncapsulation => 0x15,
            TlvType::JoinerRouterKek => 0x16,
            TlvType::Unknown(other) => other,
        }
    }
}

/// Value of the State TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Reject,
    Pending,
    Accept,
}

impl State {
    pub fn from_i8(value: i8) -> Result<Self> {
        match value {
            -1 => Ok(State::Reject),
            0 => Ok(State::Pending),
            1 => Ok(State::Accept),
            _ => Err(Error::Parse),
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            State::Reject => -1,
            State::Pending => 0,
            State::Accept => 1,
        }
    }
}

/// One decoded TLV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub ty: TlvType,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(ty: TlvType, value: Vec<u8>) -> Self {
        Self { ty, value }
    }

    pub fn u8_value(ty: TlvType, value: u8) -> Self {
        Self::new(ty, vec![value])
    }

    pub fn u16_value(ty: TlvType, value: u16) -> Self {
        Self::new(ty, value.to_be_bytes().to_vec())
    }

    pub fn state(state: State) -> Self {
        Self::new(TlvType::State, vec![state.as_i8() as u8])
    }

    /// Interprets a one-byte value.
    pub fn as_u8(&self) -> Result<u8> {
        match self.value.as_slice() {
            [b] => Ok(*b),
            _ => Err(Error::Parse),
        }
    }

    /// Interprets a two-byte big-endian value.
    pub fn as_u16(&self) -> Result<u16> {
        match self.value.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(Error::Parse),
        }
    }

    pub fn as_state(&self) -> Result<State> {
        State::from_i8(self.as_u8()? as i8)
    }

    /// Appends the TLV to `buf`, using the extended length form when the
    /// value exceeds 254 bytes.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.ty.into());
        if self.value.len() >= 0xff {
            buf.put_u8(0xff);
            buf.put_u16(self.value.len() as u16);
        } else {
            buf.put_u8(self.value.len() as u8);
        }
        buf.put_slice(&self.value);
    }

    /// Decodes a single TLV from the front of `buf`.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(Error::Parse);
        }
        let ty = TlvType::from(buf.get_u8());
        let mut len = buf.get_u8() as usize;
        if len == 0xff {
            if buf.remaining() < 2 {
                return Err(Error::Parse);
            }
            len = buf.get_u16() as usize;
        }
        if buf.remaining() < len {
            return Err(Error::Parse);
        }
        let mut value = vec![0; len];
        buf.copy_to_slice(&mut value);
        Ok(Self { ty, value })
    }

    /// Decodes a whole payload into its TLV sequence.
    pub fn decode_all(mut payload: &[u8]) -> Result<Vec<Self>> {
        let mut tlvs = Vec::new();
        while payload.has_remaining() {
            tlvs.push(Self::decode(&mut payload)?);
        }
        Ok(tlvs)
    }

    /// Encodes a TLV sequence into a fresh payload.
    pub fn encode_all(tlvs: &[Self]) -> Vec<u8> {
        let mut buf = Vec::new();
        for tlv in tlvs {
            tlv.encode(&mut buf);
        }
        buf
    }
}

/// Returns the first TLV of type `ty`, if present.
pub fn find<'a>(tlvs: &'a [Tlv], ty: TlvType) -> Option<&'a Tlv> {
    tlvs.iter().find(|tlv| tlv.ty == ty)
}
