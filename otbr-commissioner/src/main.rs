//! Standalone commissioner CLI.
//!
//! Drives the [`Commissioner`] state machine over a UDP channel to a border
//! agent: petitions for the commissioner role, publishes steering data for
//! one joiner (or for any joiner), and keeps the session alive until
//! interrupted. CoAP framing uses coap-lite; securing the channel (DTLS)
//! is left to the transport in front of the agent port.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use tracing::{debug, info, warn};

use otbr_proto::ot::ExtAddress;
use otbr_proto::{
    compute_joiner_id, Code, Commissioner, Config, Event, Kind, Message, SteeringData,
    MAX_STEERING_DATA_LEN,
};

#[derive(Parser, Debug)]
#[command(name = "otbr-commissioner", about = "Thread commissioner for a border agent")]
struct Args {
    /// Host of border agent
    #[arg(short = 'H', long)]
    agent_host: String,

    /// UDP port of border agent
    #[arg(short = 'P', long)]
    agent_port: u16,

    /// Network name, for PSKc derivation by the DTLS terminator
    #[arg(short = 'N', long)]
    network_name: Option<String>,

    /// Network passphrase, for PSKc derivation by the DTLS terminator
    #[arg(short = 'C', long)]
    network_password: Option<String>,

    /// Extended PAN id in hex, for PSKc derivation by the DTLS terminator
    #[arg(short = 'X', long)]
    xpanid: Option<String>,

    /// Allow all joiners
    #[arg(short = 'A', long)]
    allow_all: bool,

    /// Joiner EUI64 value in hex
    #[arg(short = 'E', long)]
    joiner_eui64: Option<String>,

    /// Joiner's base32-thread encoded PSK
    #[arg(short = 'D', long)]
    joiner_pskd: Option<String>,

    /// Steering data length (1..=16)
    #[arg(short = 'L', long, default_value_t = MAX_STEERING_DATA_LEN)]
    steering_data_length: usize,

    /// COMM_KA requests interval in seconds, zero disables
    #[arg(short = 'i', long, default_value_t = 15)]
    keep_alive_interval: u64,

    /// Debug level (0..=7)
    #[arg(short = 'd', long, default_value_t = 3)]
    debug_level: u8,
}

// Joining Device Credential, Thread 1.1.1 section 8.2: 6 to 32 symbols,
// digits and uppercase letters excluding I, O, Q and Z.
fn check_pskd(pskd: &str) -> Result<()> {
    if !(6..=32).contains(&pskd.len()) {
        bail!("invalid PSKd length (range: 6..32)");
    }
    for ch in pskd.chars() {
        if matches!(ch, 'I' | 'O' | 'Q' | 'Z') {
            bail!("letters I, O, Q and Z are not allowed in a PSKd");
        }
        if !ch.is_ascii_uppercase() && !ch.is_ascii_digit() {
            bail!("PSKd contains a non-uppercase, non-digit symbol");
        }
    }
    Ok(())
}

fn check_network_args(args: &Args) -> Result<()> {
    if let Some(name) = &args.network_name {
        if name.is_empty() || name.len() > 16 {
            bail!("invalid network name length (range: 1..16)");
        }
    }
    if let Some(password) = &args.network_password {
        if !(6..=255).contains(&password.len()) {
            bail!("invalid network password length (range: 6..255)");
        }
    }
    if let Some(xpanid) = &args.xpanid {
        if xpanid.len() != 16 || !xpanid.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid extended PAN id, expected 16 hex digits");
        }
    }
    Ok(())
}

fn build_steering(args: &Args) -> Result<Option<SteeringData>> {
    if args.allow_all {
        return Ok(Some(SteeringData::allow_any()));
    }
    let Some(eui64) = &args.joiner_eui64 else {
        return Ok(None);
    };
    if !(1..=MAX_STEERING_DATA_LEN).contains(&args.steering_data_length) {
        bail!("steering data length out of range");
    }
    let eui64 = ExtAddress::parse(eui64).map_err(|_| anyhow::anyhow!("invalid joiner EUI64"))?;
    let mut steering = SteeringData::new(args.steering_data_length);
    steering.compute_bloom_filter(&compute_joiner_id(&eui64));
    Ok(Some(steering))
}

fn encode(msg: &Message, message_id: u16) -> Result<Vec<u8>> {
    let mut packet = Packet::new();
    packet.header.message_id = message_id;
    packet.header.set_type(match msg.kind {
        Kind::Confirmable => MessageType::Confirmable,
        Kind::NonConfirmable => MessageType::NonConfirmable,
    });
    packet.header.code = match msg.code {
        Code::Post => MessageClass::Request(RequestType::Post),
        Code::Changed => MessageClass::Response(ResponseType::Changed),
        Code::NotFound => MessageClass::Response(ResponseType::NotFound),
    };
    packet.set_token(msg.token.to_be_bytes().to_vec());
    for segment in msg.path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet.payload.clone_from(&msg.payload);
    packet
        .to_bytes()
        .map_err(|err| anyhow::anyhow!("failed to encode CoAP packet: {err:?}"))
}

fn decode(datagram: &[u8]) -> Option<Event> {
    let packet = Packet::from_bytes(datagram).ok()?;
    let mut token = [0u8; 2];
    let raw = packet.get_token();
    if raw.len() >= 2 {
        token.copy_from_slice(&raw[..2]);
    }
    let token = u16::from_be_bytes(token);

    match packet.header.code {
        MessageClass::Response(_) => Some(Event::Response {
            token,
            payload: packet.payload,
        }),
        MessageClass::Request(_) => {
            let path = packet
                .get_option(CoapOption::UriPath)
                .map(|segments| {
                    segments
                        .iter()
                        .map(|s| String::from_utf8_lossy(s).into_owned())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();
            Some(Event::Request {
                path,
                payload: packet.payload,
            })
        }
        MessageClass::Empty | MessageClass::Reserved(_) => None,
    }
}

/// Secured datagram channel to the border agent.
///
/// The shipped implementation moves opaque datagrams over UDP and leaves
/// DTLS to an external terminator. `recv` returns `None` when `wait`
/// elapsed without a datagram.
trait AgentTransport {
    fn send(&mut self, datagram: &[u8]) -> std::io::Result<()>;
    fn recv(&mut self, buf: &mut [u8], wait: Duration) -> std::io::Result<Option<usize>>;
}

struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    fn connect(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("[::]:0").context("failed to bind local socket")?;
        socket
            .connect((host, port))
            .with_context(|| format!("failed to connect to {host}:{port}"))?;
        Ok(Self { socket })
    }
}

impl AgentTransport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> std::io::Result<()> {
        self.socket.send(datagram)?;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], wait: Duration) -> std::io::Result<Option<usize>> {
        self.socket.set_read_timeout(Some(wait))?;
        match self.socket.recv(buf) {
            Ok(len) => Ok(Some(len)),
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.debug_level {
        0..=3 => "error",
        4 => "warn",
        5 => "info",
        6 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    if let Some(pskd) = &args.joiner_pskd {
        check_pskd(pskd)?;
    }
    check_network_args(&args)?;
    let steering = build_steering(&args)?;

    let mut transport = UdpTransport::connect(&args.agent_host, args.agent_port)?;
    info!(host = %args.agent_host, port = args.agent_port, "connected to border agent");

    let mut commissioner = Commissioner::new(Config {
        keep_alive_rate: Duration::from_secs(args.keep_alive_interval),
        ..Config::default()
    });

    // message ids only need to differ between retransmissions
    let mut message_id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_millis() as u16)
        .unwrap_or(0);

    commissioner.handle_connected(Instant::now());
    let mut joiner_set = false;
    let mut buf = [0u8; 1500];

    while commissioner.is_valid() {
        while let Some(msg) = commissioner.poll_transmit() {
            debug!(path = %msg.path, "sending");
            message_id = message_id.wrapping_add(1);
            if let Err(err) = transport.send(&encode(&msg, message_id)?) {
                commissioner.handle_transport_error();
                return Err(err).context("send failed");
            }
        }

        if commissioner.is_accepted() && !joiner_set {
            match (&steering, &args.joiner_pskd) {
                (Some(steering), Some(pskd)) => {
                    commissioner.set_joiner(pskd, steering, Instant::now())
                }
                (Some(steering), None) => commissioner.commissioner_set(steering, Instant::now()),
                (None, _) => {}
            }
            joiner_set = true;
            continue;
        }

        let now = Instant::now();
        let wait = commissioner
            .poll_timeout()
            .map(|t| t.saturating_duration_since(now))
            .unwrap_or(Duration::from_secs(1))
            .clamp(Duration::from_millis(10), Duration::from_secs(1));

        match transport.recv(&mut buf, wait) {
            Ok(Some(len)) => {
                if let Some(event) = decode(&buf[..len]) {
                    commissioner.handle_event(event, Instant::now());
                }
            }
            Ok(None) => {}
            Err(err) => {
                commissioner.handle_transport_error();
                return Err(err).context("receive failed");
            }
        }

        // the joiner's DTLS endpoint runs in front of the joiner router;
        // the relay payloads only pass through here
        while let Some(frame) = commissioner.poll_joiner_input() {
            debug!(len = frame.len(), "relayed joiner DTLS record");
        }

        commissioner.handle_timeout(Instant::now());
    }

    warn!("commissioner session ended");
    commissioner.resign(Instant::now());
    while let Some(msg) = commissioner.poll_transmit() {
        message_id = message_id.wrapping_add(1);
        transport.send(&encode(&msg, message_id)?)?;
    }
    Ok(())
}
