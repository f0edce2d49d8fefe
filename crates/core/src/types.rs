#![forbid(unsafe_code)]

use std::fmt;
use std::time::Instant;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_ACK: u8 = 0x10;

/// Identity of one direction of a flow. IP addresses are kept in on-wire
/// byte order (first dotted octet in the low byte); equality, hashing and
/// formatting all operate on that representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl FiveTuple {
    pub fn reverse(&self) -> FiveTuple {
        FiveTuple {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }

    /// Deterministic shard hash, stable across runs and symmetric in the
    /// two endpoints so a tuple and its reverse land on the same shard.
    pub fn shard_hash(&self) -> u64 {
        let a = ((self.src_ip as u64) << 16) | self.src_port as u64;
        let b = ((self.dst_ip as u64) << 16) | self.dst_port as u64;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut hash = splitmix64(lo);
        hash = splitmix64(hash ^ hi);
        splitmix64(hash ^ self.protocol as u64)
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            PROTO_TCP => "TCP",
            PROTO_UDP => "UDP",
            _ => "?",
        };
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            format_ip(self.src_ip),
            self.src_port,
            format_ip(self.dst_ip),
            self.dst_port,
            proto
        )
    }
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Pack the four dotted octets into the wire-order u32.
pub fn wire_ip(octets: [u8; 4]) -> u32 {
    u32::from_le_bytes(octets)
}

pub fn ip_octets(ip: u32) -> [u8; 4] {
    ip.to_le_bytes()
}

pub fn format_ip(ip: u32) -> String {
    let o = ip_octets(ip);
    format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3])
}

/// Strict dotted-quad parse; `None` on anything that is not four decimal
/// octets in range.
pub fn parse_ip(text: &str) -> Option<u32> {
    let mut octets = [0u8; 4];
    let mut parts = 0;
    for part in text.split('.') {
        if parts == 4 {
            return None;
        }
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        octets[parts] = part.parse().ok()?;
        parts += 1;
    }
    if parts != 4 {
        return None;
    }
    Some(wire_ip(octets))
}

/// Application labels this pipeline can attach to a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppType {
    Unknown,
    Http,
    Https,
    Dns,
    Tls,
    Quic,
    Google,
    Facebook,
    YouTube,
    Twitter,
    Instagram,
    Netflix,
    Amazon,
    Microsoft,
    Apple,
    WhatsApp,
    Telegram,
    TikTok,
    Spotify,
    Zoom,
    Discord,
    GitHub,
    Cloudflare,
}

impl AppType {
    pub const ALL: [AppType; 23] = [
        AppType::Unknown,
        AppType::Http,
        AppType::Https,
        AppType::Dns,
        AppType::Tls,
        AppType::Quic,
        AppType::Google,
        AppType::Facebook,
        AppType::YouTube,
        AppType::Twitter,
        AppType::Instagram,
        AppType::Netflix,
        AppType::Amazon,
        AppType::Microsoft,
        AppType::Apple,
        AppType::WhatsApp,
        AppType::Telegram,
        AppType::TikTok,
        AppType::Spotify,
        AppType::Zoom,
        AppType::Discord,
        AppType::GitHub,
        AppType::Cloudflare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Unknown => "Unknown",
            AppType::Http => "HTTP",
            AppType::Https => "HTTPS",
            AppType::Dns => "DNS",
            AppType::Tls => "TLS",
            AppType::Quic => "QUIC",
            AppType::Google => "Google",
            AppType::Facebook => "Facebook",
            AppType::YouTube => "YouTube",
            AppType::Twitter => "Twitter",
            AppType::Instagram => "Instagram",
            AppType::Netflix => "Netflix",
            AppType::Amazon => "Amazon",
            AppType::Microsoft => "Microsoft",
            AppType::Apple => "Apple",
            AppType::WhatsApp => "WhatsApp",
            AppType::Telegram => "Telegram",
            AppType::TikTok => "TikTok",
            AppType::Spotify => "Spotify",
            AppType::Zoom => "Zoom",
            AppType::Discord => "Discord",
            AppType::GitHub => "GitHub",
            AppType::Cloudflare => "Cloudflare",
        }
    }

    pub fn from_name(name: &str) -> Option<AppType> {
        AppType::ALL
            .iter()
            .copied()
            .find(|app| app.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Established,
    Classified,
    Blocked,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAction {
    Forward,
    Drop,
}

/// Per-flow record. Owned by exactly one fast-path worker; nothing here is
/// synchronized.
#[derive(Debug, Clone)]
pub struct Flow {
    pub tuple: FiveTuple,
    pub state: ConnectionState,
    pub app: AppType,
    pub sni: String,
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub syn_seen: bool,
    pub syn_ack_seen: bool,
    pub fin_seen: bool,
    pub action: PacketAction,
}

impl Flow {
    pub fn new(tuple: FiveTuple, now: Instant) -> Self {
        Flow {
            tuple,
            state: ConnectionState::New,
            app: AppType::Unknown,
            sni: String::new(),
            packets_in: 0,
            packets_out: 0,
            bytes_in: 0,
            bytes_out: 0,
            first_seen: now,
            last_seen: now,
            syn_seen: false,
            syn_ack_seen: false,
            fin_seen: false,
            action: PacketAction::Forward,
        }
    }

    pub fn record_packet(&mut self, size: u64, outbound: bool, now: Instant) {
        if outbound {
            self.packets_out += 1;
            self.bytes_out += size;
        } else {
            self.packets_in += 1;
            self.bytes_in += size;
        }
        self.last_seen = now;
    }

    /// Observe TCP flags and advance the connection state. A BLOCKED flow
    /// keeps recording observation bits but never leaves BLOCKED.
    pub fn apply_tcp_flags(&mut self, flags: u8) {
        if flags & TCP_SYN != 0 {
            if flags & TCP_ACK != 0 {
                self.syn_ack_seen = true;
            } else {
                self.syn_seen = true;
            }
        }
        if flags & TCP_FIN != 0 {
            self.fin_seen = true;
        }

        if self.state == ConnectionState::Blocked {
            return;
        }

        if self.state == ConnectionState::New
            && self.syn_seen
            && self.syn_ack_seen
            && flags & TCP_ACK != 0
        {
            self.state = ConnectionState::Established;
        }
        if flags & TCP_RST != 0 {
            self.state = ConnectionState::Closed;
        }
        if self.fin_seen && flags & TCP_ACK != 0 {
            self.state = ConnectionState::Closed;
        }
    }
}

/// One packet travelling through the pipeline. The raw bytes are owned and
/// move between stages; `payload_offset`/`payload_length` index into them.
#[derive(Debug, Clone)]
pub struct PacketJob {
    pub tuple: FiveTuple,
    pub data: Vec<u8>,
    pub tcp_flags: u8,
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub orig_len: u32,
    pub payload_offset: usize,
    pub payload_length: usize,
}

impl PacketJob {
    pub fn payload(&self) -> &[u8] {
        &self.data[self.payload_offset..self.payload_offset + self.payload_length]
    }
}

/// Where a fast-path worker delivers its per-packet verdicts. The engine
/// wires forwards into the writer queue and drops into counters.
pub trait VerdictSink: Send + Sync {
    fn on_verdict(&self, job: PacketJob, action: PacketAction);
}
