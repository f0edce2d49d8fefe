#![forbid(unsafe_code)]

use crate::{BlockRuleKind, PROTO_TCP, PROTO_UDP};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, bumped from every pipeline stage.
#[derive(Debug, Default)]
pub struct EngineStats {
    total_packets: AtomicU64,
    total_bytes: AtomicU64,
    tcp_packets: AtomicU64,
    udp_packets: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    blocked_by_ip: AtomicU64,
    blocked_by_port: AtomicU64,
    blocked_by_app: AtomicU64,
    blocked_by_domain: AtomicU64,
}

/// Plain-value copy of the counters for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub blocked_by_ip: u64,
    pub blocked_by_port: u64,
    pub blocked_by_app: u64,
    pub blocked_by_domain: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        EngineStats::default()
    }

    pub fn record_packet(&self, bytes: u64, protocol: u8) {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        match protocol {
            PROTO_TCP => {
                self.tcp_packets.fetch_add(1, Ordering::Relaxed);
            }
            PROTO_UDP => {
                self.udp_packets.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self, kind: BlockRuleKind) {
        let counter = match kind {
            BlockRuleKind::Ip => &self.blocked_by_ip,
            BlockRuleKind::Port => &self.blocked_by_port,
            BlockRuleKind::App => &self.blocked_by_app,
            BlockRuleKind::Domain => &self.blocked_by_domain,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_packets: self.total_packets.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            blocked_by_ip: self.blocked_by_ip.load(Ordering::Relaxed),
            blocked_by_port: self.blocked_by_port.load(Ordering::Relaxed),
            blocked_by_app: self.blocked_by_app.load(Ordering::Relaxed),
            blocked_by_domain: self.blocked_by_domain.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn drop_rate(&self) -> f64 {
        if self.total_packets == 0 {
            0.0
        } else {
            100.0 * self.dropped as f64 / self.total_packets as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_protocol() {
        let stats = EngineStats::new();
        stats.record_packet(100, PROTO_TCP);
        stats.record_packet(200, PROTO_UDP);
        stats.record_packet(50, PROTO_TCP);
        stats.record_forwarded();
        stats.record_dropped();
        stats.record_block(BlockRuleKind::App);
        stats.record_block(BlockRuleKind::App);
        stats.record_block(BlockRuleKind::Domain);

        let snap = stats.snapshot();
        assert_eq!(snap.total_packets, 3);
        assert_eq!(snap.total_bytes, 350);
        assert_eq!(snap.tcp_packets, 2);
        assert_eq!(snap.udp_packets, 1);
        assert_eq!(snap.forwarded, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.blocked_by_app, 2);
        assert_eq!(snap.blocked_by_domain, 1);
        assert_eq!(snap.blocked_by_ip, 0);
    }

    #[test]
    fn drop_rate_handles_zero_packets() {
        assert_eq!(StatsSnapshot::default().drop_rate(), 0.0);
        let stats = EngineStats::new();
        stats.record_packet(10, PROTO_TCP);
        stats.record_packet(10, PROTO_TCP);
        stats.record_dropped();
        assert!((stats.snapshot().drop_rate() - 50.0).abs() < f64::EPSILON);
    }
}
