#![forbid(unsafe_code)]

use crate::{AppType, ConnectionState, FiveTuple, Flow, PacketAction};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowTableStats {
    pub active: usize,
    pub total_seen: u64,
    pub classified: u64,
    pub blocked: u64,
    pub evicted: u64,
}

/// Per-shard flow table. Owned by exactly one fast-path worker, so nothing
/// here is synchronized; reporting reads it only after the worker has
/// returned it.
#[derive(Debug)]
pub struct FlowTable {
    capacity: usize,
    table: HashMap<FiveTuple, Flow>,
    total_seen: u64,
    classified: u64,
    blocked: u64,
    evicted: u64,
}

impl FlowTable {
    pub fn new(capacity: usize) -> Self {
        FlowTable {
            capacity: capacity.max(1),
            table: HashMap::new(),
            total_seen: 0,
            classified: 0,
            blocked: 0,
            evicted: 0,
        }
    }

    /// Look up the flow for `tuple`, consulting the reverse tuple so both
    /// directions share one record, and create a NEW flow if neither
    /// direction is known. On overflow the entry with the smallest
    /// `last_seen` is evicted first.
    pub fn get_or_create(&mut self, tuple: FiveTuple, now: Instant) -> &mut Flow {
        let key = if self.table.contains_key(&tuple) {
            tuple
        } else if self.table.contains_key(&tuple.reverse()) {
            tuple.reverse()
        } else {
            if self.table.len() >= self.capacity {
                self.evict_oldest();
            }
            self.total_seen += 1;
            tuple
        };
        self.table.entry(key).or_insert_with(|| Flow::new(key, now))
    }

    pub fn get(&self, tuple: &FiveTuple) -> Option<&Flow> {
        self.table
            .get(tuple)
            .or_else(|| self.table.get(&tuple.reverse()))
    }

    /// Attach an application and hostname, once. A flow that is already
    /// CLASSIFIED keeps what it learned; an SNI set earlier is never
    /// overwritten.
    pub fn classify(&mut self, tuple: &FiveTuple, app: AppType, sni: &str) {
        let Some(key) = self.resolve_key(tuple) else {
            return;
        };
        let mut newly_classified = false;
        if let Some(flow) = self.table.get_mut(&key) {
            if flow.state != ConnectionState::Classified {
                flow.app = app;
                if flow.sni.is_empty() {
                    flow.sni = sni.to_string();
                }
                flow.state = ConnectionState::Classified;
                newly_classified = true;
            }
        }
        if newly_classified {
            self.classified += 1;
        }
    }

    /// Record an application guess without marking the flow CLASSIFIED, so
    /// a later payload can still upgrade it.
    pub fn set_app_hint(&mut self, tuple: &FiveTuple, app: AppType) {
        let Some(key) = self.resolve_key(tuple) else {
            return;
        };
        if let Some(flow) = self.table.get_mut(&key) {
            if flow.state != ConnectionState::Classified {
                flow.app = app;
            }
        }
    }

    pub fn block(&mut self, tuple: &FiveTuple) {
        let Some(key) = self.resolve_key(tuple) else {
            return;
        };
        let mut newly_blocked = false;
        if let Some(flow) = self.table.get_mut(&key) {
            if flow.state != ConnectionState::Blocked {
                newly_blocked = true;
            }
            flow.state = ConnectionState::Blocked;
            flow.action = PacketAction::Drop;
        }
        if newly_blocked {
            self.blocked += 1;
        }
    }

    /// Drop flows idle longer than `timeout` and flows that have reached
    /// CLOSED. Called opportunistically when the worker's input is idle.
    pub fn cleanup_stale(&mut self, timeout: Duration, now: Instant) -> usize {
        let before = self.table.len();
        self.table.retain(|_, flow| {
            now.duration_since(flow.last_seen) <= timeout && flow.state != ConnectionState::Closed
        });
        before - self.table.len()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FlowTableStats {
        FlowTableStats {
            active: self.table.len(),
            total_seen: self.total_seen,
            classified: self.classified,
            blocked: self.blocked,
            evicted: self.evicted,
        }
    }

    pub fn for_each(&self, mut f: impl FnMut(&Flow)) {
        for flow in self.table.values() {
            f(flow);
        }
    }

    fn resolve_key(&self, tuple: &FiveTuple) -> Option<FiveTuple> {
        if self.table.contains_key(tuple) {
            Some(*tuple)
        } else if self.table.contains_key(&tuple.reverse()) {
            Some(tuple.reverse())
        } else {
            None
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .table
            .iter()
            .min_by_key(|(_, flow)| flow.last_seen)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.table.remove(&key);
            self.evicted += 1;
        }
    }
}
