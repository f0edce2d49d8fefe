use sieve_core::{BoundedQueue, PacketJob};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LbSummary {
    pub id: usize,
    pub received: u64,
    pub dispatched: u64,
    pub per_fp: Vec<u64>,
}

/// One load-balancer shard: pops packets off its input queue and pushes
/// each onto the fast-path queue selected by the five-tuple hash. The same
/// hash drives both dispatch stages, so a flow always ends up on one FP.
pub struct LoadBalancer {
    id: usize,
    input: Arc<BoundedQueue<PacketJob>>,
    outputs: Vec<Arc<BoundedQueue<PacketJob>>>,
    received: u64,
    dispatched: u64,
    per_fp: Vec<u64>,
}

impl LoadBalancer {
    pub fn new(
        id: usize,
        input: Arc<BoundedQueue<PacketJob>>,
        outputs: Vec<Arc<BoundedQueue<PacketJob>>>,
    ) -> Self {
        let fp_count = outputs.len();
        LoadBalancer {
            id,
            input,
            outputs,
            received: 0,
            dispatched: 0,
            per_fp: vec![0; fp_count],
        }
    }

    /// Blocking pop: shutdown wakes it, and the queue contract drains any
    /// remaining packets before the final `None`.
    pub fn run(mut self) -> LbSummary {
        while let Some(job) = self.input.pop() {
            self.received += 1;
            let index = (job.tuple.shard_hash() as usize) % self.outputs.len();
            self.outputs[index].push(job);
            self.dispatched += 1;
            self.per_fp[index] += 1;
        }
        LbSummary {
            id: self.id,
            received: self.received,
            dispatched: self.dispatched,
            per_fp: self.per_fp,
        }
    }
}
