use crate::fast_path::{FastPath, FpSummary};
use crate::load_balancer::{LbSummary, LoadBalancer};
use capture::{CaptureReader, CaptureWriter, RawRecord};
use packet_parser::{parse_packet, Transport};
use sieve_core::{
    wire_ip, BoundedQueue, EngineStats, FiveTuple, FlowTable, PacketAction, PacketJob, RuleCounts,
    RuleStore, SniClassifier, StatsSnapshot, VerdictSink,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub num_lbs: usize,
    pub fps_per_lb: usize,
    pub queue_capacity: usize,
    pub max_connections: usize,
    pub flow_timeout: Duration,
    pub drain_wait: Duration,
    pub cpu_affinity: Option<Vec<usize>>,
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_lbs: 2,
            fps_per_lb: 2,
            queue_capacity: 10_000,
            max_connections: 100_000,
            flow_timeout: Duration::from_secs(300),
            drain_wait: Duration::from_millis(500),
            cpu_affinity: None,
            verbose: false,
        }
    }
}

/// Everything a finished run can report on.
#[derive(Debug)]
pub struct EngineReport {
    pub stats: StatsSnapshot,
    pub records_read: u64,
    pub skipped: u64,
    pub lbs: Vec<LbSummary>,
    pub fps: Vec<FpSummary>,
    pub rule_counts: RuleCounts,
    pub written: u64,
    pub write_errors: u64,
    pub first_ts: Option<(u32, u32)>,
    pub last_ts: Option<(u32, u32)>,
}

/// Routes fast-path verdicts: forwards into the writer queue, drops into
/// the counters.
struct EngineSink {
    forward: Arc<BoundedQueue<PacketJob>>,
    stats: Arc<EngineStats>,
}

impl VerdictSink for EngineSink {
    fn on_verdict(&self, job: PacketJob, action: PacketAction) {
        match action {
            PacketAction::Forward => {
                self.stats.record_forwarded();
                self.forward.push(job);
            }
            PacketAction::Drop => {
                self.stats.record_dropped();
            }
        }
    }
}

/// Owns the pipeline topology: N load balancers feeding N*M fast paths,
/// one reader and one writer. Queues are built up front so `stop` can
/// reach them from any thread.
pub struct Engine {
    config: EngineConfig,
    rules: Arc<RuleStore>,
    stats: Arc<EngineStats>,
    classifier: Arc<SniClassifier>,
    running: Arc<AtomicBool>,
    lb_queues: Vec<Arc<BoundedQueue<PacketJob>>>,
    fp_queues: Vec<Arc<BoundedQueue<PacketJob>>>,
    forward_queue: Arc<BoundedQueue<PacketJob>>,
}

impl Engine {
    pub fn new(config: EngineConfig, rules: Arc<RuleStore>) -> Result<Self, String> {
        if config.num_lbs == 0 {
            return Err("load balancer count must be at least 1".into());
        }
        if config.fps_per_lb == 0 {
            return Err("fast path count per LB must be at least 1".into());
        }
        let total_fps = config.num_lbs * config.fps_per_lb;
        if let Some(cores) = &config.cpu_affinity {
            if cores.len() != total_fps {
                return Err("cpu-affinity length must match fast path count".into());
            }
        }

        let lb_queues = (0..config.num_lbs)
            .map(|_| Arc::new(BoundedQueue::new(config.queue_capacity)))
            .collect();
        let fp_queues = (0..total_fps)
            .map(|_| Arc::new(BoundedQueue::new(config.queue_capacity)))
            .collect();
        let forward_queue = Arc::new(BoundedQueue::new(config.queue_capacity));

        Ok(Engine {
            config,
            rules,
            stats: Arc::new(EngineStats::new()),
            classifier: Arc::new(SniClassifier::with_default_rules()),
            running: Arc::new(AtomicBool::new(true)),
            lb_queues,
            fp_queues,
            forward_queue,
        })
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Idempotent external stop: the reader loop observes the flag, every
    /// queue wakes its waiters, and workers drain what they already hold.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        for queue in &self.lb_queues {
            queue.shutdown();
        }
        for queue in &self.fp_queues {
            queue.shutdown();
        }
        self.forward_queue.shutdown();
    }

    /// Run the whole pipeline over one capture file. The calling thread
    /// acts as the reader; fast paths are started first, then load
    /// balancers, then the writer.
    pub fn process(&mut self, input: &Path, output: &Path) -> Result<EngineReport, String> {
        let mut reader = CaptureReader::open(input)
            .map_err(|e| format!("open input {}: {e}", input.display()))?;
        let writer = CaptureWriter::create(output, reader.header())
            .map_err(|e| format!("open output {}: {e}", output.display()))?;
        // single writer thread, mutex retained so the header write above
        // and record writes share one discipline
        let writer = Arc::new(Mutex::new(writer));

        let sink: Arc<dyn VerdictSink> = Arc::new(EngineSink {
            forward: Arc::clone(&self.forward_queue),
            stats: Arc::clone(&self.stats),
        });

        let total_fps = self.config.num_lbs * self.config.fps_per_lb;
        let mut fp_handles: Vec<JoinHandle<FpSummary>> = Vec::with_capacity(total_fps);
        for fp_id in 0..total_fps {
            let worker = FastPath::new(
                fp_id,
                Arc::clone(&self.fp_queues[fp_id]),
                FlowTable::new(self.config.max_connections),
                Arc::clone(&self.rules),
                Arc::clone(&self.classifier),
                Arc::clone(&self.stats),
                Arc::clone(&sink),
                self.config.flow_timeout,
                self.config.verbose,
            );
            let core = self
                .config
                .cpu_affinity
                .as_ref()
                .and_then(|cores| cores.get(fp_id).copied());
            fp_handles.push(thread::spawn(move || {
                if let Some(core_id) = core {
                    if let Err(e) = pin_current_thread(core_id) {
                        eprintln!("[FP{fp_id}] cpu pin failed: {e}");
                    }
                }
                worker.run()
            }));
        }

        let mut lb_handles: Vec<JoinHandle<LbSummary>> = Vec::with_capacity(self.config.num_lbs);
        for lb_id in 0..self.config.num_lbs {
            let start = lb_id * self.config.fps_per_lb;
            let outputs = self.fp_queues[start..start + self.config.fps_per_lb].to_vec();
            let worker = LoadBalancer::new(lb_id, Arc::clone(&self.lb_queues[lb_id]), outputs);
            lb_handles.push(thread::spawn(move || worker.run()));
        }

        let writer_handle = {
            let forward = Arc::clone(&self.forward_queue);
            let writer = Arc::clone(&writer);
            thread::spawn(move || run_writer(&forward, &writer))
        };

        // reader loop
        let mut records_read = 0u64;
        let mut skipped = 0u64;
        let mut first_ts = None;
        let mut last_ts = None;
        while self.running.load(Ordering::Acquire) {
            let record = match reader.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    eprintln!("[Reader] stopping early: {e}");
                    break;
                }
            };
            records_read += 1;
            if first_ts.is_none() {
                first_ts = Some((record.ts_sec, record.ts_usec));
            }
            last_ts = Some((record.ts_sec, record.ts_usec));

            let parsed = match parse_packet(&record.data) {
                Ok(parsed) => parsed,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            if !parsed.has_ip {
                skipped += 1;
                continue;
            }
            let (src_port, dst_port, tcp_flags) = match parsed.transport {
                Transport::Tcp {
                    src_port,
                    dst_port,
                    flags,
                    ..
                } => (src_port, dst_port, flags),
                Transport::Udp { src_port, dst_port } => (src_port, dst_port, 0),
                Transport::None => {
                    skipped += 1;
                    continue;
                }
            };

            let tuple = FiveTuple {
                src_ip: wire_ip(parsed.src_ip),
                dst_ip: wire_ip(parsed.dst_ip),
                src_port,
                dst_port,
                protocol: parsed.protocol,
            };
            let job = PacketJob {
                tuple,
                tcp_flags,
                ts_sec: record.ts_sec,
                ts_usec: record.ts_usec,
                orig_len: record.orig_len,
                payload_offset: parsed.payload_offset,
                payload_length: parsed.payload_length,
                data: record.data,
            };
            self.stats.record_packet(job.data.len() as u64, tuple.protocol);

            let index = (tuple.shard_hash() as usize) % self.lb_queues.len();
            self.lb_queues[index].push(job);
        }
        drop(reader);

        // let in-flight packets settle, then tear the stages down upstream
        // to downstream; shutdown pops drain whatever is still queued
        thread::sleep(self.config.drain_wait);

        for queue in &self.lb_queues {
            queue.shutdown();
        }
        let mut lbs = Vec::with_capacity(lb_handles.len());
        for handle in lb_handles {
            lbs.push(
                handle
                    .join()
                    .map_err(|_| "load balancer thread panicked".to_string())?,
            );
        }

        for queue in &self.fp_queues {
            queue.shutdown();
        }
        let mut fps = Vec::with_capacity(fp_handles.len());
        for handle in fp_handles {
            fps.push(
                handle
                    .join()
                    .map_err(|_| "fast path thread panicked".to_string())?,
            );
        }

        self.forward_queue.shutdown();
        let (written, write_errors) = writer_handle
            .join()
            .map_err(|_| "writer thread panicked".to_string())?;

        self.running.store(false, Ordering::Release);

        Ok(EngineReport {
            stats: self.stats.snapshot(),
            records_read,
            skipped,
            lbs,
            fps,
            rule_counts: self.rules.counts(),
            written,
            write_errors,
            first_ts,
            last_ts,
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_writer(
    forward: &BoundedQueue<PacketJob>,
    writer: &Mutex<CaptureWriter>,
) -> (u64, u64) {
    let mut written = 0u64;
    let mut errors = 0u64;
    loop {
        match forward.pop_timeout(Duration::from_millis(50)) {
            Some(job) => {
                let record = RawRecord {
                    ts_sec: job.ts_sec,
                    ts_usec: job.ts_usec,
                    orig_len: job.orig_len,
                    data: job.data,
                };
                match lock(writer).write_record(&record) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        errors += 1;
                        eprintln!("[Writer] write failed: {e}");
                    }
                }
            }
            None => {
                if forward.is_shutdown() && forward.is_empty() {
                    break;
                }
            }
        }
    }
    if let Err(e) = lock(writer).flush() {
        errors += 1;
        eprintln!("[Writer] flush failed: {e}");
    }
    (written, errors)
}

fn lock<'a>(writer: &'a Mutex<CaptureWriter>) -> MutexGuard<'a, CaptureWriter> {
    match writer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn pin_current_thread(core_id: usize) -> Result<(), String> {
    let cores = core_affinity::get_core_ids().ok_or("cpu affinity unsupported")?;
    let target = cores
        .into_iter()
        .find(|core| core.id == core_id)
        .ok_or_else(|| format!("cpu core {core_id} not available"))?;
    if core_affinity::set_for_current(target) {
        Ok(())
    } else {
        Err(format!("failed to pin to cpu core {core_id}"))
    }
}
