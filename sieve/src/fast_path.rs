use sieve_core::{
    extract_dns_query, extract_http_host, extract_quic_sni, extract_tls_sni, is_quic_long_header,
    AppType, BoundedQueue, ConnectionState, EngineStats, FiveTuple, FlowTable, PacketAction,
    PacketJob, RuleStore, SniClassifier, VerdictSink, PROTO_TCP, PROTO_UDP,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Everything a fast-path worker hands back when its thread exits. The flow
/// table travels with it so reporting can scan flows without any locking.
#[derive(Debug)]
pub struct FpSummary {
    pub id: usize,
    pub processed: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub flows: FlowTable,
}

/// One fast-path shard: owns its input queue and flow table, classifies
/// flows, evaluates blocking rules and emits a verdict per packet.
pub struct FastPath {
    id: usize,
    input: Arc<BoundedQueue<PacketJob>>,
    flows: FlowTable,
    rules: Arc<RuleStore>,
    classifier: Arc<SniClassifier>,
    stats: Arc<EngineStats>,
    sink: Arc<dyn VerdictSink>,
    flow_timeout: Duration,
    verbose: bool,
    processed: u64,
    forwarded: u64,
    dropped: u64,
}

impl FastPath {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        input: Arc<BoundedQueue<PacketJob>>,
        flows: FlowTable,
        rules: Arc<RuleStore>,
        classifier: Arc<SniClassifier>,
        stats: Arc<EngineStats>,
        sink: Arc<dyn VerdictSink>,
        flow_timeout: Duration,
        verbose: bool,
    ) -> Self {
        FastPath {
            id,
            input,
            flows,
            rules,
            classifier,
            stats,
            sink,
            flow_timeout,
            verbose,
            processed: 0,
            forwarded: 0,
            dropped: 0,
        }
    }

    pub fn run(mut self) -> FpSummary {
        loop {
            match self.input.pop_timeout(POP_TIMEOUT) {
                Some(job) => self.handle(job),
                None => {
                    if self.input.is_shutdown() && self.input.is_empty() {
                        break;
                    }
                    let now = Instant::now();
                    self.flows.cleanup_stale(self.flow_timeout, now);
                }
            }
        }
        FpSummary {
            id: self.id,
            processed: self.processed,
            forwarded: self.forwarded,
            dropped: self.dropped,
            flows: self.flows,
        }
    }

    fn handle(&mut self, job: PacketJob) {
        self.processed += 1;
        let now = Instant::now();

        let (key, state) = {
            let flow = self.flows.get_or_create(job.tuple, now);
            let outbound = flow.tuple == job.tuple;
            flow.record_packet(job.data.len() as u64, outbound, now);
            if job.tuple.protocol == PROTO_TCP {
                flow.apply_tcp_flags(job.tcp_flags);
            }
            (flow.tuple, flow.state)
        };

        if state == ConnectionState::Blocked {
            self.dropped += 1;
            self.sink.on_verdict(job, PacketAction::Drop);
            return;
        }

        if state != ConnectionState::Classified && job.payload_length > 0 {
            self.inspect_payload(&job, &key);
        }

        let (app, sni) = match self.flows.get(&key) {
            Some(flow) => (flow.app, flow.sni.clone()),
            None => (AppType::Unknown, String::new()),
        };

        if let Some(reason) = self
            .rules
            .should_block(job.tuple.src_ip, job.tuple.dst_port, app, &sni)
        {
            self.flows.block(&key);
            self.stats.record_block(reason.kind);
            if self.verbose {
                println!("[FP{}] drop {}: blocked by {}", self.id, job.tuple, reason);
            }
            self.dropped += 1;
            self.sink.on_verdict(job, PacketAction::Drop);
            return;
        }

        self.forwarded += 1;
        self.sink.on_verdict(job, PacketAction::Forward);
    }

    /// Fingerprinters in fixed order: TLS SNI, HTTP Host, DNS query, then
    /// the QUIC scan for UDP/443. If nothing concrete is learned, fall back
    /// to a port-based guess without marking the flow classified, so a
    /// later payload can still upgrade it.
    fn inspect_payload(&mut self, job: &PacketJob, key: &FiveTuple) {
        let payload = job.payload();
        let tuple = &job.tuple;

        if tuple.dst_port == 443 || job.payload_length >= 50 {
            if let Some(sni) = extract_tls_sni(payload) {
                let app = self.classifier.classify(&sni);
                self.flows.classify(key, app, &sni);
                return;
            }
        }

        if tuple.dst_port == 80 {
            if let Some(host) = extract_http_host(payload) {
                let app = self.classifier.classify(&host);
                self.flows.classify(key, app, &host);
                return;
            }
        }

        if tuple.dst_port == 53 || tuple.src_port == 53 {
            if let Some(name) = extract_dns_query(payload) {
                self.flows.classify(key, AppType::Dns, &name);
                return;
            }
        }

        if tuple.protocol == PROTO_UDP && tuple.dst_port == 443 {
            if let Some(sni) = extract_quic_sni(payload) {
                let app = self.classifier.classify(&sni);
                self.flows.classify(key, app, &sni);
                return;
            }
            if is_quic_long_header(payload) {
                self.flows.set_app_hint(key, AppType::Quic);
                return;
            }
        }

        match tuple.dst_port {
            80 => self.flows.set_app_hint(key, AppType::Http),
            443 => self.flows.set_app_hint(key, AppType::Https),
            _ => {}
        }
    }
}
