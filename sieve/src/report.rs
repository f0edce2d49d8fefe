use crate::engine::EngineReport;
use chrono::{DateTime, Utc};
use sieve_core::AppType;
use std::collections::HashMap;

const TOP_DOMAINS: usize = 20;

/// Print the end-of-run report: totals, per-worker counters, the per-app
/// breakdown and the most-seen domains.
pub fn print_report(report: &EngineReport) {
    let stats = &report.stats;

    println!();
    println!("=== Processing report ===");
    println!("Records read:       {}", report.records_read);
    println!("Skipped (non-IP or unparseable): {}", report.skipped);
    println!("Packets processed:  {}", stats.total_packets);
    println!("Bytes processed:    {}", stats.total_bytes);
    println!("TCP / UDP:          {} / {}", stats.tcp_packets, stats.udp_packets);
    println!("Forwarded:          {}", stats.forwarded);
    println!(
        "Dropped:            {} ({:.2}% drop rate)",
        stats.dropped,
        stats.drop_rate()
    );
    println!(
        "Written to output:  {} ({} write failures)",
        report.written, report.write_errors
    );
    if let (Some(first), Some(last)) = (report.first_ts, report.last_ts) {
        println!("Capture window:     {} - {}", format_ts(first), format_ts(last));
    }

    println!();
    println!("=== Workers ===");
    for lb in &report.lbs {
        println!(
            "LB{} received={} dispatched={} per-fp={:?}",
            lb.id, lb.received, lb.dispatched, lb.per_fp
        );
    }
    for fp in &report.fps {
        let flows = fp.flows.stats();
        println!(
            "FP{} processed={} forwarded={} dropped={} flows={} (seen={} classified={} blocked={} evicted={})",
            fp.id,
            fp.processed,
            fp.forwarded,
            fp.dropped,
            flows.active,
            flows.total_seen,
            flows.classified,
            flows.blocked,
            flows.evicted
        );
    }

    let mut app_counts: HashMap<AppType, u64> = HashMap::new();
    let mut domain_counts: HashMap<String, u64> = HashMap::new();
    let mut total_flows = 0u64;
    for fp in &report.fps {
        fp.flows.for_each(|flow| {
            total_flows += 1;
            *app_counts.entry(flow.app).or_insert(0) += 1;
            if !flow.sni.is_empty() {
                *domain_counts.entry(flow.sni.clone()).or_insert(0) += 1;
            }
        });
    }

    println!();
    println!("=== Applications ({total_flows} flows) ===");
    let mut apps: Vec<(AppType, u64)> = app_counts.into_iter().collect();
    apps.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.as_str().cmp(b.0.as_str())));
    let unidentified = apps
        .iter()
        .find(|(app, _)| *app == AppType::Unknown)
        .map(|(_, count)| *count)
        .unwrap_or(0);
    println!(
        "Identified: {}  Unidentified: {}",
        total_flows - unidentified,
        unidentified
    );
    for (app, count) in apps {
        let pct = if total_flows > 0 {
            100.0 * count as f64 / total_flows as f64
        } else {
            0.0
        };
        println!("{:<12} {:>8}  ({pct:.1}%)", app.as_str(), count);
    }

    if !domain_counts.is_empty() {
        println!();
        println!("=== Top domains ===");
        let mut domains: Vec<(String, u64)> = domain_counts.into_iter().collect();
        domains.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (domain, count) in domains.into_iter().take(TOP_DOMAINS) {
            println!("{domain:<45} {count:>6}");
        }
    }

    println!();
    println!(
        "Rule hits: ip={} port={} app={} domain={}",
        stats.blocked_by_ip, stats.blocked_by_port, stats.blocked_by_app, stats.blocked_by_domain
    );
    println!(
        "Rules configured: ips={} apps={} domains={} ports={}",
        report.rule_counts.ips,
        report.rule_counts.apps,
        report.rule_counts.domains,
        report.rule_counts.ports
    );
}

fn format_ts((sec, usec): (u32, u32)) -> String {
    match DateTime::<Utc>::from_timestamp(sec as i64, usec.saturating_mul(1000)) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string(),
        None => format!("{sec}.{usec:06}"),
    }
}
