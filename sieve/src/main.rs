#![forbid(unsafe_code)]

use sieve::engine::{Engine, EngineConfig};
use sieve::report::print_report;
use sieve::runtime_config::{config_path, load_runtime_config};
use sieve_core::{parse_ip, AppType, RuleStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn print_usage(program: &str) {
    println!(
        r#"sieve - offline deep packet inspection pipeline

Usage: {program} <input.pcap> <output.pcap> [options]

Arguments:
  input.pcap     Capture file to inspect
  output.pcap    Capture file receiving every packet that was not dropped

Options:
  --block-ip <ip>        Block packets from a source IP (dotted quad)
  --block-app <name>     Block an application by label (e.g. YouTube)
  --block-domain <d>     Block a domain; '*' enables wildcard matching
  --rules <file>         Load blocking rules from a file
  --lbs <n>              Number of load balancer threads (default: 2)
  --fps <n>              Fast path threads per load balancer (default: 2)
  --verbose              Log every blocked packet
  --help, -h             Show this help

Examples:
  {program} capture.pcap filtered.pcap --block-app YouTube
  {program} capture.pcap filtered.pcap --block-ip 192.168.1.50 --block-domain *.tiktok.com
  {program} capture.pcap filtered.pcap --rules blocking_rules.txt --lbs 4 --fps 2
"#
    );
}

#[derive(Debug)]
struct Options {
    input: PathBuf,
    output: PathBuf,
    block_ips: Vec<String>,
    block_apps: Vec<String>,
    block_domains: Vec<String>,
    rules_file: Option<PathBuf>,
    num_lbs: usize,
    fps_per_lb: usize,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        input: PathBuf::from(&args[0]),
        output: PathBuf::from(&args[1]),
        block_ips: Vec::new(),
        block_apps: Vec::new(),
        block_domains: Vec::new(),
        rules_file: None,
        num_lbs: 2,
        fps_per_lb: 2,
        verbose: false,
    };

    let mut iter = args[2..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--block-ip" => opts
                .block_ips
                .push(iter.next().ok_or("Missing value for --block-ip")?.clone()),
            "--block-app" => opts
                .block_apps
                .push(iter.next().ok_or("Missing value for --block-app")?.clone()),
            "--block-domain" => opts
                .block_domains
                .push(iter.next().ok_or("Missing value for --block-domain")?.clone()),
            "--rules" => {
                opts.rules_file = Some(PathBuf::from(
                    iter.next().ok_or("Missing value for --rules")?,
                ))
            }
            "--lbs" => {
                opts.num_lbs = iter
                    .next()
                    .ok_or("Missing value for --lbs")?
                    .parse()
                    .map_err(|_| "invalid --lbs value")?
            }
            "--fps" => {
                opts.fps_per_lb = iter
                    .next()
                    .ok_or("Missing value for --fps")?
                    .parse()
                    .map_err(|_| "invalid --fps value")?
            }
            "--verbose" => opts.verbose = true,
            other => return Err(format!("Unknown flag {other}")),
        }
    }

    if opts.num_lbs == 0 {
        return Err("--lbs must be at least 1".into());
    }
    if opts.fps_per_lb == 0 {
        return Err("--fps must be at least 1".into());
    }
    Ok(opts)
}

fn apply_rules(opts: &Options, rules: &RuleStore) {
    if let Some(path) = &opts.rules_file {
        match rules.load(path) {
            Ok(summary) => {
                println!(
                    "[Rules] loaded {} rules from {}",
                    summary.loaded,
                    path.display()
                );
                for skipped in &summary.skipped {
                    eprintln!("[Rules] skipping bad line: {skipped}");
                }
            }
            Err(e) => eprintln!("[Rules] {e}"),
        }
    }

    for text in &opts.block_ips {
        match parse_ip(text) {
            Some(ip) => {
                rules.block_ip(ip);
                println!("[Rules] blocked ip {text}");
            }
            None => eprintln!("[Rules] skipping invalid IP: {text}"),
        }
    }
    for name in &opts.block_apps {
        match AppType::from_name(name) {
            Some(app) => {
                rules.block_app(app);
                println!("[Rules] blocked app {app}");
            }
            None => eprintln!("[Rules] skipping unknown app: {name}"),
        }
    }
    for domain in &opts.block_domains {
        rules.block_domain(domain);
        println!("[Rules] blocked domain {domain}");
    }
}

fn run(opts: Options) -> Result<i32, String> {
    let runtime = load_runtime_config(&config_path())?;

    let rules = Arc::new(RuleStore::new());
    apply_rules(&opts, &rules);

    let config = EngineConfig {
        num_lbs: opts.num_lbs,
        fps_per_lb: opts.fps_per_lb,
        queue_capacity: runtime.queue_capacity,
        max_connections: runtime.max_connections,
        flow_timeout: Duration::from_secs(runtime.flow_timeout_secs),
        drain_wait: Duration::from_millis(runtime.drain_wait_ms),
        cpu_affinity: runtime.cpu_affinity.clone(),
        verbose: opts.verbose,
    };

    println!(
        "[Engine] {} load balancers, {} fast paths ({} per LB)",
        config.num_lbs,
        config.num_lbs * config.fps_per_lb,
        config.fps_per_lb
    );
    println!("[Engine] processing {}", opts.input.display());

    let mut engine = Engine::new(config, rules)?;
    let report = engine.process(&opts.input, &opts.output)?;
    print_report(&report);
    println!();
    println!("Output written to: {}", opts.output.display());

    // a run in which every attempted write failed is a failed run
    if report.stats.forwarded > 0 && report.written == 0 {
        return Ok(1);
    }
    Ok(0)
}

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let program = argv
        .first()
        .cloned()
        .unwrap_or_else(|| "sieve".to_string());
    let args = &argv[1..];

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage(&program);
        return;
    }
    if args.len() < 2 {
        print_usage(&program);
        std::process::exit(1);
    }

    let opts = match parse_args(args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match run(opts) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
