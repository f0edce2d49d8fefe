#![forbid(unsafe_code)]

use crate::{format_ip, parse_ip, AppType};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRuleKind {
    Ip,
    Port,
    App,
    Domain,
}

impl BlockRuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockRuleKind::Ip => "ip",
            BlockRuleKind::Port => "port",
            BlockRuleKind::App => "app",
            BlockRuleKind::Domain => "domain",
        }
    }
}

impl fmt::Display for BlockRuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReason {
    pub kind: BlockRuleKind,
    pub detail: String,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.detail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleCounts {
    pub ips: usize,
    pub apps: usize,
    pub domains: usize,
    pub ports: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RulesLoadSummary {
    pub loaded: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug, Default)]
struct DomainRules {
    exact: HashSet<String>,
    patterns: Vec<String>,
}

/// Process-wide blocking rules. Four independent read-mostly sets; fast-path
/// workers only take the read side, so readers never block each other.
#[derive(Debug, Default)]
pub struct RuleStore {
    ips: RwLock<HashSet<u32>>,
    apps: RwLock<HashSet<AppType>>,
    domains: RwLock<DomainRules>,
    ports: RwLock<HashSet<u16>>,
}

impl RuleStore {
    pub fn new() -> Self {
        RuleStore::default()
    }

    pub fn block_ip(&self, ip: u32) {
        write_lock(&self.ips).insert(ip);
    }

    pub fn unblock_ip(&self, ip: u32) {
        write_lock(&self.ips).remove(&ip);
    }

    pub fn is_ip_blocked(&self, ip: u32) -> bool {
        read_lock(&self.ips).contains(&ip)
    }

    pub fn block_app(&self, app: AppType) {
        write_lock(&self.apps).insert(app);
    }

    pub fn unblock_app(&self, app: AppType) {
        write_lock(&self.apps).remove(&app);
    }

    pub fn is_app_blocked(&self, app: AppType) -> bool {
        read_lock(&self.apps).contains(&app)
    }

    /// A domain containing `*` becomes a wildcard pattern; anything else is
    /// an exact entry.
    pub fn block_domain(&self, domain: &str) {
        let mut domains = write_lock(&self.domains);
        if domain.contains('*') {
            if !domains.patterns.iter().any(|p| p == domain) {
                domains.patterns.push(domain.to_string());
            }
        } else {
            domains.exact.insert(domain.to_string());
        }
    }

    pub fn unblock_domain(&self, domain: &str) {
        let mut domains = write_lock(&self.domains);
        if domain.contains('*') {
            domains.patterns.retain(|p| p != domain);
        } else {
            domains.exact.remove(domain);
        }
    }

    pub fn is_domain_blocked(&self, domain: &str) -> bool {
        let domains = read_lock(&self.domains);
        let lower = domain.to_ascii_lowercase();
        if domains.exact.iter().any(|d| d.to_ascii_lowercase() == lower) {
            return true;
        }
        domains
            .patterns
            .iter()
            .any(|p| domain_matches_pattern(&lower, &p.to_ascii_lowercase()))
    }

    pub fn block_port(&self, port: u16) {
        write_lock(&self.ports).insert(port);
    }

    pub fn unblock_port(&self, port: u16) {
        write_lock(&self.ports).remove(&port);
    }

    pub fn is_port_blocked(&self, port: u16) -> bool {
        read_lock(&self.ports).contains(&port)
    }

    /// Evaluate every rule family in fixed priority order:
    /// IP, then port, then application, then domain.
    pub fn should_block(
        &self,
        src_ip: u32,
        dst_port: u16,
        app: AppType,
        domain: &str,
    ) -> Option<BlockReason> {
        if self.is_ip_blocked(src_ip) {
            return Some(BlockReason {
                kind: BlockRuleKind::Ip,
                detail: format_ip(src_ip),
            });
        }
        if self.is_port_blocked(dst_port) {
            return Some(BlockReason {
                kind: BlockRuleKind::Port,
                detail: dst_port.to_string(),
            });
        }
        if self.is_app_blocked(app) {
            return Some(BlockReason {
                kind: BlockRuleKind::App,
                detail: app.as_str().to_string(),
            });
        }
        if !domain.is_empty() && self.is_domain_blocked(domain) {
            return Some(BlockReason {
                kind: BlockRuleKind::Domain,
                detail: domain.to_string(),
            });
        }
        None
    }

    pub fn counts(&self) -> RuleCounts {
        let domains = read_lock(&self.domains);
        RuleCounts {
            ips: read_lock(&self.ips).len(),
            apps: read_lock(&self.apps).len(),
            domains: domains.exact.len() + domains.patterns.len(),
            ports: read_lock(&self.ports).len(),
        }
    }

    pub fn blocked_ips(&self) -> Vec<u32> {
        let mut ips: Vec<u32> = read_lock(&self.ips).iter().copied().collect();
        ips.sort_by_key(|ip| crate::ip_octets(*ip));
        ips
    }

    pub fn blocked_apps(&self) -> Vec<AppType> {
        let apps = read_lock(&self.apps);
        AppType::ALL
            .iter()
            .copied()
            .filter(|app| apps.contains(app))
            .collect()
    }

    pub fn blocked_domains(&self) -> Vec<String> {
        let domains = read_lock(&self.domains);
        let mut out: Vec<String> = domains.exact.iter().cloned().collect();
        out.sort();
        out.extend(domains.patterns.iter().cloned());
        out
    }

    pub fn blocked_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = read_lock(&self.ports).iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub fn clear_all(&self) {
        write_lock(&self.ips).clear();
        write_lock(&self.apps).clear();
        let mut domains = write_lock(&self.domains);
        domains.exact.clear();
        domains.patterns.clear();
        drop(domains);
        write_lock(&self.ports).clear();
    }

    /// Persist every rule to the sectioned plain-text format.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let mut body = String::new();
        body.push_str("[BLOCKED_IPS]\n");
        for ip in self.blocked_ips() {
            body.push_str(&format_ip(ip));
            body.push('\n');
        }
        body.push_str("\n[BLOCKED_APPS]\n");
        for app in self.blocked_apps() {
            body.push_str(app.as_str());
            body.push('\n');
        }
        body.push_str("\n[BLOCKED_DOMAINS]\n");
        for domain in self.blocked_domains() {
            body.push_str(&domain);
            body.push('\n');
        }
        body.push_str("\n[BLOCKED_PORTS]\n");
        for port in self.blocked_ports() {
            body.push_str(&port.to_string());
            body.push('\n');
        }
        fs::write(path, body).map_err(|e| format!("write rules {}: {e}", path.display()))
    }

    /// Load rules from the sectioned format. Unknown sections are ignored;
    /// individual bad lines are collected, not fatal.
    pub fn load(&self, path: &Path) -> Result<RulesLoadSummary, String> {
        let body = fs::read_to_string(path)
            .map_err(|e| format!("read rules {}: {e}", path.display()))?;

        let mut summary = RulesLoadSummary::default();
        let mut section = String::new();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                section = line.to_string();
                continue;
            }
            match section.as_str() {
                "[BLOCKED_IPS]" => match parse_ip(line) {
                    Some(ip) => {
                        self.block_ip(ip);
                        summary.loaded += 1;
                    }
                    None => summary.skipped.push(format!("invalid IP: {line}")),
                },
                "[BLOCKED_APPS]" => match AppType::from_name(line) {
                    Some(app) => {
                        self.block_app(app);
                        summary.loaded += 1;
                    }
                    None => summary.skipped.push(format!("unknown app: {line}")),
                },
                "[BLOCKED_DOMAINS]" => {
                    self.block_domain(line);
                    summary.loaded += 1;
                }
                "[BLOCKED_PORTS]" => match line.parse::<u16>() {
                    Ok(port) => {
                        self.block_port(port);
                        summary.loaded += 1;
                    }
                    Err(_) => summary.skipped.push(format!("invalid port: {line}")),
                },
                _ => {} // unknown section
            }
        }
        Ok(summary)
    }
}

/// `*.example.com` matches any subdomain and the bare apex, but not a
/// domain that merely ends with the same letters.
fn domain_matches_pattern(domain: &str, pattern: &str) -> bool {
    if let Some(rest) = pattern.strip_prefix('*') {
        if let Some(apex) = rest.strip_prefix('.') {
            return domain.ends_with(rest) || domain == apex;
        }
    }
    false
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn evaluates_in_priority_order() {
        let rules = RuleStore::new();
        let src = parse_ip("192.168.1.50").unwrap();
        rules.block_ip(src);
        rules.block_port(443);
        rules.block_app(AppType::YouTube);
        rules.block_domain("www.youtube.com");

        let reason = rules
            .should_block(src, 443, AppType::YouTube, "www.youtube.com")
            .expect("blocked");
        assert_eq!(reason.kind, BlockRuleKind::Ip);

        rules.unblock_ip(src);
        let reason = rules
            .should_block(src, 443, AppType::YouTube, "www.youtube.com")
            .expect("blocked");
        assert_eq!(reason.kind, BlockRuleKind::Port);

        rules.unblock_port(443);
        let reason = rules
            .should_block(src, 443, AppType::YouTube, "www.youtube.com")
            .expect("blocked");
        assert_eq!(reason.kind, BlockRuleKind::App);

        rules.unblock_app(AppType::YouTube);
        let reason = rules
            .should_block(src, 443, AppType::YouTube, "www.youtube.com")
            .expect("blocked");
        assert_eq!(reason.kind, BlockRuleKind::Domain);
        assert_eq!(reason.detail, "www.youtube.com");

        rules.unblock_domain("www.youtube.com");
        assert!(rules
            .should_block(src, 443, AppType::YouTube, "www.youtube.com")
            .is_none());
    }

    #[test]
    fn wildcard_matches_subdomains_and_apex_only() {
        let rules = RuleStore::new();
        rules.block_domain("*.example.com");
        assert!(rules.is_domain_blocked("a.example.com"));
        assert!(rules.is_domain_blocked("deep.a.example.com"));
        assert!(rules.is_domain_blocked("example.com"));
        assert!(rules.is_domain_blocked("A.EXAMPLE.COM"));
        assert!(!rules.is_domain_blocked("badexample.com"));
        assert!(!rules.is_domain_blocked("example.com.evil.net"));
    }

    #[test]
    fn empty_domain_never_matches() {
        let rules = RuleStore::new();
        rules.block_domain("*.example.com");
        assert!(rules
            .should_block(0, 1234, AppType::Unknown, "")
            .is_none());
    }

    #[test]
    fn save_clear_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.txt");

        let rules = RuleStore::new();
        rules.block_ip(parse_ip("10.1.2.3").unwrap());
        rules.block_ip(parse_ip("192.168.1.50").unwrap());
        rules.block_app(AppType::Telegram);
        rules.block_app(AppType::TikTok);
        rules.block_domain("ads.example.com");
        rules.block_domain("*.tracker.net");
        rules.block_port(8080);
        rules.save(&path).unwrap();

        let before = (
            rules.blocked_ips(),
            rules.blocked_apps(),
            rules.blocked_domains(),
            rules.blocked_ports(),
        );

        rules.clear_all();
        assert_eq!(rules.counts(), RuleCounts::default());

        let summary = rules.load(&path).unwrap();
        assert_eq!(summary.loaded, 7);
        assert!(summary.skipped.is_empty());
        let after = (
            rules.blocked_ips(),
            rules.blocked_apps(),
            rules.blocked_domains(),
            rules.blocked_ports(),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn load_skips_bad_lines_and_unknown_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.txt");
        fs::write(
            &path,
            "[BLOCKED_IPS]\n10.0.0.1\nnot-an-ip\n\n[BLOCKED_APPS]\nYouTube\nMySpace\n\n[FUTURE_SECTION]\nwhatever\n\n[BLOCKED_PORTS]\n22\n99999\n",
        )
        .unwrap();

        let rules = RuleStore::new();
        let summary = rules.load(&path).unwrap();
        assert_eq!(summary.loaded, 3);
        assert_eq!(summary.skipped.len(), 3);
        assert!(rules.is_ip_blocked(parse_ip("10.0.0.1").unwrap()));
        assert!(rules.is_app_blocked(AppType::YouTube));
        assert!(rules.is_port_blocked(22));
    }
}
