#![forbid(unsafe_code)]

use crate::AppType;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use packet_parser::read_u16;

const TLS_CONTENT_HANDSHAKE: u8 = 0x16;
const TLS_HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const TLS_EXTENSION_SNI: u16 = 0x0000;
const SNI_TYPE_HOSTNAME: u8 = 0x00;

/// Extract the server name from a TLS ClientHello, or `None` if the payload
/// is not a ClientHello or any declared length would run past the buffer.
pub fn extract_tls_sni(payload: &[u8]) -> Option<String> {
    // record header (5) + handshake header (4) at minimum
    if payload.len() < 9 {
        return None;
    }
    if payload[0] != TLS_CONTENT_HANDSHAKE {
        return None;
    }
    let version = read_u16(&payload[1..3]);
    if !(0x0300..=0x0304).contains(&version) {
        return None;
    }
    let record_length = read_u16(&payload[3..5]) as usize;
    if record_length > payload.len() - 5 {
        return None;
    }
    if payload[5] != TLS_HANDSHAKE_CLIENT_HELLO {
        return None;
    }

    // handshake header (type + 24-bit length), then client version + random
    let mut offset = 5 + 4;
    offset += 2 + 32;

    let session_id_len = *payload.get(offset)? as usize;
    offset += 1 + session_id_len;

    let cipher_suites_len = read_u16(payload.get(offset..offset + 2)?) as usize;
    offset += 2 + cipher_suites_len;

    let compression_len = *payload.get(offset)? as usize;
    offset += 1 + compression_len;

    let extensions_len = read_u16(payload.get(offset..offset + 2)?) as usize;
    offset += 2;
    let extensions_end = offset.checked_add(extensions_len)?;
    if extensions_end > payload.len() {
        return None;
    }

    while offset + 4 <= extensions_end {
        let extension_type = read_u16(&payload[offset..offset + 2]);
        let extension_len = read_u16(&payload[offset + 2..offset + 4]) as usize;
        offset += 4;
        if offset + extension_len > extensions_end {
            return None;
        }
        if extension_type == TLS_EXTENSION_SNI {
            if extension_len < 5 {
                return None;
            }
            let list_len = read_u16(&payload[offset..offset + 2]) as usize;
            let name_type = payload[offset + 2];
            let name_len = read_u16(&payload[offset + 3..offset + 5]) as usize;
            if name_type != SNI_TYPE_HOSTNAME {
                return None;
            }
            if name_len > extension_len - 5 || list_len < name_len + 3 {
                return None;
            }
            let name = &payload[offset + 5..offset + 5 + name_len];
            return std::str::from_utf8(name).ok().map(str::to_string);
        }
        offset += extension_len;
    }
    None
}

const HTTP_METHODS: [&[u8; 4]; 7] = [b"GET ", b"POST", b"PUT ", b"HEAD", b"DELE", b"PATC", b"OPTI"];

/// Extract the `Host:` header value from an HTTP request, with any trailing
/// `:port` stripped.
pub fn extract_http_host(payload: &[u8]) -> Option<String> {
    if payload.len() < 4 {
        return None;
    }
    if !HTTP_METHODS.iter().any(|m| payload[..4] == m[..]) {
        return None;
    }

    let mut i = 0;
    while i + 5 < payload.len() {
        if payload[i].eq_ignore_ascii_case(&b'h')
            && payload[i + 1].eq_ignore_ascii_case(&b'o')
            && payload[i + 2].eq_ignore_ascii_case(&b's')
            && payload[i + 3].eq_ignore_ascii_case(&b't')
            && payload[i + 4] == b':'
        {
            let mut start = i + 5;
            while start < payload.len() && (payload[start] == b' ' || payload[start] == b'\t') {
                start += 1;
            }
            let mut end = start;
            while end < payload.len() && payload[end] != b'\r' && payload[end] != b'\n' {
                end += 1;
            }
            if end > start {
                let value = std::str::from_utf8(&payload[start..end]).ok()?;
                let host = match value.find(':') {
                    Some(pos) => &value[..pos],
                    None => value,
                };
                return Some(host.to_string());
            }
        }
        i += 1;
    }
    None
}

/// Extract the first queried name from a DNS query. A label longer than 63
/// bytes (compression pointers included) ends the parse.
pub fn extract_dns_query(payload: &[u8]) -> Option<String> {
    if payload.len() < 12 {
        return None;
    }
    if payload[2] & 0x80 != 0 {
        return None; // response, not a query
    }
    let qdcount = read_u16(&payload[4..6]);
    if qdcount == 0 {
        return None;
    }

    let mut offset = 12;
    let mut name = Vec::new();
    while offset < payload.len() {
        let label_len = payload[offset] as usize;
        if label_len == 0 || label_len > 63 {
            break;
        }
        offset += 1;
        if offset + label_len > payload.len() {
            break;
        }
        if !name.is_empty() {
            name.push(b'.');
        }
        name.extend_from_slice(&payload[offset..offset + label_len]);
        offset += label_len;
    }
    if name.is_empty() {
        return None;
    }
    String::from_utf8(name).ok()
}

pub fn is_quic_long_header(payload: &[u8]) -> bool {
    payload.len() >= 5 && payload[0] & 0x80 != 0
}

/// Best-effort SNI scan over a QUIC Initial packet: look for a ClientHello
/// handshake byte and retry the TLS extractor at that position minus the
/// record header. Returning `None` is the common case.
pub fn extract_quic_sni(payload: &[u8]) -> Option<String> {
    if !is_quic_long_header(payload) {
        return None;
    }
    let mut i = 5;
    while i + 50 < payload.len() {
        if payload[i] == TLS_HANDSHAKE_CLIENT_HELLO {
            if let Some(sni) = extract_tls_sni(&payload[i - 5..]) {
                return Some(sni);
            }
        }
        i += 1;
    }
    None
}

/// Maps an observed hostname to an application label via case-insensitive
/// substring rules. Patterns are tried in declaration order; the first
/// match wins.
#[derive(Debug)]
pub struct SniClassifier {
    matcher: AhoCorasick,
    apps: Vec<AppType>,
}

const APP_PATTERNS: &[(&str, AppType)] = &[
    ("google", AppType::Google),
    ("gstatic", AppType::Google),
    ("googleapis", AppType::Google),
    ("ggpht", AppType::Google),
    ("gvt1", AppType::Google),
    ("youtube", AppType::YouTube),
    ("ytimg", AppType::YouTube),
    ("youtu.be", AppType::YouTube),
    ("yt3.ggpht", AppType::YouTube),
    ("facebook", AppType::Facebook),
    ("fbcdn", AppType::Facebook),
    ("fb.com", AppType::Facebook),
    ("fbsbx", AppType::Facebook),
    ("meta.com", AppType::Facebook),
    ("instagram", AppType::Instagram),
    ("cdninstagram", AppType::Instagram),
    ("whatsapp", AppType::WhatsApp),
    ("wa.me", AppType::WhatsApp),
    ("twitter", AppType::Twitter),
    ("twimg", AppType::Twitter),
    ("x.com", AppType::Twitter),
    ("t.co", AppType::Twitter),
    ("netflix", AppType::Netflix),
    ("nflxvideo", AppType::Netflix),
    ("nflximg", AppType::Netflix),
    ("amazon", AppType::Amazon),
    ("amazonaws", AppType::Amazon),
    ("cloudfront", AppType::Amazon),
    ("aws", AppType::Amazon),
    ("microsoft", AppType::Microsoft),
    ("msn.com", AppType::Microsoft),
    ("office", AppType::Microsoft),
    ("azure", AppType::Microsoft),
    ("live.com", AppType::Microsoft),
    ("outlook", AppType::Microsoft),
    ("bing", AppType::Microsoft),
    ("apple", AppType::Apple),
    ("icloud", AppType::Apple),
    ("mzstatic", AppType::Apple),
    ("itunes", AppType::Apple),
    ("telegram", AppType::Telegram),
    ("t.me", AppType::Telegram),
    ("tiktok", AppType::TikTok),
    ("tiktokcdn", AppType::TikTok),
    ("musical.ly", AppType::TikTok),
    ("bytedance", AppType::TikTok),
    ("spotify", AppType::Spotify),
    ("scdn.co", AppType::Spotify),
    ("zoom", AppType::Zoom),
    ("discord", AppType::Discord),
    ("discordapp", AppType::Discord),
    ("github", AppType::GitHub),
    ("githubusercontent", AppType::GitHub),
    ("cloudflare", AppType::Cloudflare),
    ("cf-", AppType::Cloudflare),
];

impl SniClassifier {
    pub fn with_default_rules() -> Self {
        let mut builder = AhoCorasickBuilder::new();
        builder.ascii_case_insensitive(true);
        let matcher = builder
            .build(APP_PATTERNS.iter().map(|(p, _)| *p))
            .expect("sni patterns");
        SniClassifier {
            matcher,
            apps: APP_PATTERNS.iter().map(|(_, a)| *a).collect(),
        }
    }

    /// An unrecognized but non-empty host is still encrypted traffic with a
    /// known identity, so it maps to HTTPS rather than UNKNOWN.
    pub fn classify(&self, host: &str) -> AppType {
        if host.is_empty() {
            return AppType::Unknown;
        }
        let mut best: Option<usize> = None;
        for mat in self.matcher.find_overlapping_iter(host) {
            let index = mat.pattern().as_usize();
            if best.map_or(true, |b| index < b) {
                best = Some(index);
            }
        }
        match best {
            Some(index) => self.apps[index],
            None => AppType::Https,
        }
    }
}

impl Default for SniClassifier {
    fn default() -> Self {
        SniClassifier::with_default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello(host: &str) -> Vec<u8> {
        let name = host.as_bytes();

        let mut sni_body = Vec::new();
        sni_body.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        sni_body.push(SNI_TYPE_HOSTNAME);
        sni_body.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni_body.extend_from_slice(name);

        let mut extensions = Vec::new();
        // a benign extension first, so the walk is exercised
        extensions.extend_from_slice(&0x000bu16.to_be_bytes());
        extensions.extend_from_slice(&2u16.to_be_bytes());
        extensions.extend_from_slice(&[0x01, 0x00]);
        extensions.extend_from_slice(&TLS_EXTENSION_SNI.to_be_bytes());
        extensions.extend_from_slice(&(sni_body.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&sni_body);

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // client version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session id length
        body.extend_from_slice(&4u16.to_be_bytes()); // cipher suites
        body.extend_from_slice(&[0x13, 0x01, 0x13, 0x02]);
        body.push(1); // compression methods
        body.push(0);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(TLS_HANDSHAKE_CLIENT_HELLO);
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..4]);
        handshake.extend_from_slice(&body);

        let mut record = Vec::new();
        record.push(TLS_CONTENT_HANDSHAKE);
        record.extend_from_slice(&[0x03, 0x01]);
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_sni_from_client_hello() {
        let payload = client_hello("www.youtube.com");
        assert_eq!(
            extract_tls_sni(&payload),
            Some("www.youtube.com".to_string())
        );
    }

    #[test]
    fn rejects_record_length_beyond_payload() {
        let mut payload = client_hello("www.youtube.com");
        payload[3] = 0xff;
        payload[4] = 0xff;
        assert_eq!(extract_tls_sni(&payload), None);
    }

    #[test]
    fn rejects_truncated_extensions() {
        let payload = client_hello("www.youtube.com");
        let cut = payload.len() - 6; // chop into the SNI extension body
        assert_eq!(extract_tls_sni(&payload[..cut]), None);
    }

    #[test]
    fn rejects_non_client_hello_records() {
        let mut payload = client_hello("example.net");
        payload[5] = 0x02; // ServerHello
        assert_eq!(extract_tls_sni(&payload), None);

        let mut payload = client_hello("example.net");
        payload[0] = 0x17; // application data
        assert_eq!(extract_tls_sni(&payload), None);

        let mut payload = client_hello("example.net");
        payload[2] = 0x05; // version out of range
        assert_eq!(extract_tls_sni(&payload), None);
    }

    #[test]
    fn extracts_http_host_and_strips_port() {
        let request = b"GET /watch HTTP/1.1\r\nUser-Agent: x\r\nHost: example.com:8443\r\n\r\n";
        assert_eq!(extract_http_host(request), Some("example.com".to_string()));

        let lower = b"POST /api HTTP/1.1\r\nhost:\tapi.example.com\r\n\r\n";
        assert_eq!(
            extract_http_host(lower),
            Some("api.example.com".to_string())
        );
    }

    #[test]
    fn http_extraction_requires_a_method() {
        let not_http = b"NOPE /x HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(extract_http_host(not_http), None);
    }

    fn dns_query(labels: &[&[u8]]) -> Vec<u8> {
        let mut payload = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        for label in labels {
            payload.push(label.len() as u8);
            payload.extend_from_slice(label);
        }
        payload.push(0);
        payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // QTYPE/QCLASS
        payload
    }

    #[test]
    fn extracts_dns_query_name() {
        let payload = dns_query(&[b"api", b"telegram", b"org"]);
        assert_eq!(
            extract_dns_query(&payload),
            Some("api.telegram.org".to_string())
        );
    }

    #[test]
    fn dns_responses_and_empty_questions_are_ignored() {
        let mut response = dns_query(&[b"example", b"com"]);
        response[2] |= 0x80;
        assert_eq!(extract_dns_query(&response), None);

        let mut no_questions = dns_query(&[b"example", b"com"]);
        no_questions[4] = 0;
        no_questions[5] = 0;
        assert_eq!(extract_dns_query(&no_questions), None);
    }

    #[test]
    fn oversized_dns_label_ends_the_name() {
        let mut payload = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        payload.push(3);
        payload.extend_from_slice(b"api");
        payload.push(0xc0); // compression pointer
        payload.push(0x0c);
        assert_eq!(extract_dns_query(&payload), Some("api".to_string()));
    }

    #[test]
    fn quic_scan_finds_an_embedded_client_hello() {
        let mut payload = vec![0xc3, 0x00, 0x00, 0x00, 0x01];
        payload.extend_from_slice(&client_hello("quic.example.com"));
        payload.extend_from_slice(&[0u8; 64]);
        assert_eq!(
            extract_quic_sni(&payload),
            Some("quic.example.com".to_string())
        );
    }

    #[test]
    fn quic_scan_requires_long_header_form() {
        let mut payload = vec![0x43, 0x00, 0x00, 0x00, 0x01];
        payload.extend_from_slice(&client_hello("quic.example.com"));
        assert_eq!(extract_quic_sni(&payload), None);
    }

    #[test]
    fn maps_hosts_to_applications() {
        let classifier = SniClassifier::with_default_rules();
        assert_eq!(classifier.classify("www.youtube.com"), AppType::YouTube);
        assert_eq!(classifier.classify("WEB.TELEGRAM.ORG"), AppType::Telegram);
        assert_eq!(classifier.classify("static.xx.fbcdn.net"), AppType::Facebook);
        assert_eq!(classifier.classify("d1.scdn.co"), AppType::Spotify);
        assert_eq!(classifier.classify("api.github.com"), AppType::GitHub);
        assert_eq!(classifier.classify("unrecognized.example"), AppType::Https);
        assert_eq!(classifier.classify(""), AppType::Unknown);
    }

    #[test]
    fn earlier_patterns_win_on_overlap() {
        let classifier = SniClassifier::with_default_rules();
        // "yt3.ggpht.com" matches both the google and youtube groups; the
        // google group is declared first.
        assert_eq!(classifier.classify("yt3.ggpht.com"), AppType::Google);
    }
}
