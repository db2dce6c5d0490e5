//! Modifier chain: configured filters and rewriters applied to each
//! message in declared order, short-circuiting to drop on the first
//! deny. See spec section 4.2.

use std::collections::HashSet;

use regex::Regex;

use crate::http;
use crate::message::Message;

/// Whether a `basic-auth-filter` rule drops on match or on non-match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    DropOnMatch,
    DropOnNonMatch,
}

#[derive(Debug, Clone)]
pub enum Rule {
    AllowUrl(Regex),
    DisallowUrl(Regex),
    RewriteUrl { pattern: Regex, template: String },
    AllowHeader { name: String, pattern: Regex },
    DisallowHeader { name: String, pattern: Regex },
    RewriteHeader { name: String, pattern: Regex, template: String },
    SetHeader { name: String, value: String },
    SetParam { name: String, value: String },
    BasicAuthFilter { pattern: Regex, mode: FilterMode },
    AllowMethod(HashSet<String>),
    HeaderLimiter { name: String, percent: u8 },
    ParamLimiter { name: String, percent: u8 },
}

/// An ordered, immutable list of rules evaluated per message.
#[derive(Debug, Clone, Default)]
pub struct ModifierChain {
    rules: Vec<Rule>,
}

impl ModifierChain {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Evaluate the chain against `msg`. Returns `None` if dropped by a
    /// deny rule, otherwise the (possibly rewritten) message.
    pub fn apply(&self, mut msg: Message) -> Option<Message> {
        for rule in &self.rules {
            match rule {
                Rule::AllowUrl(re) => {
                    let path = http::path(&msg.payload).unwrap_or(b"");
                    if !re.is_match(&String::from_utf8_lossy(path)) {
                        return None;
                    }
                }
                Rule::DisallowUrl(re) => {
                    let path = http::path(&msg.payload).unwrap_or(b"");
                    if re.is_match(&String::from_utf8_lossy(path)) {
                        return None;
                    }
                }
                Rule::RewriteUrl { pattern, template } => {
                    let path = http::path(&msg.payload).unwrap_or(b"").to_vec();
                    let path_str = String::from_utf8_lossy(&path);
                    if pattern.is_match(&path_str) {
                        let rewritten = pattern.replace(&path_str, template.as_str()).into_owned();
                        msg.payload = http::set_path(&msg.payload, rewritten.as_bytes()).into();
                    }
                }
                Rule::AllowHeader { name, pattern } => {
                    let value = http::header(&msg.payload, name).unwrap_or(b"");
                    if !pattern.is_match(&String::from_utf8_lossy(value)) {
                        return None;
                    }
                }
                Rule::DisallowHeader { name, pattern } => {
                    let value = http::header(&msg.payload, name).unwrap_or(b"");
                    if pattern.is_match(&String::from_utf8_lossy(value)) {
                        return None;
                    }
                }
                Rule::RewriteHeader { name, pattern, template } => {
                    if let Some(value) = http::header(&msg.payload, name) {
                        let value_str = String::from_utf8_lossy(value);
                        if pattern.is_match(&value_str) {
                            let rewritten = pattern.replace(&value_str, template.as_str()).into_owned();
                            msg.payload = http::set_header(&msg.payload, name, &rewritten).into();
                        }
                    }
                }
                Rule::SetHeader { name, value } => {
                    msg.payload = http::set_header(&msg.payload, name, value).into();
                }
                Rule::SetParam { name, value } => {
                    msg.payload = http::set_path_param(&msg.payload, name, value).into();
                }
                Rule::BasicAuthFilter { pattern, mode } => {
                    let matched = http::header(&msg.payload, "Authorization")
                        .and_then(decode_basic_auth)
                        .map(|creds| pattern.is_match(&creds))
                        .unwrap_or(false);
                    let drop = match mode {
                        FilterMode::DropOnMatch => matched,
                        FilterMode::DropOnNonMatch => !matched,
                    };
                    if drop {
                        return None;
                    }
                }
                Rule::AllowMethod(methods) => {
                    let method = http::method(&msg.payload).unwrap_or(b"");
                    let method = String::from_utf8_lossy(method).to_uppercase();
                    if !methods.contains(&method) {
                        return None;
                    }
                }
                Rule::HeaderLimiter { name, percent } => {
                    let value = http::header(&msg.payload, name).unwrap_or(b"");
                    if !percent_gate(value, *percent) {
                        return None;
                    }
                }
                Rule::ParamLimiter { name, percent } => {
                    let value = http::path_param(&msg.payload, name).unwrap_or(b"");
                    if !percent_gate(value, *percent) {
                        return None;
                    }
                }
            }
        }
        Some(msg)
    }
}

fn decode_basic_auth(header_value: &[u8]) -> Option<String> {
    use base64::Engine;
    let value = std::str::from_utf8(header_value).ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    String::from_utf8(decoded).ok()
}

/// Deterministic percentage gate: `hash(value) mod 100 < threshold`.
/// Uses FNV-1a so the same input always yields the same admit/drop
/// decision, independent of process or hasher-seed randomization.
pub fn percent_gate(value: &[u8], threshold: u8) -> bool {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for &byte in value {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    (hash % 100) < threshold as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, MessageKind};
    use bytes::Bytes;

    fn msg(payload: &'static [u8]) -> Message {
        Message {
            kind: MessageKind::Request,
            id: MessageId::generate(),
            timestamp: 0,
            latency: None,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn allow_url_passes_matching_and_drops_others() {
        let chain = ModifierChain::new(vec![Rule::AllowUrl(Regex::new("^/api/").unwrap())]);
        let pass = chain.apply(msg(b"GET /api/x HTTP/1.1\r\n\r\n"));
        assert!(pass.is_some());

        let chain2 = ModifierChain::new(vec![Rule::AllowUrl(Regex::new("^/api/").unwrap())]);
        let dropped = chain2.apply(msg(b"GET /x HTTP/1.1\r\n\r\n"));
        assert!(dropped.is_none());
    }

    #[test]
    fn disallow_url_drops_matching_path() {
        let chain = ModifierChain::new(vec![Rule::DisallowUrl(Regex::new("/admin").unwrap())]);
        assert!(chain.apply(msg(b"GET /admin HTTP/1.1\r\n\r\n")).is_none());
        assert!(chain.apply(msg(b"GET /public HTTP/1.1\r\n\r\n")).is_some());
    }

    #[test]
    fn rewrite_url_applies_capture_groups() {
        let chain = ModifierChain::new(vec![Rule::RewriteUrl {
            pattern: Regex::new("^/v1/(.*)$").unwrap(),
            template: "/v2/$1".to_string(),
        }]);
        let out = chain.apply(msg(b"GET /v1/users HTTP/1.1\r\n\r\n")).unwrap();
        assert_eq!(http::path(&out.payload), Some(b"/v2/users".as_ref()));
    }

    #[test]
    fn allow_method_drops_methods_outside_set() {
        let mut set = HashSet::new();
        set.insert("GET".to_string());
        let chain = ModifierChain::new(vec![Rule::AllowMethod(set)]);
        assert!(chain.apply(msg(b"GET / HTTP/1.1\r\n\r\n")).is_some());
        assert!(chain.apply(msg(b"POST / HTTP/1.1\r\n\r\n")).is_none());
    }

    #[test]
    fn percent_gate_is_deterministic_for_same_input() {
        let v = b"user-42";
        let first = percent_gate(v, 50);
        for _ in 0..10 {
            assert_eq!(percent_gate(v, 50), first);
        }
    }

    #[test]
    fn percent_gate_zero_drops_everything() {
        for i in 0..50 {
            let v = format!("value-{i}");
            assert!(!percent_gate(v.as_bytes(), 0));
        }
    }

    #[test]
    fn percent_gate_hundred_admits_everything() {
        for i in 0..50 {
            let v = format!("value-{i}");
            assert!(percent_gate(v.as_bytes(), 100));
        }
    }

    #[test]
    fn basic_auth_filter_drops_on_match() {
        use base64::Engine;
        let creds = base64::engine::general_purpose::STANDARD.encode("admin:secret");
        let payload = format!("GET / HTTP/1.1\r\nAuthorization: Basic {creds}\r\n\r\n");
        let chain = ModifierChain::new(vec![Rule::BasicAuthFilter {
            pattern: Regex::new("^admin:").unwrap(),
            mode: FilterMode::DropOnMatch,
        }]);
        let m = Message {
            kind: MessageKind::Request,
            id: MessageId::generate(),
            timestamp: 0,
            latency: None,
            payload: Bytes::from(payload.into_bytes()),
        };
        assert!(chain.apply(m).is_none());
    }
}
