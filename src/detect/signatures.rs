//! Payload signature matching
//!
//! Two Aho-Corasick automata scan TCP payloads: one for SQL-injection
//! fragments, one for script/XSS fragments. Injection patterns are
//! checked first; a payload matching both reports as injection.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use anyhow::Result;
use serde::{Deserialize, Serialize};

const INJECTION_PATTERNS: &[&str] = &[
    "' or",
    "union select",
    "drop table",
    "insert into",
    "1=1",
    "-- ",
    "xp_cmdshell",
];

const SCRIPT_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
    "alert(",
    "document.cookie",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Extra injection patterns beyond the built-in set
    #[serde(default)]
    pub extra_injection: Vec<String>,
    /// Extra script patterns beyond the built-in set
    #[serde(default)]
    pub extra_script: Vec<String>,
    /// Skip payloads longer than this (bytes); 0 scans everything
    #[serde(default = "default_max_scan")]
    pub max_scan_bytes: usize,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            extra_injection: Vec::new(),
            extra_script: Vec::new(),
            max_scan_bytes: default_max_scan(),
        }
    }
}

fn default_max_scan() -> usize {
    4096
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Injection,
    Script,
}

pub struct SignatureMatcher {
    injection: AhoCorasick,
    script: AhoCorasick,
    max_scan_bytes: usize,
}

impl SignatureMatcher {
    pub fn new(config: &SignatureConfig) -> Result<Self> {
        let injection_patterns: Vec<&str> = INJECTION_PATTERNS
            .iter()
            .copied()
            .chain(config.extra_injection.iter().map(String::as_str))
            .collect();
        let script_patterns: Vec<&str> = SCRIPT_PATTERNS
            .iter()
            .copied()
            .chain(config.extra_script.iter().map(String::as_str))
            .collect();

        let injection = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(&injection_patterns)?;
        let script = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(&script_patterns)?;

        Ok(Self {
            injection,
            script,
            max_scan_bytes: config.max_scan_bytes,
        })
    }

    /// Scan a payload; injection wins over script on dual matches.
    pub fn scan(&self, payload: &[u8]) -> Option<SignatureKind> {
        if payload.is_empty() {
            return None;
        }
        let haystack = if self.max_scan_bytes > 0 && payload.len() > self.max_scan_bytes {
            &payload[..self.max_scan_bytes]
        } else {
            payload
        };

        if self.injection.is_match(haystack) {
            Some(SignatureKind::Injection)
        } else if self.script.is_match(haystack) {
            Some(SignatureKind::Script)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> SignatureMatcher {
        SignatureMatcher::new(&SignatureConfig::default()).unwrap()
    }

    #[test]
    fn detects_sql_injection() {
        let m = matcher();
        assert_eq!(
            m.scan(b"GET /login?user=admin' OR 1=1 HTTP/1.1"),
            Some(SignatureKind::Injection)
        );
        assert_eq!(
            m.scan(b"q=1 UNION SELECT password FROM users"),
            Some(SignatureKind::Injection)
        );
    }

    #[test]
    fn detects_script_payload() {
        let m = matcher();
        assert_eq!(
            m.scan(b"comment=<SCRIPT>alert(1)</script>"),
            Some(SignatureKind::Script)
        );
        assert_eq!(
            m.scan(b"img src=x onerror=fetch(document.cookie)"),
            Some(SignatureKind::Script)
        );
    }

    #[test]
    fn injection_wins_on_dual_match() {
        let m = matcher();
        assert_eq!(
            m.scan(b"<script>fetch('/q?1=1 union select x')</script>"),
            Some(SignatureKind::Injection)
        );
    }

    #[test]
    fn case_insensitive() {
        let m = matcher();
        assert_eq!(
            m.scan(b"DROP TABLE users;"),
            Some(SignatureKind::Injection)
        );
    }

    #[test]
    fn clean_payload_passes() {
        let m = matcher();
        assert!(m.scan(b"GET /index.html HTTP/1.1\r\nHost: example.org").is_none());
        assert!(m.scan(b"").is_none());
    }

    #[test]
    fn scan_respects_byte_cap() {
        let config = SignatureConfig {
            max_scan_bytes: 8,
            ..Default::default()
        };
        let m = SignatureMatcher::new(&config).unwrap();
        let mut payload = vec![b'a'; 32];
        payload.extend_from_slice(b"union select");
        assert!(m.scan(&payload).is_none());
    }

    #[test]
    fn extra_patterns_included() {
        let config = SignatureConfig {
            extra_injection: vec!["waitfor delay".to_string()],
            ..Default::default()
        };
        let m = SignatureMatcher::new(&config).unwrap();
        assert_eq!(
            m.scan(b"'; WAITFOR DELAY '0:0:5'--"),
            Some(SignatureKind::Injection)
        );
    }
}
