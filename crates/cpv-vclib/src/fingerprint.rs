//! SHA-256 certificate thumbprints in vCenter's colon-hex rendering.

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a rendered thumbprint: 32 octets, 2 hex digits each, 31 colons.
pub const FINGERPRINT_LEN: usize = 95;

/// SHA-256 digest of a certificate's DER bytes, e.g. `AA:BB:...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a DER-encoded certificate.
    pub fn compute(der: &[u8]) -> Self {
        debug_assert!(!der.is_empty(), "fingerprint of an empty certificate");
        let hash = Sha256::digest(der);
        let hex: Vec<String> = hash.iter().map(|b| format!("{b:02X}")).collect();
        Self(hex.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against an operator-supplied thumbprint, ignoring case,
    /// colons and surrounding whitespace.
    pub fn matches(&self, expected: &str) -> bool {
        normalize(&self.0) == normalize(expected)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_is_fixed_width_upper_hex() {
        let fp = Fingerprint::compute(b"not really a certificate");
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
        assert_eq!(fp.as_str().split(':').count(), 32);
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c == ':' || c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn compute_is_deterministic() {
        let a = Fingerprint::compute(&[0x30, 0x82, 0x01, 0x0a]);
        let b = Fingerprint::compute(&[0x30, 0x82, 0x01, 0x0a]);
        assert_eq!(a, b);
    }

    #[test]
    fn known_digest() {
        // SHA-256 of "test"
        let fp = Fingerprint::compute(b"test");
        assert!(fp.as_str().starts_with("9F:86:D0:81:88:4C:7D:65"));
        assert!(fp.as_str().ends_with("15:B0:F0:0A:08"));
    }

    #[test]
    fn matching_ignores_case_and_colons() {
        let fp = Fingerprint::compute(b"test");
        assert!(fp.matches(fp.as_str()));
        assert!(fp.matches(&fp.as_str().to_lowercase()));
        assert!(fp.matches(&fp.as_str().replace(':', "")));
        assert!(fp.matches(&format!("  {}\n", fp.as_str())));
        assert!(!fp.matches("obviously wrong"));
        assert!(!fp.matches(""));
        assert!(!Fingerprint::compute(b"other").matches(fp.as_str()));
    }
}
