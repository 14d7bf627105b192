//! Operator-facing DANE policy, deserialized from plain `serde` structs
//! rather than a bespoke config DSL.

use serde::Deserialize;

/// Policy for what to do when [`crate::verifier::LibrarySupport::Partial`]
/// is reported at startup (the platform cannot generate the internal
/// signing key needed for DANE-TA synthesis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialSupportPolicy {
    /// Refuse to start rather than silently drop DANE-TA coverage.
    Reject,
    /// Accept usage-2 records into the store but skip synthesis at
    /// verification time, falling back to plain PKIX.
    Skip,
}

impl Default for PartialSupportPolicy {
    fn default() -> Self {
        PartialSupportPolicy::Reject
    }
}

/// Top-level DANE policy, deserialized from the host application's config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaneConfig {
    #[serde(default)]
    pub on_partial_support: PartialSupportPolicy,
    /// Mirrors `TlsaStore::multi_label_wildcard`: whether
    /// the leftmost-label wildcard rule is relaxed to span multiple
    /// labels. Off by default, matching RFC 6125's strict reading.
    #[serde(default)]
    pub multi_label_wildcard: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_rejects_partial_support() {
        assert_eq!(DaneConfig::default().on_partial_support, PartialSupportPolicy::Reject);
    }

    #[test]
    fn deserializes_from_json() {
        let cfg: DaneConfig = serde_json::from_str(
            r#"{"on_partial_support": "skip", "multi_label_wildcard": true}"#,
        )
        .unwrap();
        assert_eq!(cfg.on_partial_support, PartialSupportPolicy::Skip);
        assert!(cfg.multi_label_wildcard);
    }
}
