//! Certificate-to-TLSA-record matching.
//!
//! Lazily computes each digest at most once per (selector, algorithm) pair
//! and stops at the first hit, across all four usages and both RFC 6698
//! matching types (SHA-256, SHA-512).

use std::collections::HashMap;

use crate::store::{DigestAlgorithm, Selector, TlsaRecord};

/// Result of matching a single certificate against a set of TLSA records
/// under one usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    NoMatch,
    MatchedCert,
    MatchedPKey,
}

/// Matches `cert_der`/`spki_der` (the DER of a candidate certificate and of
/// its SubjectPublicKeyInfo, respectively) against `records`. Iterates
/// selectors outer, matching types inner, so the cost of hashing a
/// selector's encoding is paid at most once per digest algorithm regardless
/// of how many records share it.
pub fn match_cert(records: &[TlsaRecord], cert_der: &[u8], spki_der: &[u8]) -> MatchKind {
    for selector in [Selector::Cert, Selector::Spki] {
        let candidate: &[u8] = match selector {
            Selector::Cert => cert_der,
            Selector::Spki => spki_der,
        };
        let mut digest_cache: HashMap<DigestAlgorithm, Vec<u8>> = HashMap::new();

        for record in records.iter().filter(|r| r.selector == selector) {
            let matches = match record.matching_type {
                None => candidate == record.data.as_slice(),
                Some(digest) => {
                    let hash = digest_cache
                        .entry(digest)
                        .or_insert_with(|| digest.digest(candidate));
                    hash.as_slice() == record.data.as_slice()
                }
            };

            if matches {
                return match selector {
                    Selector::Cert => MatchKind::MatchedCert,
                    Selector::Spki => MatchKind::MatchedPKey,
                };
            }
        }
    }

    MatchKind::NoMatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Usage;

    fn record(selector: Selector, matching_type: Option<DigestAlgorithm>, data: Vec<u8>) -> TlsaRecord {
        TlsaRecord {
            usage: Usage::DaneEe,
            selector,
            matching_type,
            data,
        }
    }

    #[test]
    fn full_cert_match_wins_on_exact_bytes() {
        let cert = b"certificate-der-bytes".to_vec();
        let records = vec![record(Selector::Cert, None, cert.clone())];
        assert_eq!(match_cert(&records, &cert, b"spki"), MatchKind::MatchedCert);
    }

    #[test]
    fn sha256_spki_match() {
        let spki = b"spki-der-bytes";
        let hash = DigestAlgorithm::Sha256.digest(spki);
        let records = vec![record(Selector::Spki, Some(DigestAlgorithm::Sha256), hash)];
        assert_eq!(
            match_cert(&records, b"cert", spki),
            MatchKind::MatchedPKey
        );
    }

    #[test]
    fn no_match_when_nothing_lines_up() {
        let records = vec![record(Selector::Cert, None, b"other".to_vec())];
        assert_eq!(match_cert(&records, b"cert", b"spki"), MatchKind::NoMatch);
    }

    #[test]
    fn cert_selector_checked_before_spki_selector() {
        let cert = b"cert-bytes".to_vec();
        let spki = b"spki-bytes".to_vec();
        // Both selectors would match; Cert must win because it is iterated first.
        let records = vec![
            record(Selector::Spki, None, spki.clone()),
            record(Selector::Cert, None, cert.clone()),
        ];
        assert_eq!(match_cert(&records, &cert, &spki), MatchKind::MatchedCert);
    }
}
