//! Per-connection TLSA record storage, covering the full (usage, selector,
//! matching-type) structure across all four RFC 6698 usages, including the
//! usage-0/2 trust-anchor handling a leaf-only verifier would not need.

use std::collections::BTreeMap;

use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256, Sha512};
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo, X509Certificate};

use crate::error::DaneError;

/// RFC 6698 certificate usage field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Usage {
    /// Usage 0 — PKIX-TA: constrains which PKIX trust anchor may appear.
    PkixTa,
    /// Usage 1 — PKIX-EE: constrains the leaf, PKIX still required.
    PkixEe,
    /// Usage 2 — DANE-TA: asserts a new trust anchor, bypassing PKIX roots.
    DaneTa,
    /// Usage 3 — DANE-EE: asserts the leaf directly, bypassing chain building.
    DaneEe,
}

impl Usage {
    pub fn as_u8(self) -> u8 {
        match self {
            Usage::PkixTa => 0,
            Usage::PkixEe => 1,
            Usage::DaneTa => 2,
            Usage::DaneEe => 3,
        }
    }
}

impl TryFrom<u8> for Usage {
    type Error = DaneError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Usage::PkixTa),
            1 => Ok(Usage::PkixEe),
            2 => Ok(Usage::DaneTa),
            3 => Ok(Usage::DaneEe),
            other => Err(DaneError::BadUsage(other)),
        }
    }
}

/// RFC 6698 selector field: which part of the certificate the data refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Selector {
    /// Selector 0 — the full certificate.
    Cert,
    /// Selector 1 — the SubjectPublicKeyInfo.
    Spki,
}

impl TryFrom<u8> for Selector {
    type Error = DaneError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Selector::Cert),
            1 => Ok(Selector::Spki),
            other => Err(DaneError::BadSelector(other)),
        }
    }
}

/// RFC 6698 matching-type field. `None` (via `Option<DigestAlgorithm>`)
/// means "full data, no digest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn try_from_wire(value: u8) -> Result<Option<Self>, DaneError> {
        match value {
            0 => Ok(None),
            1 => Ok(Some(DigestAlgorithm::Sha256)),
            2 => Ok(Some(DigestAlgorithm::Sha512)),
            other => Err(DaneError::BadDigest(other)),
        }
    }
}

/// An immutable, parsed TLSA association. Constructed only through
/// `TlsaStore::add_tlsa`.
#[derive(Debug, Clone)]
pub struct TlsaRecord {
    pub usage: Usage,
    pub selector: Selector,
    pub matching_type: Option<DigestAlgorithm>,
    pub data: Vec<u8>,
}

/// A usage-2 record with no matching type additionally carries the parsed
/// certificate or public key it asserts, so the Synthesizer can build a
/// trust anchor around it without re-parsing.
#[derive(Debug, Clone)]
pub enum ParsedAnchor {
    Cert(CertificateDer<'static>),
    Spki(Vec<u8>),
}

/// A reference identity the Name Checker matches the presented leaf
/// against.
#[derive(Debug, Clone)]
pub struct ReferenceIdentity {
    pub pattern: String,
    /// `true` when `pattern` begins with `.`, meaning "any proper
    /// sub-domain" rather than a literal name.
    pub is_subdomain: bool,
}

impl ReferenceIdentity {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let is_subdomain = pattern.starts_with('.') && pattern.len() > 1;
        Self { pattern, is_subdomain }
    }
}

/// Key used to deduplicate and group records within a usage bucket:
/// (selector, matching_type, data). Two records with identical keys under
/// the same usage are the same record.
type RecordKey = (Selector, Option<DigestAlgorithm>, Vec<u8>);

/// Per-connection TLSA record collection plus the ambient verification
/// state attached to it (reference identities, matched host name,
/// synthesized-chain bookkeeping).
#[derive(Debug, Default)]
pub struct TlsaStore {
    usage0: BTreeMap<RecordKey, ()>,
    usage1: BTreeMap<RecordKey, ()>,
    usage2: BTreeMap<RecordKey, ()>,
    usage3: BTreeMap<RecordKey, ()>,
    /// Usage-2, no-matching-type records additionally keep their parsed
    /// form for the Synthesizer, keyed the same way as the dedup map above.
    usage2_anchors: Vec<(RecordKey, ParsedAnchor)>,
    pub reference_identities: Vec<ReferenceIdentity>,
    pub multi_label_wildcard: bool,
    pub base_domain: Option<String>,
    /// Populated by the Name Checker on a successful match.
    pub matched_host: Option<String>,
    /// Diagnostic: the chain depth at which the first trust anchor was
    /// synthesized, if any.
    pub ta_depth: Option<usize>,
}

impl TlsaStore {
    /// Creates a fresh store for a connection. The
    /// first reference identity is conventionally the TLSA base domain.
    pub fn new(reference_identities: Vec<ReferenceIdentity>, multi_label_wildcard: bool) -> Self {
        let base_domain = reference_identities.first().map(|r| r.pattern.clone());
        Self {
            reference_identities,
            multi_label_wildcard,
            base_domain,
            ..Default::default()
        }
    }

    fn bucket(&mut self, usage: Usage) -> &mut BTreeMap<RecordKey, ()> {
        match usage {
            Usage::PkixTa => &mut self.usage0,
            Usage::PkixEe => &mut self.usage1,
            Usage::DaneTa => &mut self.usage2,
            Usage::DaneEe => &mut self.usage3,
        }
    }

    /// Validated iterator access for the matcher/synthesizer: all records
    /// under a usage, selector-then-matching-type grouping is implicit in
    /// the key ordering of the underlying `BTreeMap`.
    pub fn records(&self, usage: Usage) -> impl Iterator<Item = TlsaRecord> + '_ {
        let bucket = match usage {
            Usage::PkixTa => &self.usage0,
            Usage::PkixEe => &self.usage1,
            Usage::DaneTa => &self.usage2,
            Usage::DaneEe => &self.usage3,
        };
        bucket.keys().map(move |(selector, matching_type, data)| TlsaRecord {
            usage,
            selector: *selector,
            matching_type: *matching_type,
            data: data.clone(),
        })
    }

    pub fn has_records(&self, usage: Usage) -> bool {
        match usage {
            Usage::PkixTa => !self.usage0.is_empty(),
            Usage::PkixEe => !self.usage1.is_empty(),
            Usage::DaneTa => !self.usage2.is_empty(),
            Usage::DaneEe => !self.usage3.is_empty(),
        }
    }

    /// The parsed certificates/keys backing usage-2, no-matching-type
    /// records, for the Trust-Anchor Synthesizer.
    pub fn anchors(&self) -> impl Iterator<Item = &ParsedAnchor> {
        self.usage2_anchors.iter().map(|(_, anchor)| anchor)
    }

    /// Validates and inserts a TLSA record.
    ///
    /// Duplicates (identical usage/selector/matching-type/data) are
    /// silently accepted and return `Ok(())`, leaving the store unchanged —
    /// insertion is idempotent, not an error case.
    pub fn add_tlsa(
        &mut self,
        usage: u8,
        selector: u8,
        matching_type: Option<u8>,
        data: Vec<u8>,
    ) -> Result<(), DaneError> {
        let usage = Usage::try_from(usage)?;
        let selector = Selector::try_from(selector)?;
        let matching_type = match matching_type {
            Some(raw) => DigestAlgorithm::try_from_wire(raw)?,
            None => None,
        };

        if data.is_empty() {
            return Err(DaneError::BadNullData);
        }
        if let Some(digest) = matching_type {
            if data.len() != digest.output_len() {
                return Err(DaneError::BadDataLength {
                    expected: digest.output_len(),
                    actual: data.len(),
                });
            }
        }

        // usage-2 with no matching type must parse as a certificate or SPKI
        // so the Synthesizer has a ready-made trust anchor to promote.
        let anchor = if usage == Usage::DaneTa && matching_type.is_none() {
            Some(match selector {
                Selector::Cert => {
                    X509Certificate::from_der(&data)
                        .map_err(|e| DaneError::BadCert(e.to_string()))?;
                    ParsedAnchor::Cert(CertificateDer::from(data.clone()))
                }
                Selector::Spki => {
                    SubjectPublicKeyInfo::from_der(&data)
                        .map_err(|e| DaneError::BadPKey(e.to_string()))?;
                    ParsedAnchor::Spki(data.clone())
                }
            })
        } else {
            None
        };

        if usage == Usage::DaneTa && crate::verifier::global_signing_key().is_none() {
            return Err(DaneError::NoSignKey);
        }

        let key: RecordKey = (selector, matching_type, data);
        let bucket = self.bucket(usage);
        let is_new = !bucket.contains_key(&key);
        bucket.insert(key.clone(), ());

        if is_new {
            if let Some(anchor) = anchor {
                self.usage2_anchors.push((key, anchor));
            }
            trc::event!(
                Dane(trc::DaneEvent::RecordAdded),
                Usage = usage.as_u8(),
                Selector = matches!(selector, Selector::Spki) as u8,
            );
        } else {
            trc::event!(Dane(trc::DaneEvent::RecordDuplicate), Usage = usage.as_u8());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insertion_is_idempotent() {
        let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
        let data = vec![0xab; 32];
        store
            .add_tlsa(3, 0, Some(1), data.clone())
            .expect("first insert");
        store
            .add_tlsa(3, 0, Some(1), data)
            .expect("duplicate insert");
        assert_eq!(store.records(Usage::DaneEe).count(), 1);
    }

    #[test]
    fn bad_data_length_is_rejected() {
        let mut store = TlsaStore::new(vec![], false);
        let err = store.add_tlsa(3, 0, Some(1), vec![0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            DaneError::BadDataLength {
                expected: 32,
                actual: 10
            }
        );
    }

    #[test]
    fn bad_usage_is_rejected() {
        let mut store = TlsaStore::new(vec![], false);
        let err = store.add_tlsa(4, 0, Some(1), vec![0u8; 32]).unwrap_err();
        assert_eq!(err, DaneError::BadUsage(4));
    }

    #[test]
    fn empty_data_is_rejected() {
        let mut store = TlsaStore::new(vec![], false);
        let err = store.add_tlsa(3, 0, None, vec![]).unwrap_err();
        assert_eq!(err, DaneError::BadNullData);
    }

    #[test]
    fn usage2_cert_selector_requires_valid_der() {
        let mut store = TlsaStore::new(vec![], false);
        let err = store.add_tlsa(2, 0, None, vec![0x00, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, DaneError::BadCert(_)));
    }

    #[test]
    fn distinct_usages_do_not_collide() {
        let mut store = TlsaStore::new(vec![], false);
        let data = vec![0x11; 32];
        store.add_tlsa(1, 0, Some(1), data.clone()).unwrap();
        store.add_tlsa(3, 0, Some(1), data).unwrap();
        assert_eq!(store.records(Usage::PkixEe).count(), 1);
        assert_eq!(store.records(Usage::DaneEe).count(), 1);
    }
}
