//! Chain Post-Hook.
//!
//! Runs once the [`crate::chain::ChainBuilder`] has produced a candidate
//! chain: enforces usage-0/1 constraints against the built chain, then
//! invokes the Name Checker.

use rustls_pki_types::CertificateDer;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::DaneError;
use crate::matcher::{match_cert, MatchKind};
use crate::name::{check_names, NameCheckResult};
use crate::store::{TlsaStore, Usage};

/// Enforces usage-0/1 constraints against an already-built chain (leaf
/// first, root last). `full_chain` includes the leaf at index 0 and, if the
/// chain builder populated it, the root as the last element.
pub fn run_post_hook(
    store: &mut TlsaStore,
    full_chain: &[CertificateDer<'_>],
) -> Result<(), DaneError> {
    let parsed: Vec<X509Certificate<'_>> = full_chain
        .iter()
        .map(|der| {
            X509Certificate::from_der(der.as_ref())
                .map(|(_, cert)| cert)
                .map_err(|e| DaneError::BadCert(e.to_string()))
        })
        .collect::<Result<_, _>>()?;

    if store.has_records(Usage::PkixTa) || store.has_records(Usage::PkixEe) {
        let usage0: Vec<_> = store.records(Usage::PkixTa).collect();
        let usage1: Vec<_> = store.records(Usage::PkixEe).collect();

        let mut satisfied = false;

        // Usage-0: any non-leaf depth (index > 0) may match.
        if !usage0.is_empty() {
            satisfied = full_chain
                .iter()
                .zip(parsed.iter())
                .skip(1)
                .any(|(der, cert)| match_cert(&usage0, der.as_ref(), cert.public_key().raw) != MatchKind::NoMatch);
        }

        // Usage-1: only the leaf (depth 0) may match.
        if !satisfied && !usage1.is_empty() {
            if let (Some(der), Some(leaf)) = (full_chain.first(), parsed.first()) {
                satisfied = match_cert(&usage1, der.as_ref(), leaf.public_key().raw) != MatchKind::NoMatch;
            }
        }

        if !satisfied {
            let depth = full_chain.len().saturating_sub(1);
            trc::event!(Dane(trc::DaneEvent::ChainUntrusted), Depth = depth);
            return Err(DaneError::Untrusted { depth });
        }
    }

    let leaf = parsed.first().ok_or(DaneError::DaneInit)?;
    match check_names(leaf, &store.reference_identities, store.multi_label_wildcard) {
        NameCheckResult::Matched(name) => {
            trc::event!(Dane(trc::DaneEvent::HostnameMatched), Hostname = name.clone());
            store.matched_host = Some(name);
            Ok(())
        }
        NameCheckResult::NoMatch => {
            trc::event!(Dane(trc::DaneEvent::HostnameMismatch));
            Err(DaneError::HostnameMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ReferenceIdentity;

    fn self_signed_leaf(san: &str) -> CertificateDer<'static> {
        let params = rcgen::CertificateParams::new(vec![san.to_string()]).unwrap();
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = params.self_signed(&key).unwrap();
        cert.der().clone()
    }

    #[test]
    fn matching_hostname_records_matched_host() {
        let leaf = self_signed_leaf("example.com");
        let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
        run_post_hook(&mut store, &[leaf]).expect("hostname should match");
        assert_eq!(store.matched_host.as_deref(), Some("example.com"));
    }

    #[test]
    fn non_matching_hostname_is_rejected() {
        let leaf = self_signed_leaf("example.com");
        let mut store = TlsaStore::new(vec![ReferenceIdentity::new("other.example")], false);
        let err = run_post_hook(&mut store, &[leaf]).unwrap_err();
        assert_eq!(err, DaneError::HostnameMismatch);
    }

    #[test]
    fn usage1_match_on_leaf_satisfies_pkix_ee() {
        let leaf = self_signed_leaf("example.com");
        let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
        let digest = crate::store::DigestAlgorithm::Sha256.digest(leaf.as_ref());
        store.add_tlsa(1, 0, Some(1), digest).unwrap();
        run_post_hook(&mut store, &[leaf]).expect("usage-1 record should satisfy PKIX-EE");
    }

    #[test]
    fn usage1_mismatch_is_untrusted() {
        let leaf = self_signed_leaf("example.com");
        let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
        store.add_tlsa(1, 0, Some(1), vec![0u8; 32]).unwrap();
        let err = run_post_hook(&mut store, &[leaf]).unwrap_err();
        assert_eq!(err, DaneError::Untrusted { depth: 0 });
    }
}
