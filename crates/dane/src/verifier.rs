//! Verification Driver and process-wide library state.
//!
//! `DaneVerifier` is the Rust-native equivalent of installing a
//! `cert_verify_callback` on an OpenSSL `SSL_CTX`: it implements rustls's
//! `ServerCertVerifier`, the extension point `rustls::ClientConfig`
//! exposes for exactly this purpose, sequencing the DANE-EE fast path,
//! TA-synthesis, chain building and the post-hook.
//!
//! Library-wide state (here: the internal signing key) is a single
//! lazily-initialized, double-checked slot rather than eagerly constructed,
//! guarded by `parking_lot::RwLock`.

use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::chain::{ChainBuilder, WebPkiChainBuilder};
use crate::config::{DaneConfig, PartialSupportPolicy};
use crate::error::DaneError;
use crate::matcher::{match_cert, MatchKind};
use crate::name::{check_names, NameCheckResult};
use crate::posthook::run_post_hook;
use crate::store::{TlsaStore, Usage};
use crate::synth::{SigningKey, Synthesizer};

/// Outcome of `library_init`.
#[derive(Debug)]
pub enum LibrarySupport {
    /// The platform can generate the internal signing key; DANE-TA
    /// synthesis is fully available.
    Full,
    /// No signing key is available; callers must either reject usage-2
    /// records outright or accept that TA synthesis will always fall back
    /// to plain PKIX (see `DaneConfig::on_partial_support`).
    Partial,
    /// Key generation succeeded but the key failed its self-test; a deeper
    /// problem than mere platform unavailability.
    Error(DaneError),
}

static SIGNING_KEY: OnceLock<RwLock<Option<Arc<SigningKey>>>> = OnceLock::new();

/// Idempotent process-wide initialisation. Safe to call
/// from multiple threads or any number of times; only the first successful
/// call performs key generation.
pub fn library_init() -> LibrarySupport {
    let cell = SIGNING_KEY.get_or_init(|| RwLock::new(None));

    if cell.read().is_some() {
        return LibrarySupport::Full;
    }

    let mut guard = cell.write();
    if guard.is_some() {
        return LibrarySupport::Full;
    }

    let key = match SigningKey::generate() {
        Some(key) => key,
        None => {
            trc::event!(Dane(trc::DaneEvent::LibraryInit), Support = "partial");
            return LibrarySupport::Partial;
        }
    };

    if let Err(e) = key.self_test() {
        trc::event!(Dane(trc::DaneEvent::LibraryInit), Support = "error");
        return LibrarySupport::Error(e);
    }

    *guard = Some(Arc::new(key));
    trc::event!(Dane(trc::DaneEvent::LibraryInit), Support = "full");
    LibrarySupport::Full
}

pub(crate) fn global_signing_key() -> Option<Arc<SigningKey>> {
    SIGNING_KEY.get().and_then(|cell| cell.read().clone())
}

fn dane_to_rustls(err: DaneError) -> rustls::Error {
    rustls::Error::General(err.to_string())
}

fn parse_cert<'a>(der: &'a CertificateDer<'_>) -> Result<X509Certificate<'a>, rustls::Error> {
    X509Certificate::from_der(der.as_ref())
        .map(|(_, cert)| cert)
        .map_err(|e| dane_to_rustls(DaneError::BadCert(e.to_string())))
}

/// Owns the per-connection `TlsaStore` alongside the installed verifier.
/// Because `rustls::ClientConfig` is normally long-lived and shared, while
/// a `TlsaStore` is inherently per-connection state, callers construct one
/// `DaneVerifier` — and thus one `ClientConfig` — per destination, the same
/// way applications that pin certificates per-host already do with
/// `rustls`.
#[derive(Debug)]
pub struct DaneVerifier {
    store: Mutex<TlsaStore>,
    chain_builder: Box<dyn ChainBuilder>,
    pkix_roots: Vec<CertificateDer<'static>>,
    config: DaneConfig,
}

impl DaneVerifier {
    pub fn new(store: TlsaStore, pkix_roots: Vec<CertificateDer<'static>>) -> Arc<Self> {
        Self::with_config(store, pkix_roots, DaneConfig::default())
    }

    pub fn with_config(
        store: TlsaStore,
        pkix_roots: Vec<CertificateDer<'static>>,
        config: DaneConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            chain_builder: Box::new(WebPkiChainBuilder::new()),
            pkix_roots,
            config,
        })
    }
}

impl ServerCertVerifier for DaneVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut store = self.store.lock();

        let usage3: Vec<_> = store.records(Usage::DaneEe).collect();
        if !usage3.is_empty() {
            let leaf = parse_cert(end_entity)?;
            let spki = leaf.public_key().raw;
            if match_cert(&usage3, end_entity.as_ref(), spki) != MatchKind::NoMatch {
                trc::event!(Dane(trc::DaneEvent::DaneEeShortCircuit));
                return match check_names(&leaf, &store.reference_identities, store.multi_label_wildcard) {
                    NameCheckResult::Matched(name) => {
                        store.matched_host = Some(name);
                        trc::event!(Dane(trc::DaneEvent::AuthenticationSuccess));
                        Ok(ServerCertVerified::assertion())
                    }
                    NameCheckResult::NoMatch => {
                        trc::event!(Dane(trc::DaneEvent::AuthenticationFailure));
                        Err(dane_to_rustls(DaneError::HostnameMismatch))
                    }
                };
            }
        }

        let plain_pkix = || {
            (
                intermediates
                    .iter()
                    .map(|c| c.clone().into_owned())
                    .collect::<Vec<_>>(),
                self.pkix_roots.clone(),
            )
        };

        let (intermediates_owned, roots): (Vec<CertificateDer<'static>>, Vec<CertificateDer<'static>>) =
            if store.has_records(Usage::DaneTa) {
                match global_signing_key() {
                    None if self.config.on_partial_support == PartialSupportPolicy::Reject => {
                        return Err(dane_to_rustls(DaneError::DaneSupport))
                    }
                    None => plain_pkix(),
                    Some(signing_key) => {
                        let synthesizer =
                            Synthesizer::new(&signing_key, self.chain_builder.accepts_partial_chain());
                        match synthesizer
                            .synthesize(&mut store, end_entity, intermediates)
                            .map_err(dane_to_rustls)?
                        {
                            Some(synth) => (synth.working_chain, synth.synthesized_roots),
                            None => plain_pkix(),
                        }
                    }
                }
            } else {
                plain_pkix()
            };

        trc::event!(Dane(trc::DaneEvent::ChainBuildStarted));
        self.chain_builder
            .build_chain(end_entity, &intermediates_owned, &roots, server_name, now)
            .map_err(|e| {
                trc::event!(Dane(trc::DaneEvent::ChainBuildFailed));
                dane_to_rustls(e)
            })?;
        trc::event!(Dane(trc::DaneEvent::ChainBuildSucceeded));

        let mut full_chain: Vec<CertificateDer<'static>> = Vec::with_capacity(1 + intermediates_owned.len());
        full_chain.push(end_entity.clone().into_owned());
        full_chain.extend(intermediates_owned);

        match run_post_hook(&mut store, &full_chain) {
            Ok(()) => {
                trc::event!(Dane(trc::DaneEvent::AuthenticationSuccess));
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => {
                trc::event!(Dane(trc::DaneEvent::AuthenticationFailure));
                Err(dane_to_rustls(e))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ReferenceIdentity;

    #[test]
    fn library_init_is_idempotent() {
        let first = matches!(library_init(), LibrarySupport::Full | LibrarySupport::Partial);
        let second = matches!(library_init(), LibrarySupport::Full | LibrarySupport::Partial);
        assert_eq!(first, second);
    }

    #[test]
    fn library_init_full_support_publishes_usable_key() {
        if let LibrarySupport::Full = library_init() {
            assert!(global_signing_key().is_some());
        }
    }

    #[test]
    fn dane_verifier_construction_does_not_panic() {
        let store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
        let _verifier = DaneVerifier::new(store, vec![]);
    }
}
