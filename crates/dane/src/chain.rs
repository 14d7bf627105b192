//! Chain Builder: the strategy boundary between DANE-specific trust-anchor
//! handling and ordinary PKIX path validation.
//!
//! Rust has no process-wide `SSL_CTX`-style function-pointer swap, so the
//! Verification Driver owns a `dyn ChainBuilder` instead of mutating global
//! callback state. `WebPkiChainBuilder` is a thin adapter over
//! `rustls-webpki`'s `EndEntityCert::verify_for_usage`.

use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::DaneError;

/// Abstracts "build and validate a PKIX chain" so the driver can swap in
/// `synthesized_roots`/`working_chain` ahead of delegating, rather than
/// mutating global function pointers.
pub trait ChainBuilder: Send + Sync + std::fmt::Debug {
    /// Whether this builder can accept a non-self-signed trust anchor
    /// directly. `rustls-webpki` always requires a self-signed root, so the
    /// default implementation answers `false`.
    fn accepts_partial_chain(&self) -> bool {
        false
    }

    /// Validates `end_entity` against `intermediates`, `roots`, for
    /// `server_name`, at `now`. Pure ok/fail; the Chain Post-Hook inspects
    /// `end_entity`/`intermediates` directly rather than anything this
    /// trait returns, since `rustls-webpki`'s public API does not report
    /// which trust anchor a successful build selected.
    fn build_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        roots: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), DaneError>;
}

/// Default `ChainBuilder`, delegating path validation to `rustls-webpki`.
#[derive(Debug)]
pub struct WebPkiChainBuilder {
    algorithms: &'static [&'static dyn webpki::types::SignatureVerificationAlgorithm],
}

impl WebPkiChainBuilder {
    pub fn new() -> Self {
        Self {
            algorithms: webpki::ALL_VERIFICATION_ALGS,
        }
    }
}

impl Default for WebPkiChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBuilder for WebPkiChainBuilder {
    fn build_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        roots: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), DaneError> {
        let anchors: Vec<webpki::types::TrustAnchor<'_>> = roots
            .iter()
            .map(|root| webpki::anchor_from_trusted_cert(root).map(|a| a.to_owned()))
            .collect::<Result<_, _>>()
            .map_err(|e| DaneError::ChainBuild(e.to_string()))?;

        let ee = webpki::EndEntityCert::try_from(end_entity)
            .map_err(|e| DaneError::ChainBuild(e.to_string()))?;

        ee.verify_for_usage(
            self.algorithms,
            &anchors,
            intermediates,
            now,
            webpki::KeyUsage::server_auth(),
            None,
            None,
        )
        .map_err(|e| DaneError::ChainBuild(e.to_string()))?;

        // Hostname matching is deliberately left to the Name Checker
        //, which applies RFC 6125 wildcard
        // and sub-domain rules `rustls-webpki`'s own subject-name check
        // does not support; running both here would reject connections
        // the Name Checker would otherwise accept.
        let _ = server_name;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builder_requires_self_signed_root() {
        assert!(!WebPkiChainBuilder::new().accepts_partial_chain());
    }
}
