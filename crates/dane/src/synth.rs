//! Trust-Anchor Synthesizer.
//!
//! The largest and most subtle component: walks the peer's untrusted chain
//! looking for a certificate (or bare public key) that a usage-2 TLSA
//! record vouches for, then manufactures synthetic, short-lived X.509
//! structures so the ordinary PKIX [`crate::chain::ChainBuilder`] accepts an
//! otherwise-unrooted chain. Built on `rcgen` for certificate synthesis and
//! `x509-parser`'s extension/signature-verification API for walking the
//! Authority/Subject Key Identifier chain.
//!
//! Design simplification recorded in DESIGN.md: synthetic subject/issuer
//! distinguished names collapse the original DN into a single CommonName
//! carrying its rendered string form rather than copying RDN-for-RDN. Path
//! validation here is driven by signature and TLSA-data matching, not by
//! bit-identical DN encoding, so this loses no verification power.

use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa,
    KeyPair, SerialNumber, SubjectPublicKeyInfo,
};
use rustls_pki_types::CertificateDer;
use time::{Duration, OffsetDateTime};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

use crate::error::DaneError;
use crate::matcher::{match_cert, MatchKind};
use crate::store::{ParsedAnchor, TlsaStore, Usage};

/// The library's process-wide signing key used only for synthetic
/// certificates. Generated once by `library_init`.
pub struct SigningKey {
    key_pair: KeyPair,
}

impl SigningKey {
    /// Generates a fresh ephemeral EC P-256 key pair. Returns `None` if the
    /// platform cannot provide key generation — callers surface this as
    /// `LibrarySupport::Partial` and must then reject usage-2 records.
    pub fn generate() -> Option<Self> {
        KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .ok()
            .map(|key_pair| SigningKey { key_pair })
    }

    /// Confirms a freshly generated key can actually produce a self-signed
    /// certificate before it is published for trust-anchor synthesis.
    /// Catches a key pair that generated successfully but is unusable for
    /// signing (e.g. a degenerate RNG draw on an unsupported backend).
    pub fn self_test(&self) -> Result<(), DaneError> {
        let params = CertificateParams::new(Vec::<String>::new()).map_err(|_| DaneError::Alloc)?;
        params
            .self_signed(&self.key_pair)
            .map(|_| ())
            .map_err(|_| DaneError::LibraryInit("signing key self-test failed".into()))
    }
}

/// Output of a successful synthesis pass: the two chain slots
/// (`synthesized_roots`, `working_chain`) to be installed on the
/// [`crate::chain::ChainBuilder`] by the Verification Driver.
#[derive(Debug, Default, Clone)]
pub struct SynthesizedChain {
    pub working_chain: Vec<CertificateDer<'static>>,
    pub synthesized_roots: Vec<CertificateDer<'static>>,
}

/// Drives trust-anchor synthesis for one verification attempt.
pub struct Synthesizer<'a> {
    signing_key: &'a SigningKey,
    /// Capability flag: can the underlying chain builder honour a
    /// non-self-signed trust anchor directly (`wrap_cert`'s fast path)?
    pub builder_accepts_partial_chain: bool,
}

impl<'a> Synthesizer<'a> {
    pub fn new(signing_key: &'a SigningKey, builder_accepts_partial_chain: bool) -> Self {
        Self {
            signing_key,
            builder_accepts_partial_chain,
        }
    }

    /// Runs the issuer-chain walk. Returns `Ok(None)` when the
    /// store carries usage-2 records but none of them vouch for anything
    /// reachable from `leaf`/`peer_chain` — the caller should then fall
    /// back to plain PKIX against the original, unmodified peer chain
    /// rather than treat this as a hard failure. Returns `Err` only for
    /// genuine internal failures (malformed synthetic-cert construction).
    pub fn synthesize(
        &self,
        store: &mut TlsaStore,
        leaf: &CertificateDer<'_>,
        peer_chain: &[CertificateDer<'_>],
    ) -> Result<Option<SynthesizedChain>, DaneError> {
        let mut out = SynthesizedChain::default();
        let mut used = vec![false; peer_chain.len()];

        let mut current_der: CertificateDer<'static> = leaf.clone().into_owned();
        let mut depth = 0usize;

        loop {
            let (_, current) = X509Certificate::from_der(current_der.as_ref())
                .map_err(|e| DaneError::BadCert(e.to_string()))?;

            let issuer_pos = peer_chain.iter().enumerate().position(|(i, cand)| {
                if used[i] {
                    return false;
                }
                match X509Certificate::from_der(cand.as_ref()) {
                    Ok((_, candidate)) => {
                        names_equal(candidate.subject(), current.issuer())
                            && current.verify_signature(Some(candidate.public_key())).is_ok()
                    }
                    Err(_) => false,
                }
            });

            let Some(pos) = issuer_pos else {
                // No issuer found in the peer's chain: fall through to the
                // bare-key/bare-cert `ta_signed` check.
                return self.ta_signed(store, &current, &current_der, depth, out);
            };

            used[pos] = true;
            let issuer_der: CertificateDer<'static> = peer_chain[pos].clone().into_owned();
            let (_, issuer_cert) = X509Certificate::from_der(issuer_der.as_ref())
                .map_err(|e| DaneError::BadCert(e.to_string()))?;

            let usage2: Vec<_> = store.records(Usage::DaneTa).collect();
            let spki_der = issuer_cert.public_key().raw;
            let match_kind = match_cert(&usage2, issuer_der.as_ref(), spki_der);
            drop(issuer_cert);

            match match_kind {
                MatchKind::NoMatch => {
                    let (_, issuer_cert) = X509Certificate::from_der(issuer_der.as_ref())
                        .map_err(|e| DaneError::BadCert(e.to_string()))?;
                    let self_signed = names_equal(issuer_cert.subject(), issuer_cert.issuer());
                    out.working_chain.push(issuer_der.clone());
                    if self_signed {
                        return Ok(Some(out));
                    }
                    current_der = issuer_der;
                    depth += 1;
                }
                MatchKind::MatchedCert => {
                    store.ta_depth.get_or_insert(depth);
                    trc::event!(Dane(trc::DaneEvent::TrustAnchorWrapCert), Depth = depth);
                    self.wrap_cert(&issuer_der, &mut out)?;
                    return Ok(Some(out));
                }
                MatchKind::MatchedPKey => {
                    let (_, issuer_cert) = X509Certificate::from_der(issuer_der.as_ref())
                        .map_err(|e| DaneError::BadCert(e.to_string()))?;
                    let spki = issuer_cert.public_key().raw.to_vec();
                    let subject_der = current_der.clone();
                    store.ta_depth.get_or_insert(depth);
                    trc::event!(Dane(trc::DaneEvent::TrustAnchorWrapKey), Depth = depth);
                    self.wrap_key(Some(spki), &subject_der, &mut out)?;
                    return Ok(Some(out));
                }
            }
        }
    }

    /// Fallback for when the peer chain is exhausted
    /// without yielding a match, and the residual certificate is not
    /// self-signed, so test it directly against the store's bare usage-2
    /// certificates/keys (no intervening certificate object, only a
    /// signature check).
    fn ta_signed(
        &self,
        store: &mut TlsaStore,
        residual: &X509Certificate<'_>,
        residual_der: &CertificateDer<'_>,
        depth: usize,
        mut out: SynthesizedChain,
    ) -> Result<Option<SynthesizedChain>, DaneError> {
        if names_equal(residual.subject(), residual.issuer()) {
            trc::event!(Dane(trc::DaneEvent::TrustAnchorNotFound), Depth = depth);
            return Ok(None);
        }

        let anchors: Vec<ParsedAnchor> = store.anchors().cloned().collect();
        for anchor in &anchors {
            let hit = match anchor {
                ParsedAnchor::Cert(tacert_der) => {
                    X509Certificate::from_der(tacert_der.as_ref())
                        .ok()
                        .map(|(_, tacert)| {
                            names_equal(tacert.subject(), residual.issuer())
                                && residual.verify_signature(Some(tacert.public_key())).is_ok()
                        })
                        .unwrap_or(false)
                }
                ParsedAnchor::Spki(_) => false,
            };
            if hit {
                if let ParsedAnchor::Cert(tacert_der) = anchor {
                    store.ta_depth.get_or_insert(depth);
                    trc::event!(Dane(trc::DaneEvent::TrustAnchorWrapCert), Depth = depth);
                    self.wrap_cert(tacert_der, &mut out)?;
                    return Ok(Some(out));
                }
            }
        }

        for anchor in &anchors {
            if let ParsedAnchor::Spki(spki_der) = anchor {
                let verifies = spki_verifies(spki_der, residual);
                if verifies {
                    store.ta_depth.get_or_insert(depth);
                    trc::event!(Dane(trc::DaneEvent::TrustAnchorWrapKey), Depth = depth);
                    self.wrap_key(Some(spki_der.clone()), residual_der, &mut out)?;
                    return Ok(Some(out));
                }
            }
        }

        trc::event!(Dane(trc::DaneEvent::TrustAnchorNotFound), Depth = depth);
        Ok(None)
    }

    /// Promotes a matched full certificate to trust anchor status.
    fn wrap_cert(
        &self,
        tacert_der: &CertificateDer<'static>,
        out: &mut SynthesizedChain,
    ) -> Result<(), DaneError> {
        if self.builder_accepts_partial_chain {
            out.synthesized_roots.push(tacert_der.clone());
            return Ok(());
        }

        let (_, tacert) = X509Certificate::from_der(tacert_der.as_ref())
            .map_err(|e| DaneError::BadCert(e.to_string()))?;

        let spki = tacert.public_key().raw.to_vec();
        let subject_pubkey = SubjectPublicKeyInfo::from_der(&spki)
            .map_err(|_| DaneError::BadCertPKey("unsupported public key algorithm".into()))?;

        // Preserve tacert's own subject/issuer identity: this is the same
        // certificate, only re-signed by the internal key, not a new
        // synthetic wrapper above it (that is wrap_key's job, below).
        let mut params = synthetic_params(&tacert, tacert.subject())?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let issuer_cert = issuer_params(&tacert)?
            .self_signed(&self.signing_key.key_pair)
            .map_err(|_| DaneError::Alloc)?;
        let re_signed = params
            .signed_by(&subject_pubkey, &issuer_cert, &self.signing_key.key_pair)
            .map_err(|_| DaneError::Alloc)?;

        out.working_chain.push(re_signed.der().clone());
        self.wrap_key(None, tacert_der, out)
    }

    /// Manufactures a synthetic CA certificate. `key`, when given, is the
    /// DER of a bare SubjectPublicKeyInfo that a usage-2 record (or the
    /// peer chain) vouched for but whose matching
    /// private key this library never holds; the synthetic cert embeds it
    /// as the anchor's own public key and is signed by the library's
    /// internal key, since only the internal key's private half is ever
    /// available here (see DESIGN.md for this resolution).
    fn wrap_key(
        &self,
        key: Option<Vec<u8>>,
        subject_der: &CertificateDer<'_>,
        out: &mut SynthesizedChain,
    ) -> Result<(), DaneError> {
        let (_, subject) = X509Certificate::from_der(subject_der.as_ref())
            .map_err(|e| DaneError::BadCert(e.to_string()))?;

        match key {
            None => {
                let mut params = synthetic_params(&subject, subject.issuer())?;
                params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
                let root = params
                    .self_signed(&self.signing_key.key_pair)
                    .map_err(|_| DaneError::Alloc)?;
                out.synthesized_roots.push(root.der().clone());
                Ok(())
            }
            Some(spki) => {
                let self_signed = authority_key_identifier(&subject).is_none();
                let subject_keypair = KeyPair::from_public_key(&rcgen::PKCS_ECDSA_P256_SHA256, &spki)
                    .map_err(|_| DaneError::BadCertPKey("unsupported public key algorithm".into()))?;

                let mut params = synthetic_params(&subject, subject.issuer())?;
                params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

                if self_signed {
                    // `subject` carries no AKID: it is already terminal, so
                    // the anchor wrapping its issuer's bare key can sit
                    // directly in the trusted root set.
                    let root = params
                        .self_signed(&subject_keypair)
                        .map_err(|_| DaneError::Alloc)?;
                    out.synthesized_roots.push(root.der().clone());
                    Ok(())
                } else {
                    let issuer = Issuer::new(issuer_params(&subject)?, self.signing_key.key_pair.clone());
                    let cert = params
                        .signed_by(&subject_keypair, &issuer)
                        .map_err(|_| DaneError::Alloc)?;
                    out.working_chain.push(cert.der().clone());
                    // Cap the chain with a pure synthetic self-signed root.
                    self.wrap_key(None, subject_der, out)
                }
            }
        }
    }
}

/// Builds a synthetic certificate's parameters, with `subject_name` as the
/// embedded subject (either `original`'s own subject, when re-signing it
/// in place, or its issuer-name, when manufacturing a wrapper above it):
/// serial = AKID.serial if present else original.serial + 1; validity ±30
/// days from "now".
fn synthetic_params(
    original: &X509Certificate<'_>,
    subject_name: &X509Name<'_>,
) -> Result<CertificateParams, DaneError> {
    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(|_| DaneError::Alloc)?;
    params.distinguished_name = name_to_dn(subject_name);

    let akid = authority_key_identifier(original);
    let serial = match akid.and_then(|a| a.serial) {
        Some(bytes) => bytes.to_vec(),
        None => increment_be(original.raw_serial()),
    };
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    if let Some(keyid) = akid.and_then(|a| a.key_id) {
        let skid = remap_reserved_skid(keyid);
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(SUBJECT_KEY_IDENTIFIER_OID, der_octet_string(&skid)));
    }

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(30);
    params.not_after = now + Duration::days(30);

    Ok(params)
}

/// Builds the issuer-side parameters (distinguished name only; the caller
/// supplies the actual signing `KeyPair` via `Issuer::new`) for the level
/// above a synthetic certificate, derived from the original's AKID when
/// present, else self-signed (subject = issuer).
fn issuer_params(original: &X509Certificate<'_>) -> Result<CertificateParams, DaneError> {
    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(|_| DaneError::Alloc)?;
    params.distinguished_name = name_to_dn(original.issuer());
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    Ok(params)
}

fn name_to_dn(name: &X509Name<'_>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name.to_string());
    dn
}

fn names_equal(a: &X509Name<'_>, b: &X509Name<'_>) -> bool {
    a.to_string().eq_ignore_ascii_case(&b.to_string())
}

fn increment_be(serial: &[u8]) -> Vec<u8> {
    let mut out = serial.to_vec();
    for byte in out.iter_mut().rev() {
        if *byte == 0xff {
            *byte = 0;
        } else {
            *byte += 1;
            return out;
        }
    }
    out.insert(0, 1);
    out
}

#[derive(Debug, Clone, Copy)]
struct Akid<'a> {
    serial: Option<&'a [u8]>,
    key_id: Option<&'a [u8]>,
}

const SUBJECT_KEY_IDENTIFIER_OID: &[u64] = &[2, 5, 29, 14];

/// Minimal DER encoder for an OCTET STRING, used to build the
/// subjectKeyIdentifier extension's content.
fn der_octet_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0x04u8];
    der_push_len(bytes.len(), &mut out);
    out.extend_from_slice(bytes);
    out
}

fn der_push_len(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let be = len.to_be_bytes();
    let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
    let significant = &be[first_nonzero..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn authority_key_identifier<'a>(cert: &'a X509Certificate<'a>) -> Option<Akid<'a>> {
    cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::AuthorityKeyIdentifier(akid) => Some(Akid {
            key_id: akid.key_identifier.as_ref().map(|k| k.0.as_ref()),
            serial: akid.authority_cert_serial,
        }),
        _ => None,
    })
}

/// AKID.keyid byte value 0x00 is reserved; remap to 0x01 so a synthesized
/// certificate's SKID never collides with that placeholder and gets
/// misclassified as self-signed.
fn remap_reserved_skid(keyid: &[u8]) -> Vec<u8> {
    if keyid == [0x00] {
        vec![0x01]
    } else {
        keyid.to_vec()
    }
}

fn spki_verifies(spki_der: &[u8], cert: &X509Certificate<'_>) -> bool {
    match x509_parser::prelude::SubjectPublicKeyInfo::from_der(spki_der) {
        Ok((_, spki)) => cert.verify_signature(Some(&spki)).is_ok(),
        Err(_) => false,
    }
}
