//! Error taxonomy for the DANE verification engine.
//!
//! One flat enum with a hand-written `Display`/`Error` impl rather than
//! reaching for `thiserror`.

use std::fmt;

/// All errors the DANE engine can raise, at insertion time or at
/// verification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaneError {
    /// `usage` was not one of 0..=3.
    BadUsage(u8),
    /// `selector` was not one of 0..=1.
    BadSelector(u8),
    /// `matching_type` named an unrecognised digest algorithm.
    BadDigest(u8),
    /// `data.len()` did not equal the digest's output length.
    BadDataLength { expected: usize, actual: usize },
    /// `data` was empty where non-empty data is required.
    BadNullData,
    /// A usage-2/selector=cert record's data did not parse as an X.509
    /// certificate.
    BadCert(String),
    /// A certificate's public key could not be extracted for SPKI
    /// comparison.
    BadCertPKey(String),
    /// A usage-2/selector=spki record's data did not parse as a
    /// SubjectPublicKeyInfo.
    BadPKey(String),
    /// Trust-anchor synthesis needed the library's internal signing key but
    /// none is available on this platform.
    NoSignKey,
    /// The platform cannot provide the DANE-TA fallback path; callers must
    /// omit usage-2 records (`LibrarySupport::Partial`).
    DaneSupport,
    /// A `TlsaStore` operation was attempted before `dane_init`/`TlsaStore::new`.
    DaneInit,
    /// The TLS context (rustls `ClientConfig`) could not be initialised with
    /// the verification driver installed.
    SctxInit,
    /// `library_init` failed.
    LibraryInit(String),
    /// Memory allocation failure surfaced from a fallible constructor.
    Alloc,
    /// The built chain did not satisfy any usage-0/1 constraint.
    Untrusted { depth: usize },
    /// No reference identity matched the leaf certificate's names.
    HostnameMismatch,
    /// The underlying chain builder failed to build a valid PKIX chain.
    ChainBuild(String),
}

impl fmt::Display for DaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaneError::BadUsage(u) => write!(f, "invalid TLSA usage {u}, expected 0..=3"),
            DaneError::BadSelector(s) => write!(f, "invalid TLSA selector {s}, expected 0..=1"),
            DaneError::BadDigest(m) => write!(f, "unrecognised TLSA matching type {m}"),
            DaneError::BadDataLength { expected, actual } => write!(
                f,
                "TLSA data length {actual} does not match digest output length {expected}"
            ),
            DaneError::BadNullData => write!(f, "TLSA record data is empty"),
            DaneError::BadCert(reason) => write!(f, "invalid certificate in TLSA record: {reason}"),
            DaneError::BadCertPKey(reason) => {
                write!(f, "could not extract public key from certificate: {reason}")
            }
            DaneError::BadPKey(reason) => write!(f, "invalid SubjectPublicKeyInfo in TLSA record: {reason}"),
            DaneError::NoSignKey => write!(f, "no signing key available for trust-anchor synthesis"),
            DaneError::DaneSupport => write!(f, "platform cannot support DANE-TA; omit usage-2 records"),
            DaneError::DaneInit => write!(f, "TLSA store not initialised for this connection"),
            DaneError::SctxInit => write!(f, "failed to install DANE verifier on TLS context"),
            DaneError::LibraryInit(reason) => write!(f, "DANE library initialisation failed: {reason}"),
            DaneError::Alloc => write!(f, "allocation failure"),
            DaneError::Untrusted { depth } => write!(f, "certificate untrusted at depth {depth}"),
            DaneError::HostnameMismatch => write!(f, "certificate does not match any reference identity"),
            DaneError::ChainBuild(reason) => write!(f, "chain build failed: {reason}"),
        }
    }
}

impl std::error::Error for DaneError {}
