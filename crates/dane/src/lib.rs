//! DANE (DNS-Based Authentication of Named Entities, RFC 6698/7671)
//! certificate verification atop a `rustls` PKIX chain builder.
//!
//! This crate implements the verification engine only: TLSA records must
//! be supplied by the caller (typically after a DNSSEC-validated DNS
//! lookup performed elsewhere) via [`store::TlsaStore::add_tlsa`], then
//! [`verifier::DaneVerifier`] is installed as a `rustls`
//! `ServerCertVerifier` for the connection.

pub mod chain;
pub mod config;
pub mod error;
pub mod matcher;
pub mod name;
pub mod posthook;
pub mod store;
pub mod synth;
pub mod verifier;

pub use chain::{ChainBuilder, WebPkiChainBuilder};
pub use config::{DaneConfig, PartialSupportPolicy};
pub use error::DaneError;
pub use matcher::{match_cert, MatchKind};
pub use store::{DigestAlgorithm, ReferenceIdentity, Selector, TlsaRecord, TlsaStore, Usage};
pub use synth::{SigningKey, Synthesizer};
pub use verifier::{library_init, DaneVerifier, LibrarySupport};
