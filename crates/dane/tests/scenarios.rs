//! End-to-end verification scenarios, driven directly against
//! `DaneVerifier::verify_server_cert` — a pure function of its
//! certificate-bytes arguments, so these run with no real TLS socket,
//! matching how `rustls`'s own `ServerCertVerifier` consumers test custom
//! verifiers.

use dane::{DaneVerifier, ReferenceIdentity, TlsaStore};
use rcgen::{BasicConstraints, CertificateParams, DnType, Issuer, IsCa, KeyPair};
use rustls::client::danger::ServerCertVerifier;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

fn now() -> UnixTime {
    UnixTime::now()
}

fn self_signed(san: &str) -> CertificateDer<'static> {
    let params = CertificateParams::new(vec![san.to_string()]).unwrap();
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    params.self_signed(&key).unwrap().der().clone()
}

/// Builds a two-level chain: a self-signed CA and a leaf it issues for
/// `san`. Returns (ca_der, leaf_der).
fn ca_and_leaf(san: &str) -> (CertificateDer<'static>, CertificateDer<'static>) {
    let ca_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.distinguished_name.push(DnType::CommonName, "Test CA");
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();
    let ca_der = ca_cert.der().clone();

    let leaf_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let leaf_params = CertificateParams::new(vec![san.to_string()]).unwrap();
    let issuer = Issuer::new(ca_params, ca_key);
    let leaf_cert = leaf_params.signed_by(&leaf_key, &issuer).unwrap();

    (ca_der, leaf_cert.der().clone())
}

fn spki_of(der: &CertificateDer<'_>) -> Vec<u8> {
    let (_, cert) = X509Certificate::from_der(der.as_ref()).unwrap();
    cert.public_key().raw.to_vec()
}

#[test]
fn scenario_1_dane_ee_full_cert_match() {
    let leaf = self_signed("example.com");
    let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
    store.add_tlsa(3, 0, None, leaf.as_ref().to_vec()).unwrap();

    let verifier = DaneVerifier::new(store, vec![]);
    let server_name = ServerName::try_from("example.com").unwrap();
    verifier
        .verify_server_cert(&leaf, &[], &server_name, &[], now())
        .expect("DANE-EE full-cert match should bypass PKIX and succeed");
}

#[test]
fn scenario_2_dane_ee_sha256_spki_match_bypasses_invalid_pkix() {
    let leaf = self_signed("example.com");
    let digest = Sha256::digest(spki_of(&leaf)).to_vec();

    let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
    store.add_tlsa(3, 1, Some(1), digest).unwrap();

    // No PKIX roots configured at all: PKIX would fail outright, but the
    // DANE-EE short circuit never reaches chain building.
    let verifier = DaneVerifier::new(store, vec![]);
    let server_name = ServerName::try_from("example.com").unwrap();
    verifier
        .verify_server_cert(&leaf, &[], &server_name, &[], now())
        .expect("DANE-EE SPKI match should succeed despite no PKIX trust");
}

#[test]
fn scenario_3_dane_ta_certificate_promotes_untrusted_ca() {
    dane::library_init();
    let (ca_der, leaf_der) = ca_and_leaf("example.com");

    let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
    store.add_tlsa(2, 0, None, ca_der.as_ref().to_vec()).unwrap();

    // `ca_der` is not in the PKIX trust roots passed to the verifier.
    let verifier = DaneVerifier::new(store, vec![]);
    let server_name = ServerName::try_from("example.com").unwrap();
    verifier
        .verify_server_cert(&leaf_der, &[ca_der], &server_name, &[], now())
        .expect("synthesizer should promote the matched CA to a trust anchor");
}

#[test]
fn scenario_4_dane_ta_bare_key_without_ca_in_chain() {
    dane::library_init();
    let (ca_der, leaf_der) = ca_and_leaf("example.com");
    let ca_spki = spki_of(&ca_der);

    let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);
    store.add_tlsa(2, 1, None, ca_spki).unwrap();

    // The peer sends only the leaf, never the CA certificate itself.
    let verifier = DaneVerifier::new(store, vec![]);
    let server_name = ServerName::try_from("example.com").unwrap();
    verifier
        .verify_server_cert(&leaf_der, &[], &server_name, &[], now())
        .expect("ta_signed should find the bare-key match via signature verification");
}

#[test]
fn scenario_5_pkix_ee_with_hostname_mismatch_is_rejected() {
    let leaf = self_signed("example.com");
    let digest = Sha256::digest(leaf.as_ref()).to_vec();

    let mut store = TlsaStore::new(vec![ReferenceIdentity::new("other.example")], false);
    store.add_tlsa(1, 0, Some(1), digest).unwrap();

    // The leaf is its own trust anchor for this PKIX-only scenario.
    let verifier = DaneVerifier::new(store, vec![leaf.clone()]);
    let server_name = ServerName::try_from("example.com").unwrap();
    let err = verifier
        .verify_server_cert(&leaf, &[], &server_name, &[], now())
        .expect_err("PKIX should succeed but the name check should fail");
    assert!(err.to_string().contains("reference identity"));
}

#[test]
fn scenario_6_duplicate_insertion_is_idempotent() {
    let leaf = self_signed("example.com");
    let mut store = TlsaStore::new(vec![ReferenceIdentity::new("example.com")], false);

    store.add_tlsa(3, 0, None, leaf.as_ref().to_vec()).unwrap();
    store.add_tlsa(3, 0, None, leaf.as_ref().to_vec()).unwrap();

    assert_eq!(store.records(dane::Usage::DaneEe).count(), 1);
}
