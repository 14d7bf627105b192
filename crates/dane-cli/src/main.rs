//! CLI demo exercising the DANE verification engine end-to-end against a
//! live TLS service. A thin consumer of `dane`, built with `clap`'s
//! derive macros.

use std::fs;
use std::io::Write;
use std::net::TcpStream;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dane::{DaneError, DaneVerifier, LibrarySupport, ReferenceIdentity, TlsaStore};
use rustls_pki_types::{CertificateDer, ServerName};

/// Exercises a single TLSA association against a live TLS endpoint.
#[derive(Debug, Parser)]
#[command(name = "dane-cli")]
struct Args {
    /// TLSA usage: 0=PKIX-TA, 1=PKIX-EE, 2=DANE-TA, 3=DANE-EE
    usage: u8,
    /// TLSA selector: 0=cert, 1=spki
    selector: u8,
    /// TLSA matching type: 0=full, 1=sha256, 2=sha512
    mtype: u8,
    /// PEM file holding the certificate or public key the TLSA record
    /// refers to
    certfile: String,
    /// PEM file of additional PKIX trust roots (not consulted for
    /// DANE-EE/DANE-TA verification — see DESIGN.md)
    cafile: String,
    /// Service name, `host:port` form
    service: String,
    /// Primary reference identity (the TLSA base domain)
    hostname: String,
    /// Additional reference identities
    extra_names: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dane-cli: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    match dane::library_init() {
        LibrarySupport::Full => {}
        LibrarySupport::Partial => eprintln!("dane-cli: warning: DANE-TA synthesis unavailable on this platform"),
        LibrarySupport::Error(e) => return Err(Box::new(e)),
    }

    let cert_pem = fs::read(&args.certfile)?;
    let data = pem_to_der_payload(&cert_pem)?;

    let mtype = match args.mtype {
        0 => None,
        other => Some(other),
    };

    let mut references = vec![ReferenceIdentity::new(args.hostname.clone())];
    references.extend(args.extra_names.iter().map(ReferenceIdentity::new));

    let mut store = TlsaStore::new(references, false);
    store.add_tlsa(args.usage, args.selector, mtype, data)?;

    let ca_pem = fs::read(&args.cafile)?;
    let roots = pem_to_certs(&ca_pem)?;

    let verifier = DaneVerifier::new(store, roots);

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier as Arc<dyn rustls::client::danger::ServerCertVerifier>)
        .with_no_client_auth();

    let server_name = ServerName::try_from(args.hostname.clone())?;
    let mut conn = rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|_| DaneError::SctxInit)?;
    let mut sock = TcpStream::connect(&args.service)?;

    while conn.is_handshaking() {
        if conn.wants_write() {
            conn.write_tls(&mut sock)?;
        }
        if conn.wants_read() {
            conn.read_tls(&mut sock)?;
            conn.process_new_packets()?;
        }
    }

    println!("dane-cli: verification succeeded for {}", args.hostname);
    let _ = sock.flush();
    Ok(())
}

/// Decodes the first PEM block in `pem` to raw DER bytes, regardless of
/// whether it is a certificate or a bare public key — both are valid TLSA
/// payloads for selector=cert/selector=spki respectively.
fn pem_to_der_payload(pem: &[u8]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut reader = std::io::Cursor::new(pem);
    for item in rustls_pemfile::read_all(&mut reader) {
        match item? {
            rustls_pemfile::Item::X509Certificate(der) => return Ok(der.to_vec()),
            rustls_pemfile::Item::SubjectPublicKeyInfo(der) => return Ok(der.to_vec()),
            _ => continue,
        }
    }
    Err("no certificate or public key found in PEM file".into())
}

fn pem_to_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, Box<dyn std::error::Error>> {
    let mut reader = std::io::Cursor::new(pem);
    let mut out = Vec::new();
    for item in rustls_pemfile::read_all(&mut reader) {
        if let rustls_pemfile::Item::X509Certificate(der) = item? {
            out.push(der);
        }
    }
    Ok(out)
}
