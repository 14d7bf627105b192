//! DNS-name checking against reference identities, per RFC 6125: leftmost
//! label wildcard matching, sub-domain references, and SAN-over-CN
//! precedence (CN is consulted only when the certificate carries no DNS
//! SAN at all — see DESIGN.md).

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, ParsedExtension};

use crate::store::ReferenceIdentity;

/// Outcome of the name-check pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameCheckResult {
    Matched(String),
    NoMatch,
}

/// Extracts the candidate "certids" from a leaf certificate: DNS-type
/// subjectAltName entries when present, else the commonName.
fn candidate_names(cert: &X509Certificate) -> Vec<String> {
    let dns_sans: Vec<String> = cert
        .extensions()
        .iter()
        .filter_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => Some(san),
            _ => None,
        })
        .flat_map(|san| san.general_names.iter())
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            _ => None,
        })
        .collect();

    if !dns_sans.is_empty() {
        return dns_sans;
    }

    cert.subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// A certid's bytes are restricted to LDH, `.` and `*`; trailing NULs are
/// trimmed, embedded NULs reject the name outright.
fn sanitize_certid(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == 0 {
        end -= 1;
    }
    let (trimmed, rest) = bytes.split_at(end);
    if rest.iter().any(|&b| b != 0) {
        // NULs after the trimmed trailing run would have been caught above;
        // this branch exists only so a stray non-NUL after the trailer also
        // rejects outright rather than being silently dropped.
        return None;
    }
    if trimmed.contains(&0) {
        return None;
    }
    let valid = trimmed
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'*');
    if !valid {
        return None;
    }
    std::str::from_utf8(trimmed).ok().map(|s| s.to_string())
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Tests a single certid against a single literal reference identity,
/// applying RFC 6125 leftmost-label wildcard rules (or the multi-label
/// variant when `multi_label_wildcard` is set).
fn literal_matches(certid: &str, reference: &str, multi_label_wildcard: bool) -> bool {
    if eq_ignore_case(certid, reference) {
        return true;
    }

    let Some(cert_suffix) = certid.strip_prefix("*.") else {
        return false;
    };

    if multi_label_wildcard {
        // The wildcard may span multiple labels: align on the trailing
        // suffix rather than the reference's leftmost dot.
        return reference.len() > cert_suffix.len()
            && eq_ignore_case(&reference[reference.len() - cert_suffix.len()..], cert_suffix)
            && reference.as_bytes().get(reference.len() - cert_suffix.len() - 1) == Some(&b'.');
    }

    let Some(dot) = reference.find('.') else {
        return false;
    };
    eq_ignore_case(&reference[dot + 1..], cert_suffix)
}

/// Tests a single certid against a sub-domain reference (`.example.com`,
/// `reference` includes the leading dot): the certid must be
/// `<label(s)>.example.com`, i.e. at least one more label than the
/// reference.
fn subdomain_matches(certid: &str, reference: &str) -> bool {
    certid.len() > reference.len() && eq_ignore_case(&certid[certid.len() - reference.len()..], reference)
}

/// Runs the Name Checker against a leaf certificate. On the
/// first matching reference identity, returns the certid that matched —
/// the caller is responsible for storing it as `TlsaStore::matched_host`.
pub fn check_names(
    cert: &X509Certificate,
    references: &[ReferenceIdentity],
    multi_label_wildcard: bool,
) -> NameCheckResult {
    if references.is_empty() {
        return NameCheckResult::NoMatch;
    }

    let certids: Vec<String> = candidate_names(cert)
        .iter()
        .filter_map(|raw| sanitize_certid(raw))
        .collect();

    for reference in references {
        for certid in &certids {
            let hit = if reference.is_subdomain {
                subdomain_matches(certid, &reference.pattern)
            } else {
                literal_matches(certid, &reference.pattern, multi_label_wildcard)
            };
            if hit {
                return NameCheckResult::Matched(certid.clone());
            }
        }
    }

    NameCheckResult::NoMatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::FromDer;

    fn lit(s: &str) -> ReferenceIdentity {
        ReferenceIdentity::new(s)
    }

    #[test]
    fn literal_exact_match_is_case_insensitive() {
        assert!(literal_matches("Example.COM", "example.com", false));
    }

    #[test]
    fn single_label_wildcard_matches_one_label() {
        assert!(literal_matches("*.a.b", "x.a.b", false));
        assert!(!literal_matches("*.a.b", "a.b", false));
        assert!(!literal_matches("*.a.b", "y.x.a.b", false));
    }

    #[test]
    fn multi_label_wildcard_spans_labels_when_enabled() {
        assert!(literal_matches("*.a.b", "y.x.a.b", true));
    }

    #[test]
    fn subdomain_reference_requires_extra_label() {
        assert!(subdomain_matches("mail.example.com", ".example.com"));
        assert!(!subdomain_matches("example.com", ".example.com"));
        assert!(!subdomain_matches("evilexample.com", ".example.com"));
    }

    #[test]
    fn sanitize_rejects_embedded_nul() {
        let mut s = String::from("exa");
        s.push('\0');
        s.push_str("mple.com");
        assert_eq!(sanitize_certid(&s), None);
    }

    #[test]
    fn sanitize_trims_trailing_nul() {
        let mut s = String::from("example.com");
        s.push('\0');
        assert_eq!(sanitize_certid(&s), Some("example.com".to_string()));
    }

    #[test]
    fn sanitize_rejects_invalid_bytes() {
        assert_eq!(sanitize_certid("exa mple.com"), None);
        assert_eq!(sanitize_certid("exam_ple.com"), None);
    }

    #[test]
    fn empty_reference_list_never_matches() {
        let params = rcgen::CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = params.self_signed(&key).unwrap();
        let der = cert.der().clone();
        let (_, parsed) = X509Certificate::from_der(der.as_ref()).unwrap();
        assert_eq!(check_names(&parsed, &[], false), NameCheckResult::NoMatch);
    }

    #[test]
    fn reference_constructor_detects_subdomain_form() {
        let r = lit(".example.com");
        assert!(r.is_subdomain);
        let r = lit("example.com");
        assert!(!r.is_subdomain);
        let r = lit(".");
        assert!(!r.is_subdomain);
    }
}
