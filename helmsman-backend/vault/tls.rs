//! X.509 metadata extraction for TLS credentials.

use chrono::{DateTime, TimeZone, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::{X509, X509NameRef};

use crate::error::{ControlError, Result};
use crate::store::credentials::TlsMetadata;

/// Parse a PEM server certificate into queryable public metadata.
pub fn parse_certificate(cert_pem: &str) -> Result<TlsMetadata> {
    let cert = X509::from_pem(cert_pem.as_bytes())
        .map_err(|e| ControlError::Validation(format!("invalid certificate: {e}")))?;

    let common_name = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();

    let serial = cert
        .serial_number()
        .to_bn()
        .and_then(|bn| bn.to_hex_str())
        .map(|s| s.to_lowercase())
        .map_err(|e| ControlError::Validation(format!("invalid certificate serial: {e}")))?;

    let fingerprint = cert
        .digest(MessageDigest::sha256())
        .map_err(|e| ControlError::Validation(format!("fingerprint failed: {e}")))?
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    let mut san = Vec::new();
    if let Some(names) = cert.subject_alt_names() {
        for name in &names {
            if let Some(dns) = name.dnsname() {
                san.push(format!("DNS:{dns}"));
            } else if let Some(ip) = name.ipaddress() {
                san.push(format!("IP:{}", format_ip(ip)));
            }
        }
    }

    Ok(TlsMetadata {
        common_name,
        subject: name_to_string(cert.subject_name()),
        issuer: name_to_string(cert.issuer_name()),
        serial,
        not_before: asn1_to_datetime(cert.not_before())?,
        not_after: asn1_to_datetime(cert.not_after())?,
        san,
        fingerprint,
    })
}

fn name_to_string(name: &X509NameRef) -> String {
    name.entries()
        .filter_map(|entry| {
            let key = entry.object().nid().short_name().ok()?;
            let value = entry.data().as_utf8().ok()?;
            Some(format!("{key}={value}"))
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn format_ip(raw: &[u8]) -> String {
    match raw.len() {
        4 => std::net::Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => raw.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

fn asn1_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)
        .map_err(|e| ControlError::Internal(format!("asn1 epoch: {e}")))?;
    let diff = epoch
        .diff(time)
        .map_err(|e| ControlError::Validation(format!("invalid certificate time: {e}")))?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ControlError::Validation("certificate time out of range".into()))
}
