use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use super::types::CertificateInfo;

/// Extract metadata from a DER encoded leaf certificate
pub fn certificate_info(der: &[u8]) -> Option<CertificateInfo> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let validity = cert.validity();

    Some(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        not_before: to_utc(validity.not_before.timestamp())?,
        not_after: to_utc(validity.not_after.timestamp())?,
        fingerprint_sha256: hex::encode(Sha256::digest(der)),
    })
}

fn to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Days remaining when at or below the warning threshold
pub fn expiry_warning(info: &CertificateInfo, threshold_days: u32, now: DateTime<Utc>) -> Option<i64> {
    let days = info.days_remaining(now);
    (days <= i64::from(threshold_days)).then_some(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn info(not_after: DateTime<Utc>) -> CertificateInfo {
        CertificateInfo {
            subject: "CN=example.com".into(),
            issuer: "CN=Test CA".into(),
            not_before: not_after - Duration::days(90),
            not_after,
            fingerprint_sha256: "00".into(),
        }
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        assert!(certificate_info(b"definitely not DER").is_none());
    }

    #[test]
    fn warns_inside_threshold() {
        let now = Utc::now();
        assert_eq!(expiry_warning(&info(now + Duration::days(5) + Duration::hours(1)), 14, now), Some(5));
        assert_eq!(expiry_warning(&info(now + Duration::days(30) + Duration::hours(1)), 14, now), None);
        assert!(expiry_warning(&info(now - Duration::days(2)), 14, now).unwrap() < 0);
    }
}
