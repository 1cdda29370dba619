//! Input validation for the submission boundary.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Maximum allowed URL length.
pub const MAX_URL_LENGTH: usize = 2048;

/// Hostnames that resolve to cloud metadata or the local machine.
const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal", "metadata"];

/// Validate a source URL before it is fingerprinted or analyzed.
///
/// Rejects non-HTTP schemes and URLs that target loopback, private,
/// link-local or metadata endpoints.
pub fn validate_source_url(raw: &str) -> Result<String, String> {
    let url = raw.trim();
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(format!(
            "URL exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        ));
    }

    let parsed = Url::parse(url).map_err(|e| format!("Invalid URL format: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(format!(
                "Invalid protocol '{}'. Only HTTP and HTTPS are allowed.",
                scheme
            ))
        }
    }

    let restricted = match parsed.host() {
        None => return Err("URL must have a valid host".to_string()),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            BLOCKED_HOSTS.contains(&domain.as_str()) || domain.ends_with(".internal")
        }
        Some(Host::Ipv4(ip)) => is_restricted_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_restricted_ip(IpAddr::V6(ip)),
    };
    if restricted {
        return Err("URL appears to target an internal or restricted endpoint".to_string());
    }

    Ok(url.to_string())
}

fn is_restricted_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4 == Ipv4Addr::new(169, 254, 169, 254)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6
                    .to_ipv4_mapped()
                    .map_or(false, |v4| is_restricted_ip(IpAddr::V4(v4)))
                || v6 == Ipv6Addr::LOCALHOST
        }
    }
}

/// Job IDs are UUIDs: alphanumerics and hyphens, 8-64 chars.
pub fn is_valid_job_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 64 || id.len() < 8 {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_public_urls() {
        assert_eq!(
            validate_source_url("  https://www.youtube.com/watch?v=dQw4w9WgXcQ ").unwrap(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert!(validate_source_url("http://93.184.216.34/video.mp4").is_ok());
    }

    #[test]
    fn test_rejects_internal_targets() {
        for url in [
            "http://localhost:8080/",
            "http://127.0.0.1/x",
            "http://10.0.0.5/x",
            "http://192.168.1.1/x",
            "http://169.254.169.254/computeMetadata/v1/",
            "http://metadata.google.internal/",
            "http://[::1]/",
            "http://[fd00::1]/",
        ] {
            assert!(validate_source_url(url).is_err(), "{} should be rejected", url);
        }
    }

    #[test]
    fn test_rejects_bad_scheme_and_garbage() {
        assert!(validate_source_url("ftp://example.com/a").is_err());
        assert!(validate_source_url("file:///etc/passwd").is_err());
        assert!(validate_source_url("not a url").is_err());
        assert!(validate_source_url("").is_err());
    }

    #[test]
    fn test_job_id_format() {
        assert!(is_valid_job_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_valid_job_id("short"));
        assert!(!is_valid_job_id("../../etc/passwd"));
    }
}
