use std::net::IpAddr;

use tracing::warn;

use crate::error::AppError;

/// Validate a submitted URL before any fetch happens and return its host.
///
/// Rejects non-http(s) schemes and hosts that point into local or private
/// network ranges, so a crafted submission cannot steer the fetcher at
/// internal services.
pub fn ensure_submission_url_allowed(url: &url::Url) -> Result<String, AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "rejected submission URL due to unsupported scheme");
            return Err(AppError::Validation(
                "Unsupported URL scheme for submission".to_string(),
            ));
        }
    }

    let Some(host) = url.host_str() else {
        warn!(%url, "rejected submission URL missing host");
        return Err(AppError::Validation(
            "URL is missing a host component".to_string(),
        ));
    };

    if host.eq_ignore_ascii_case("localhost") {
        warn!(%url, host, "rejected submission URL to localhost");
        return Err(AppError::Validation(
            "Submission URL host is not allowed".to_string(),
        ));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let is_disallowed = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };

        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_disallowed {
            warn!(%url, host, %ip, "rejected submission URL pointing to restricted network range");
            return Err(AppError::Validation(
                "Submission URL host is not allowed".to_string(),
            ));
        }
    }

    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_scheme() {
        let url = url::Url::parse("ftp://example.com").expect("url");
        assert!(ensure_submission_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_localhost() {
        let url = url::Url::parse("http://localhost/resource").expect("url");
        assert!(ensure_submission_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_private_ipv4() {
        let url = url::Url::parse("http://192.168.1.10/index.html").expect("url");
        assert!(ensure_submission_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_loopback_and_unspecified() {
        for candidate in ["http://127.0.0.1/x", "http://0.0.0.0/x", "http://[::1]/x"] {
            let url = url::Url::parse(candidate).expect("url");
            assert!(ensure_submission_url_allowed(&url).is_err(), "{candidate}");
        }
    }

    #[test]
    fn allows_public_domain_and_returns_host() {
        let url = url::Url::parse("https://news.example.com/path").expect("url");
        let host = ensure_submission_url_allowed(&url).expect("allowed");
        assert_eq!(host, "news.example.com");
    }
}
