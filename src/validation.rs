//! Hostname normalisation for cache keys and DNS query subjects

use crate::error::LookupError;

/// Provides hostname validation functionality
pub struct HostnameValidator;

impl HostnameValidator {
    /// Creates a new HostnameValidator instance
    pub fn new() -> Self {
        Self {}
    }

    /// Validates an already lower-cased hostname for format and syntax
    ///
    /// This function checks that the hostname:
    /// - Does not exceed 253 characters (RFC 1035)
    /// - Consists of valid characters (a-z, 0-9, -, _, .)
    /// - Does not have empty labels (consecutive, leading or trailing dots)
    /// - Has no label starting or ending with a hyphen
    /// - Each label (part between dots) does not exceed 63 characters
    ///
    /// Single-label names are accepted, virtual hosts are often internal.
    pub fn validate_hostname_format(&self, hostname: &str) -> bool {
        if hostname.is_empty() || hostname.len() > 253 {
            return false;
        }

        for label in hostname.split('.') {
            if label.is_empty() || label.len() > 63 {
                return false;
            }

            if !label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            {
                return false;
            }

            if label.starts_with('-') || label.ends_with('-') {
                return false;
            }
        }

        true
    }
}

impl Default for HostnameValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalises a raw hostname into its canonical lower-case form
///
/// Surrounding whitespace and a single trailing root dot are removed before
/// validation. The result is used both as the cache key and as the name in
/// the DNS question, so `App.Example.` and `app.example` share one entry.
///
/// # Examples
///
/// ```
/// use nsproxy::validation::normalize_hostname;
///
/// assert_eq!(normalize_hostname("App.Example.").unwrap(), "app.example");
/// assert!(normalize_hostname("bad..name").is_err());
/// ```
pub fn normalize_hostname(raw: &str) -> Result<String, LookupError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    let hostname = trimmed.to_ascii_lowercase();

    if !HostnameValidator::new().validate_hostname_format(&hostname) {
        return Err(LookupError::InvalidHostname(raw.to_string()));
    }

    Ok(hostname)
}

/// Splits an HTTP authority (`Host` header value) into host and optional port
///
/// Bracketed IPv6 literals keep their address without the brackets.
/// Returns `None` when the port part is present but not a valid port.
///
/// # Examples
///
/// ```
/// use nsproxy::validation::split_host_port;
///
/// assert_eq!(split_host_port("app.example:8080"), Some(("app.example", Some(8080))));
/// assert_eq!(split_host_port("app.example"), Some(("app.example", None)));
/// assert_eq!(split_host_port("[::1]:80"), Some(("::1", Some(80))));
/// ```
pub fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail {
            "" => Some((host, None)),
            _ => {
                let port = tail.strip_prefix(':')?.parse().ok()?;
                Some((host, Some(port)))
            }
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((authority, None)),
    }
}
