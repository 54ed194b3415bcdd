//! Signaling URL validation
//!
//! The SDP offer is posted to the signaling backend, so the base URL must be
//! a well-formed absolute URL with a host. HTTPS is required unless insecure
//! signaling has been explicitly allowed (local development backends).

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTPS, got: {0}")]
    HttpsRequired(String),

    #[error("URL scheme must be HTTP or HTTPS, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,
}

/// Validates the signaling base URL.
///
/// # Arguments
/// * `url` - The URL string to validate
/// * `allow_insecure` - Also accept plain `http`
///
/// # Returns
/// * `Ok(Url)` with the parsed URL
/// * `Err(UrlValidationError)` describing the first failed check
pub fn validate_signaling_url(url: &str, allow_insecure: bool) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_insecure => {
            warn!("Using insecure signaling URL: {}", url);
        }
        "http" => return Err(UrlValidationError::HttpsRequired(parsed.scheme().to_string())),
        other if allow_insecure => {
            return Err(UrlValidationError::UnsupportedScheme(other.to_string()));
        }
        other => return Err(UrlValidationError::HttpsRequired(other.to_string())),
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(parsed)
}
