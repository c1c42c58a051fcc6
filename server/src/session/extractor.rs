//! Pulls the session token out of a raw `Cookie` header.

use actix_web::{http::header, HttpRequest};

pub const ACCESS_COOKIE_NAME: &str = "access_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no session cookie")]
    MissingSession,

    #[error("session cookie is malformed")]
    Malformed,
}

/// Joins every `Cookie` header of the request into one `; `-separated string.
pub fn cookie_header(req: &HttpRequest) -> Option<String> {
    let values: Vec<&str> = req
        .headers()
        .get_all(header::COOKIE)
        .filter_map(|value| value.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join("; "))
    }
}

/// Succeeds when the header exists and names the session cookie at all.
pub fn presence(cookie_header: Option<&str>) -> Result<&str, SessionError> {
    let raw = cookie_header
        .filter(|raw| !raw.trim().is_empty())
        .ok_or(SessionError::MissingSession)?;

    if pairs(raw).any(|(name, _)| name == ACCESS_COOKIE_NAME) {
        Ok(raw)
    } else {
        Err(SessionError::MissingSession)
    }
}

/// Returns the session cookie value, rejecting empty, duplicated or
/// non-RFC 6265 values.
pub fn extract_token(raw: &str) -> Result<&str, SessionError> {
    let mut values = pairs(raw)
        .filter(|(name, _)| *name == ACCESS_COOKIE_NAME)
        .map(|(_, value)| value);

    let value = match (values.next(), values.next()) {
        (Some(Some(value)), None) => value,
        _ => return Err(SessionError::Malformed),
    };

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);

    if value.is_empty() || !value.bytes().all(is_cookie_octet) {
        return Err(SessionError::Malformed);
    }

    Ok(value)
}

fn pairs(raw: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (pair, None),
        })
}

fn is_cookie_octet(byte: u8) -> bool {
    matches!(byte, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}
