use axum::http::HeaderMap;

use crate::error::AppError;

/// Message for every failed site credential check, so callers cannot tell
/// an unknown key from a key that belongs to another site.
pub const INVALID_SITE_CREDENTIALS: &str = "Invalid API key for this site";

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

/// Check the operator bearer token.
pub fn require_admin(headers: &HeaderMap, admin_token: &str) -> Result<(), AppError> {
    let token = extract_bearer_token(headers)?;
    if constant_time_eq(token.as_bytes(), admin_token.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::unauthorized("Invalid admin token"))
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer spk_abc"));

        assert_eq!(extract_bearer_token(&headers).unwrap(), "spk_abc");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn bearer_token_extractor_rejects_empty_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn admin_check_compares_whole_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer admin"));

        assert!(require_admin(&headers, "admin").is_ok());
        assert!(require_admin(&headers, "admin2").is_err());
        assert!(require_admin(&headers, "admiN").is_err());
        assert!(require_admin(&HeaderMap::new(), "admin").is_err());
    }
}
