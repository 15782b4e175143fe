//! Token checks

use axum::http::{header, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::utils::sha256_hash;

pub const HEADER_ACCESS_TOKEN: &str = "x-access-token";
pub const HEADER_API_KEY: &str = "x-api-key";

/// Token from `Authorization: Bearer` or `X-Access-Token`
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        headers
            .get(HEADER_ACCESS_TOKEN)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

/// Hash the presented token and compare in constant time
pub fn token_matches(presented: &str, expected_hash: &str) -> bool {
    let presented_hash = sha256_hash(presented.as_bytes());
    presented_hash
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}

/// Check `X-API-Key` against the configured admin key
pub fn admin_key_matches(headers: &HeaderMap, expected: &SecretString) -> bool {
    let Some(provided) = headers.get(HEADER_API_KEY).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    // hash both so length differences do not short-circuit
    let provided = sha256_hash(provided.as_bytes());
    let expected = sha256_hash(expected.expose_secret().as_bytes());
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
