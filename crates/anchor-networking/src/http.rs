//! JSON-POST helper for the peer HTTP endpoints.

use crate::NetError;
use serde::Serialize;

/// Posts `body` as JSON and returns `(status, raw body)`. Transport-level
/// failures surface as [`NetError::Http`]; non-2xx statuses are returned to
/// the caller, who decides what they mean.
pub async fn post_json<B: Serialize>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<(u16, Vec<u8>), NetError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| NetError::Http(e.to_string()))?;
    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| NetError::Http(e.to_string()))?;
    Ok((status, bytes.to_vec()))
}

/// Joins a peer base URL and a route path without doubling slashes.
pub fn peer_endpoint(base: &str, route: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), route.trim_start_matches('/'))
}
