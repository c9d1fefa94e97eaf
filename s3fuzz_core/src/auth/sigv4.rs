//! AWS Signature Version 4 for the `s3` service, header based.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};

use super::Credentials;
use crate::fuzzer::{FuzzError, Request};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Headers never included in the signature.
const IGNORED_HEADERS: &[&str] = &["authorization", "content-type", "user-agent"];

type HmacSha256 = Hmac<Sha256>;

/// Computes the V4 authentication headers of `req`.
///
/// Returns `X-Amz-Date`, `X-Amz-Content-Sha256` (SHA-256 of the body), the
/// session token when present, and `Authorization`. Every other header of the
/// request except those in `IGNORED_HEADERS` is signed, together with `host`.
pub fn sign(
    credentials: &Credentials,
    region: &str,
    req: &Request,
    now: DateTime<Utc>,
) -> Result<HeaderMap, FuzzError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = hex::encode(Sha256::digest(req.body()));

    let mut signed = HeaderMap::new();
    signed.insert("x-amz-date", header_value(&amz_date)?);
    signed.insert("x-amz-content-sha256", header_value(&payload_hash)?);
    if let Some(token) = &credentials.session_token {
        signed.insert("x-amz-security-token", header_value(token)?);
    }

    let headers = canonical_header_map(req, &signed);
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method().as_str(),
        canonical_uri(req),
        canonical_query(req),
        canonical_headers,
        signed_headers,
        payload_hash,
    );

    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(&credentials.secret_key, &date, region)?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key
    );
    signed.insert(AUTHORIZATION, header_value(&authorization)?);
    Ok(signed)
}

fn header_value(value: &str) -> Result<HeaderValue, FuzzError> {
    HeaderValue::from_str(value).map_err(|e| FuzzError::Signing(e.to_string()))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, FuzzError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| FuzzError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn derive_signing_key(secret_key: &str, date: &str, region: &str) -> Result<Vec<u8>, FuzzError> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes())?;
    let region_key = hmac_sha256(&date_key, region.as_bytes())?;
    let service_key = hmac_sha256(&region_key, SERVICE.as_bytes())?;
    hmac_sha256(&service_key, b"aws4_request")
}

/// Lower-cased header names mapped to their trimmed, comma-joined values, with
/// `additional` overriding the request's own values.
fn canonical_header_map(req: &Request, additional: &HeaderMap) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    let mut collect = |name: &HeaderName, map: &HeaderMap| {
        if IGNORED_HEADERS.contains(&name.as_str()) {
            return;
        }
        let values: Vec<String> = map
            .get_all(name)
            .iter()
            .map(|v| collapse_whitespace(&String::from_utf8_lossy(v.as_bytes())))
            .collect();
        headers.insert(name.as_str().to_string(), values.join(","));
    };
    for name in req.headers().keys() {
        if !additional.contains_key(name) {
            collect(name, req.headers());
        }
    }
    for name in additional.keys() {
        collect(name, additional);
    }

    if let Some(authority) = req.uri().authority() {
        headers
            .entry("host".to_string())
            .or_insert_with(|| authority.as_str().to_string());
    }
    headers
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_uri(req: &Request) -> &str {
    match req.uri().path() {
        "" => "/",
        path => path,
    }
}

fn canonical_query(req: &Request) -> String {
    let mut params: Vec<(&str, &str)> = req
        .uri()
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
        .collect();
    params.sort_unstable();
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}
