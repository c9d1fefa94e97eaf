//! AWS Signature Version 2 (HMAC-SHA1 over the classic string to sign).

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{AUTHORIZATION, DATE, HeaderMap, HeaderValue};
use sha1::Sha1;

use super::Credentials;
use super::region::virtual_host_bucket;
use crate::fuzzer::{FuzzError, Request};

type HmacSha1 = Hmac<Sha1>;

/// S3 sub-resources that are part of the canonicalized resource.
const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// Computes the V2 authentication headers of `req`.
///
/// Requests carrying neither `Date` nor `X-Amz-Date` get a `Date` header for
/// `now`, which is returned alongside `Authorization`.
pub fn sign(
    credentials: &Credentials,
    req: &Request,
    now: DateTime<Utc>,
) -> Result<HeaderMap, FuzzError> {
    let mut signed = HeaderMap::new();

    let date = if req.headers().contains_key("x-amz-date") {
        String::new()
    } else if let Some(date) = req.headers().get(DATE) {
        String::from_utf8_lossy(date.as_bytes()).into_owned()
    } else {
        let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        signed.insert(DATE, header_value(&date)?);
        date
    };

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}\n{}{}",
        req.method().as_str(),
        header_str(req, "content-md5"),
        header_str(req, "content-type"),
        date,
        canonicalized_amz_headers(req),
        canonicalized_resource(req),
    );

    let mut mac = HmacSha1::new_from_slice(credentials.secret_key.as_bytes())
        .map_err(|e| FuzzError::Signing(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let authorization = format!("AWS {}:{}", credentials.access_key, signature);
    signed.insert(AUTHORIZATION, header_value(&authorization)?);
    Ok(signed)
}

fn header_value(value: &str) -> Result<HeaderValue, FuzzError> {
    HeaderValue::from_str(value).map_err(|e| FuzzError::Signing(e.to_string()))
}

fn header_str(req: &Request, name: &str) -> String {
    req.headers()
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
        .unwrap_or_default()
}

/// Lower-cased, sorted `x-amz-*` headers as `name:v1,v2\n` lines.
fn canonicalized_amz_headers(req: &Request) -> String {
    let mut amz: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in req.headers() {
        if name.as_str().starts_with("x-amz-") {
            amz.entry(name.as_str())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).trim().to_string());
        }
    }
    amz.iter()
        .map(|(name, values)| format!("{name}:{}\n", values.join(",")))
        .collect()
}

/// The bucket-qualified path plus sorted sub-resource query parameters.
fn canonicalized_resource(req: &Request) -> String {
    let uri = req.uri();
    let path = match uri.path() {
        "" => "/",
        path => path,
    };
    let mut resource = match virtual_host_bucket(uri) {
        Some(bucket) => format!("/{bucket}{path}"),
        None => path.to_string(),
    };

    let mut sub: Vec<(&str, Option<&str>)> = uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) if !v.is_empty() => (k, Some(v)),
            Some((k, _)) => (k, None),
            None => (p, None),
        })
        .filter(|(k, _)| SUB_RESOURCES.contains(k))
        .collect();
    sub.sort_unstable();

    if !sub.is_empty() {
        let params: Vec<String> = sub
            .into_iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v}"),
                None => k.to_string(),
            })
            .collect();
        resource.push('?');
        resource.push_str(&params.join("&"));
    }
    resource
}
