//! Request signing as a pipeline step.

pub mod region;
pub mod sigv2;
pub mod sigv4;

use crate::fuzzer::{FuzzError, Fuzzer, Request};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use tracing::debug;

pub use region::{DEFAULT_REGION, region_from_url, virtual_host_bucket};

/// Credentials handed to a [`Signer`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Produces the authentication headers of a request.
///
/// Implementations must not modify the request; the returned headers are merged
/// into it by the adapters.
pub trait Signer {
    fn sign_v2(&self, credentials: &Credentials, req: &Request) -> Result<HeaderMap, FuzzError>;

    fn sign_v4(
        &self,
        credentials: &Credentials,
        region: &str,
        req: &Request,
    ) -> Result<HeaderMap, FuzzError>;
}

/// HMAC based AWS signer implementing signature V2 (HMAC-SHA1) and V4
/// (HMAC-SHA256, service `s3`).
///
/// The signing time is the current time unless pinned with [`HmacSigner::at`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSigner {
    clock: Option<DateTime<Utc>>,
}

impl HmacSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signer that always signs as if the current time were `time`.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self { clock: Some(time) }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }
}

impl Signer for HmacSigner {
    fn sign_v2(&self, credentials: &Credentials, req: &Request) -> Result<HeaderMap, FuzzError> {
        sigv2::sign(credentials, req, self.now())
    }

    fn sign_v4(
        &self,
        credentials: &Credentials,
        region: &str,
        req: &Request,
    ) -> Result<HeaderMap, FuzzError> {
        sigv4::sign(credentials, region, req, self.now())
    }
}

/// Replaces every header of `req` that also appears in `signed`.
fn merge_headers(req: &mut Request, signed: HeaderMap) {
    for name in signed.keys() {
        req.headers_mut().remove(name);
        for value in signed.get_all(name) {
            req.headers_mut().append(name.clone(), value.clone());
        }
    }
}

/// A fuzzer signing requests with AWS signature V2.
///
/// Headers added by fuzzers running after it are not covered by the signature.
#[derive(Debug, Clone)]
pub struct SignerV2<S = HmacSigner> {
    credentials: Credentials,
    signer: S,
}

impl SignerV2 {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self::with_signer(Credentials::new(access_key, secret_key), HmacSigner::new())
    }
}

impl<S: Signer> SignerV2<S> {
    pub fn with_signer(credentials: Credentials, signer: S) -> Self {
        Self {
            credentials,
            signer,
        }
    }
}

impl<S: Signer> Fuzzer for SignerV2<S> {
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        let signed = self.signer.sign_v2(&self.credentials, req)?;
        debug!(headers = signed.len(), "Signed request with V2");
        merge_headers(req, signed);
        Ok(())
    }
}

/// A fuzzer signing requests with AWS signature V4.
///
/// The region is derived from the request URL with [`region_from_url`] and
/// falls back to [`DEFAULT_REGION`].
#[derive(Debug, Clone)]
pub struct SignerV4<S = HmacSigner> {
    credentials: Credentials,
    signer: S,
}

impl SignerV4 {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        let credentials = Credentials {
            session_token,
            ..Credentials::new(access_key, secret_key)
        };
        Self::with_signer(credentials, HmacSigner::new())
    }
}

impl<S: Signer> SignerV4<S> {
    pub fn with_signer(credentials: Credentials, signer: S) -> Self {
        Self {
            credentials,
            signer,
        }
    }
}

impl<S: Signer> Fuzzer for SignerV4<S> {
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        let region = region_from_url(req.uri()).unwrap_or_else(|| DEFAULT_REGION.to_string());
        let signed = self.signer.sign_v4(&self.credentials, &region, req)?;
        debug!(region = %region, headers = signed.len(), "Signed request with V4");
        merge_headers(req, signed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::HeaderValue;
    use std::sync::{Arc, Mutex};

    /// Records the region it was asked to sign for and returns fixed headers.
    #[derive(Default, Clone)]
    struct RecordingSigner {
        regions: Arc<Mutex<Vec<String>>>,
    }

    impl Signer for RecordingSigner {
        fn sign_v2(&self, _c: &Credentials, _req: &Request) -> Result<HeaderMap, FuzzError> {
            let mut headers = HeaderMap::new();
            headers.insert("authorization", HeaderValue::from_static("AWS ak:v2"));
            Ok(headers)
        }

        fn sign_v4(
            &self,
            _c: &Credentials,
            region: &str,
            _req: &Request,
        ) -> Result<HeaderMap, FuzzError> {
            self.regions.lock().unwrap().push(region.to_string());
            let mut headers = HeaderMap::new();
            headers.insert("authorization", HeaderValue::from_static("AWS4-HMAC-SHA256 v4"));
            headers.insert("x-amz-date", HeaderValue::from_static("20130524T000000Z"));
            Ok(headers)
        }
    }

    fn request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .header("authorization", "stale")
            .header("x-amz-date", "stale")
            .header("x-amz-meta-keep", "kept")
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn signer_v2_overwrites_signed_headers() {
        let mut fuzzer =
            SignerV2::with_signer(Credentials::new("ak", "sk"), RecordingSigner::default());
        let mut req = request("http://localhost:9000/bucket");
        fuzzer.fuzz(&mut req).unwrap();

        assert_eq!(req.headers().get_all("authorization").iter().count(), 1);
        assert_eq!(req.headers()["authorization"], "AWS ak:v2");
        assert_eq!(req.headers()["x-amz-date"], "stale");
        assert_eq!(req.headers()["x-amz-meta-keep"], "kept");
    }

    #[test]
    fn signer_v4_derives_region_from_url() {
        let signer = RecordingSigner::default();
        let regions = signer.regions.clone();
        let mut fuzzer = SignerV4::with_signer(Credentials::new("ak", "sk"), signer);

        let mut req = request("https://s3.eu-west-1.amazonaws.com/bucket");
        fuzzer.fuzz(&mut req).unwrap();
        let mut req = request("http://localhost:9000/bucket");
        fuzzer.fuzz(&mut req).unwrap();

        assert_eq!(*regions.lock().unwrap(), vec!["eu-west-1", "us-east-1"]);
        assert_eq!(req.headers()["authorization"], "AWS4-HMAC-SHA256 v4");
        assert_eq!(req.headers()["x-amz-date"], "20130524T000000Z");
        assert_eq!(req.headers()["x-amz-meta-keep"], "kept");
    }

    #[test]
    fn signing_adapters_have_no_observation_capability() {
        let mut v2 = SignerV2::new("ak", "sk");
        let mut v4 = SignerV4::new("ak", "sk", None);
        assert!(v2.as_loop_fuzzer().is_none());
        assert!(v4.as_loop_fuzzer().is_none());
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let creds = Credentials::new("ak", "very-secret").with_session_token("token");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("ak"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("token\""));
    }
}
