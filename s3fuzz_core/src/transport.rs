use crate::fuzzer::{BoxedFuzzer, FuzzError, LoopFuzzer, MultiFuzzer, Request, Response};
use thiserror::Error;
use tracing::debug;

/// Sends a request and returns its response.
///
/// This is the seam the interception adapter wraps: anything able to perform a
/// round trip (a real HTTP client, an in-memory double) can sit behind it.
pub trait Transport {
    type Error;

    fn send(&mut self, req: Request) -> Result<Response, Self::Error>;
}

#[derive(Error, Debug)]
pub enum InterceptError<E> {
    /// The pipeline failed; the request was never sent.
    #[error("Fuzzing the request failed: {0}")]
    Fuzz(#[source] FuzzError),

    /// The wrapped transport failed. Its error is carried unchanged.
    #[error("Transport error: {0}")]
    Transport(E),
}

/// A [`Transport`] that runs every outgoing request through a [`LoopFuzzer`]
/// before delegating, and feeds each response back to it.
///
/// For one round trip:
/// 1. `fuzz` the request; on failure the request is dropped unsent.
/// 2. hand it to the wrapped transport; a failure is returned as is and the
///    fuzzer sees no response.
/// 3. call `adjust` once with the response, then return the response.
#[derive(Debug)]
pub struct Intercept<T, F> {
    inner: T,
    fuzzer: F,
}

impl<T, F> Intercept<T, F>
where
    T: Transport,
    F: LoopFuzzer,
{
    pub fn new(inner: T, fuzzer: F) -> Self {
        Self { inner, fuzzer }
    }

    pub fn fuzzer(&self) -> &F {
        &self.fuzzer
    }

    pub fn fuzzer_mut(&mut self) -> &mut F {
        &mut self.fuzzer
    }

    pub fn into_parts(self) -> (T, F) {
        (self.inner, self.fuzzer)
    }
}

impl<T, F> Transport for Intercept<T, F>
where
    T: Transport,
    F: LoopFuzzer,
{
    type Error = InterceptError<T::Error>;

    fn send(&mut self, mut req: Request) -> Result<Response, Self::Error> {
        if let Err(e) = self.fuzzer.fuzz(&mut req) {
            debug!(error = %e, uri = %req.uri(), "Request dropped before sending");
            return Err(InterceptError::Fuzz(e));
        }

        let resp = match self.inner.send(req) {
            Ok(resp) => resp,
            Err(e) => {
                debug!("Transport failed, skipping response adjustment");
                return Err(InterceptError::Transport(e));
            }
        };

        self.fuzzer.adjust(&resp);
        Ok(resp)
    }
}

/// Wraps `transport` so that every request passes through `fuzzers`, applied in
/// order as a single [`MultiFuzzer`].
pub fn register_fuzzer<T: Transport>(
    transport: T,
    fuzzers: Vec<BoxedFuzzer>,
) -> Intercept<T, MultiFuzzer> {
    Intercept::new(transport, MultiFuzzer::new(fuzzers))
}

/// A [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    type Error = reqwest::Error;

    fn send(&mut self, req: Request) -> Result<Response, Self::Error> {
        let (parts, body) = req.into_parts();
        let resp = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body.to_vec())
            .send()?;

        let status = resp.status();
        let version = resp.version();
        let headers = resp.headers().clone();
        let body = resp.bytes()?;

        let mut out = http::Response::new(body);
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}
