use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// The request type every fuzzer operates on.
pub type Request = http::Request<Bytes>;

/// The response type handed to [`LoopFuzzer::adjust`].
pub type Response = http::Response<Bytes>;

/// Errors raised while mutating a request.
///
/// Once a fuzzer returns an error the request is in an unspecified, partially
/// mutated state and must not be sent.
#[derive(Error, Debug)]
pub enum FuzzError {
    /// Writing to a sink (e.g. the `Logger` destination) failed.
    #[error("Fuzzer I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fuzzer produced a header name that is not a valid HTTP token.
    #[error("Invalid header name {0:?}")]
    InvalidHeaderName(String),

    /// A fuzzer produced a header value that cannot be sent on the wire.
    #[error("Invalid value for header {name:?}: {reason}")]
    InvalidHeaderValue { name: String, reason: String },

    /// The signing collaborator could not sign the request.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Failure raised by a user-supplied fuzzer.
    #[error("{0}")]
    Custom(String),
}

/// A `Fuzzer` takes an outgoing HTTP request and modifies it in an arbitrary way.
///
/// Fuzzers are the unit of composition of this crate: the primitives in
/// [`crate::functions`], the signing adapters in [`crate::auth`] and
/// [`MultiFuzzer`] all implement this trait.
pub trait Fuzzer {
    /// Mutates the request in place.
    ///
    /// # Returns
    /// `Ok(())` on success. On `Err` the state of the request is undefined and the
    /// caller must treat it as unusable.
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError>;

    /// Returns this fuzzer's observation capability, if it has one.
    ///
    /// Composite fuzzers use this to decide which members receive responses.
    /// Implementors of [`LoopFuzzer`] override it to return `Some(self)`.
    fn as_loop_fuzzer(&mut self) -> Option<&mut dyn LoopFuzzer> {
        None
    }
}

/// A stateful fuzzer that adjusts its strategy based on the responses it sees.
///
/// A `LoopFuzzer` mutates a request before it is sent and, once the response
/// arrives, inspects it to adapt future mutations.
pub trait LoopFuzzer: Fuzzer {
    /// Observes a response. Must not fail; implementations swallow their own
    /// errors.
    fn adjust(&mut self, resp: &Response);
}

impl<F: Fuzzer + ?Sized> Fuzzer for Box<F> {
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        (**self).fuzz(req)
    }

    fn as_loop_fuzzer(&mut self) -> Option<&mut dyn LoopFuzzer> {
        (**self).as_loop_fuzzer()
    }
}

/// A boxed fuzzer as stored by [`MultiFuzzer`].
pub type BoxedFuzzer = Box<dyn Fuzzer + Send>;

/// Combines an ordered list of fuzzers into a single [`LoopFuzzer`].
///
/// Mutations run in list order and stop at the first failure. Responses are
/// passed, in the same order, to every member that exposes
/// [`Fuzzer::as_loop_fuzzer`]; other members are skipped.
#[derive(Default)]
pub struct MultiFuzzer {
    fuzzers: Vec<BoxedFuzzer>,
}

impl MultiFuzzer {
    pub fn new(fuzzers: Vec<BoxedFuzzer>) -> Self {
        Self { fuzzers }
    }

    /// Appends a fuzzer to the end of the pipeline.
    pub fn push<F: Fuzzer + Send + 'static>(&mut self, fuzzer: F) {
        self.fuzzers.push(Box::new(fuzzer));
    }

    /// Builder-style variant of [`MultiFuzzer::push`].
    pub fn with<F: Fuzzer + Send + 'static>(mut self, fuzzer: F) -> Self {
        self.push(fuzzer);
        self
    }

    pub fn len(&self) -> usize {
        self.fuzzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fuzzers.is_empty()
    }
}

impl std::fmt::Debug for MultiFuzzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiFuzzer")
            .field("len", &self.fuzzers.len())
            .finish()
    }
}

impl FromIterator<BoxedFuzzer> for MultiFuzzer {
    fn from_iter<T: IntoIterator<Item = BoxedFuzzer>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Fuzzer for MultiFuzzer {
    /// Applies every fuzzer to the request, returning the first error encountered.
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        for (idx, fuzzer) in self.fuzzers.iter_mut().enumerate() {
            if let Err(e) = fuzzer.fuzz(req) {
                debug!(position = idx, error = %e, "Mutation pass aborted");
                return Err(e);
            }
        }
        Ok(())
    }

    fn as_loop_fuzzer(&mut self) -> Option<&mut dyn LoopFuzzer> {
        Some(self)
    }
}

impl LoopFuzzer for MultiFuzzer {
    fn adjust(&mut self, resp: &Response) {
        for fuzzer in self.fuzzers.iter_mut() {
            if let Some(loop_fuzzer) = fuzzer.as_loop_fuzzer() {
                loop_fuzzer.adjust(resp);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Always fails, counting how often it was asked to fuzz.
    pub struct FailingFuzzer {
        pub calls: Arc<AtomicUsize>,
    }

    impl Fuzzer for FailingFuzzer {
        fn fuzz(&mut self, _req: &mut Request) -> Result<(), FuzzError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FuzzError::Custom("failing fuzzer".to_string()))
        }
    }

    /// Appends its tag to `X-Trace` and records the responses it observed.
    pub struct TracingFuzzer {
        pub tag: &'static str,
        pub fuzzed: Arc<AtomicUsize>,
        pub adjusted: Arc<AtomicUsize>,
        pub observed: Arc<Mutex<Vec<(http::StatusCode, Bytes)>>>,
    }

    impl TracingFuzzer {
        pub fn new(tag: &'static str) -> Self {
            Self {
                tag,
                fuzzed: Arc::new(AtomicUsize::new(0)),
                adjusted: Arc::new(AtomicUsize::new(0)),
                observed: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Fuzzer for TracingFuzzer {
        fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
            self.fuzzed.fetch_add(1, Ordering::SeqCst);
            let trace = req
                .headers()
                .get("x-trace")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let value = format!("{trace}{}", self.tag);
            req.headers_mut()
                .insert("x-trace", value.parse().expect("ascii tag"));
            Ok(())
        }

        fn as_loop_fuzzer(&mut self) -> Option<&mut dyn LoopFuzzer> {
            Some(self)
        }
    }

    impl LoopFuzzer for TracingFuzzer {
        fn adjust(&mut self, resp: &Response) {
            self.adjusted.fetch_add(1, Ordering::SeqCst);
            self.observed
                .lock()
                .unwrap()
                .push((resp.status(), resp.body().clone()));
        }
    }

    pub fn empty_request() -> Request {
        http::Request::builder()
            .uri("http://localhost:9000/bucket/object")
            .body(Bytes::new())
            .expect("static request")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn trace_of(req: &Request) -> &str {
        req.headers()
            .get("x-trace")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    #[test]
    fn multi_fuzzer_applies_in_order() {
        let mut multi = MultiFuzzer::default()
            .with(TracingFuzzer::new("a"))
            .with(TracingFuzzer::new("b"))
            .with(TracingFuzzer::new("c"));
        let mut req = empty_request();

        multi.fuzz(&mut req).unwrap();
        assert_eq!(trace_of(&req), "abc");
        assert_eq!(multi.len(), 3);
    }

    #[test]
    fn multi_fuzzer_stops_at_first_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let after = TracingFuzzer::new("z");
        let after_count = after.fuzzed.clone();
        let mut multi = MultiFuzzer::default()
            .with(FailingFuzzer {
                calls: calls.clone(),
            })
            .with(after);
        let mut req = empty_request();

        let result = multi.fuzz(&mut req);
        assert!(matches!(result, Err(FuzzError::Custom(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            after_count.load(Ordering::SeqCst),
            0,
            "Fuzzers after a failure must not run"
        );
    }

    #[test]
    fn multi_fuzzer_grouping_is_associative() {
        let flat = || {
            MultiFuzzer::default()
                .with(TracingFuzzer::new("a"))
                .with(TracingFuzzer::new("b"))
                .with(TracingFuzzer::new("c"))
        };
        let left = || {
            MultiFuzzer::default()
                .with(
                    MultiFuzzer::default()
                        .with(TracingFuzzer::new("a"))
                        .with(TracingFuzzer::new("b")),
                )
                .with(TracingFuzzer::new("c"))
        };
        let right = || {
            MultiFuzzer::default().with(TracingFuzzer::new("a")).with(
                MultiFuzzer::default()
                    .with(TracingFuzzer::new("b"))
                    .with(TracingFuzzer::new("c")),
            )
        };

        let mut results = Vec::new();
        for mut multi in [flat(), left(), right()] {
            let mut req = empty_request();
            multi.fuzz(&mut req).unwrap();
            results.push(trace_of(&req).to_string());
        }
        assert_eq!(results, vec!["abc", "abc", "abc"]);
    }

    #[test]
    fn adjust_skips_plain_fuzzers_and_reaches_nested_members() {
        struct PlainFuzzer;
        impl Fuzzer for PlainFuzzer {
            fn fuzz(&mut self, _req: &mut Request) -> Result<(), FuzzError> {
                Ok(())
            }
        }

        let outer_loop = TracingFuzzer::new("a");
        let nested_loop = TracingFuzzer::new("b");
        let outer_count = outer_loop.adjusted.clone();
        let nested_count = nested_loop.adjusted.clone();

        let mut multi = MultiFuzzer::default()
            .with(PlainFuzzer)
            .with(outer_loop)
            .with(MultiFuzzer::default().with(PlainFuzzer).with(nested_loop));

        let resp = http::Response::new(Bytes::new());
        multi.adjust(&resp);
        multi.adjust(&resp);

        assert_eq!(outer_count.load(Ordering::SeqCst), 2);
        assert_eq!(nested_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_multi_fuzzer_is_a_no_op() {
        let mut multi = MultiFuzzer::new(Vec::new());
        let mut req = empty_request();
        multi.fuzz(&mut req).unwrap();
        assert!(multi.is_empty());
        assert!(req.headers().is_empty());
    }
}
