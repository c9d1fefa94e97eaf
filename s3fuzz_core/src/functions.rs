use crate::fuzzer::{FuzzError, Fuzzer, Request};
use http::header::{HeaderName, HeaderValue};
use std::io::Write;
use std::sync::Arc;
use tracing::trace;

/// Returns the canonical MIME form of a header name.
///
/// The first letter and every letter following a hyphen are upper-cased, all
/// other letters are lower-cased: `x-amz-date` becomes `X-Amz-Date`.
pub fn canonical_header_key(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

fn header_name(name: &str) -> Result<HeaderName, FuzzError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| FuzzError::InvalidHeaderName(name.to_string()))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, FuzzError> {
    HeaderValue::from_str(value).map_err(|e| FuzzError::InvalidHeaderValue {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// A fuzzer removing every header whose name satisfies a predicate.
///
/// The predicate sees the canonical header name (see [`canonical_header_key`]).
/// Filters are cheap to clone and can be combined with [`Filter::and`],
/// [`Filter::or`] and [`Filter::not`] into arbitrary predicate trees.
#[derive(Clone)]
pub struct Filter {
    predicate: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl Filter {
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Matches names containing `needle`, ignoring ASCII case.
    pub fn contains(needle: &str) -> Self {
        let needle = needle.to_ascii_lowercase();
        Self::new(move |name| name.to_ascii_lowercase().contains(&needle))
    }

    /// Matches names starting with `prefix`, ignoring ASCII case.
    pub fn prefix(prefix: &str) -> Self {
        let prefix = prefix.to_ascii_lowercase();
        Self::new(move |name| name.to_ascii_lowercase().starts_with(&prefix))
    }

    /// Matches exactly one header name, ignoring ASCII case.
    pub fn name(header: &str) -> Self {
        let header = header.to_string();
        Self::new(move |name| name.eq_ignore_ascii_case(&header))
    }

    pub fn matches(&self, name: &str) -> bool {
        (self.predicate)(name)
    }

    /// True iff both filters are true.
    pub fn and(self, other: Filter) -> Filter {
        Filter::new(move |name| self.matches(name) && other.matches(name))
    }

    /// True if either filter is true.
    pub fn or(self, other: Filter) -> Filter {
        Filter::new(move |name| self.matches(name) || other.matches(name))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        Filter::new(move |name| !self.matches(name))
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter").finish_non_exhaustive()
    }
}

impl Fuzzer for Filter {
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        let doomed: Vec<HeaderName> = req
            .headers()
            .keys()
            .filter(|name| self.matches(&canonical_header_key(name.as_str())))
            .cloned()
            .collect();
        for name in doomed {
            trace!(header = %name, "Filter removed header");
            req.headers_mut().remove(&name);
        }
        Ok(())
    }
}

/// A fuzzer rewriting every header through a `(name, value) -> (name, value)`
/// transform.
///
/// Each header is read as its first value, removed, and the transformed pair is
/// inserted in its place. When two headers are transformed into the same name,
/// the one processed later wins; this is part of the contract.
///
/// Values that are not valid UTF-8 reach the transform lossily decoded. If the
/// transform hands that value back unchanged, the original bytes are kept.
pub struct Map<F> {
    transform: F,
}

impl<F> Map<F>
where
    F: FnMut(&str, &str) -> (String, String),
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

impl<F> Fuzzer for Map<F>
where
    F: FnMut(&str, &str) -> (String, String),
{
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        let original = std::mem::take(req.headers_mut());
        let pairs: Vec<(String, Option<&HeaderValue>)> = original
            .keys()
            .map(|name| (canonical_header_key(name.as_str()), original.get(name)))
            .collect();

        for (name, raw) in pairs {
            let value = raw
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default();
            let (new_name, new_value) = (self.transform)(&name, &value);
            trace!(from = %name, to = %new_name, "Map rewrote header");
            let header = header_name(&new_name)?;
            let value = match raw {
                Some(raw) if new_value == value => raw.clone(),
                _ => header_value(&new_name, &new_value)?,
            };
            req.headers_mut().insert(header, value);
        }
        Ok(())
    }
}

/// A fuzzer setting one header produced by a generator, replacing any previous
/// values for that key.
///
/// The generator is called exactly once per [`Fuzzer::fuzz`] call. Names or
/// values that are not valid on the wire are reported as errors.
pub struct Insert<G> {
    generator: G,
}

impl<G> Insert<G>
where
    G: FnMut() -> (String, String),
{
    pub fn new(generator: G) -> Self {
        Self { generator }
    }
}

impl<G> Fuzzer for Insert<G>
where
    G: FnMut() -> (String, String),
{
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        let (name, value) = (self.generator)();
        trace!(header = %name, value = %value, "Insert set header");
        let header = header_name(&name)?;
        let value = header_value(&name, &value)?;
        req.headers_mut().insert(header, value);
        Ok(())
    }
}

/// A fuzzer writing the request URI and its headers to a sink without modifying
/// the request.
///
/// Output is one line with the URI followed by one `Name [value ...]` line per
/// header. The first failed write aborts the fuzzer.
pub struct Logger {
    dst: Box<dyn Write + Send>,
}

impl Logger {
    pub fn new<W: Write + Send + 'static>(dst: W) -> Self {
        Self { dst: Box::new(dst) }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Fuzzer for Logger {
    fn fuzz(&mut self, req: &mut Request) -> Result<(), FuzzError> {
        writeln!(self.dst, "{}", req.uri())?;
        for name in req.headers().keys() {
            let values: Vec<String> = req
                .headers()
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            writeln!(
                self.dst,
                "{} [{}]",
                canonical_header_key(name.as_str()),
                values.join(" ")
            )?;
        }
        self.dst.flush()?;
        Ok(())
    }
}
