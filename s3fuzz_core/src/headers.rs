//! Typed registry of well-known S3 HTTP headers.

use crate::functions::{Insert, canonical_header_key};
use crate::random::Random;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// The maximum size of the `X-Amz-Server-Side-Encryption-Context` header (8 KiB).
const MAX_ENCRYPTION_CONTEXT_LEN: i64 = 8 * 1024;

/// The shape category of a header value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// A token drawn from a fixed set of literals.
    Enum,
    /// A base-10 natural number.
    Int,
    /// A timestamp in one of several date formats.
    Time,
    /// Base64-encoded binary data.
    Base64,
}

impl Kind {
    pub const ALL: [Kind; 4] = [Kind::Enum, Kind::Int, Kind::Time, Kind::Base64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Enum => "enum",
            Kind::Int => "int",
            Kind::Time => "time",
            Kind::Base64 => "base64",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown header kind '{s}'"))
    }
}

/// Date formats accepted for `Time` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    /// `Mon, 02 Jan 2006 15:04:05 GMT`
    Rfc1123,
    /// `Mon, 02 Jan 2006 15:04:05 +0000`
    Rfc1123Z,
    /// `20060102T150405Z`
    Iso8601,
}

impl TimeFormat {
    pub const ALL: [TimeFormat; 3] = [
        TimeFormat::Rfc1123,
        TimeFormat::Rfc1123Z,
        TimeFormat::Iso8601,
    ];

    /// The `chrono` format string producing this layout.
    pub fn pattern(&self) -> &'static str {
        match self {
            TimeFormat::Rfc1123 => "%a, %d %b %Y %H:%M:%S GMT",
            TimeFormat::Rfc1123Z => "%a, %d %b %Y %H:%M:%S %z",
            TimeFormat::Iso8601 => "%Y%m%dT%H%M%SZ",
        }
    }
}

/// The value domain of a header type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Domain {
    Int,
    Enum(Vec<String>),
    Time(Vec<TimeFormat>),
    /// A non-negative length is an exact byte count; a negative length `-n`
    /// means a random byte count in `[0, n)`.
    Base64(i64),
}

impl Domain {
    pub fn kind(&self) -> Kind {
        match self {
            Domain::Int => Kind::Int,
            Domain::Enum(_) => Kind::Enum,
            Domain::Time(_) => Kind::Time,
            Domain::Base64(_) => Kind::Base64,
        }
    }
}

/// Binds one header name to a value domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    name: String,
    domain: Domain,
}

impl Type {
    /// Creates a type; the name is stored in canonical form.
    ///
    /// # Panics
    /// Panics if an `Enum` or `Time` domain is empty.
    pub fn new(name: &str, domain: Domain) -> Self {
        match &domain {
            Domain::Enum(tokens) => assert!(!tokens.is_empty(), "enum domain of {name} is empty"),
            Domain::Time(formats) => {
                assert!(!formats.is_empty(), "time domain of {name} is empty")
            }
            Domain::Int | Domain::Base64(_) => {}
        }
        Self {
            name: canonical_header_key(name),
            domain,
        }
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, Domain::Int)
    }

    pub fn enumeration(name: &str, tokens: &[&str]) -> Self {
        Self::new(
            name,
            Domain::Enum(tokens.iter().map(|t| t.to_string()).collect()),
        )
    }

    pub fn time(name: &str, formats: &[TimeFormat]) -> Self {
        Self::new(name, Domain::Time(formats.to_vec()))
    }

    pub fn base64(name: &str, length: i64) -> Self {
        Self::new(name, Domain::Base64(length))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn kind(&self) -> Kind {
        self.domain.kind()
    }

    /// Renders a random value of this type.
    pub fn random(&self, rng: &mut Random) -> String {
        match &self.domain {
            Domain::Int => rng.int().to_string(),
            Domain::Enum(tokens) => tokens[rng.index(tokens.len())].clone(),
            Domain::Time(formats) => {
                let format = formats[rng.index(formats.len())];
                rng.date().format(format.pattern()).to_string()
            }
            Domain::Base64(length) => {
                let length = if *length < 0 {
                    rng.int() % length.unsigned_abs() as i64
                } else {
                    *length
                };
                BASE64.encode(rng.bytes(length as usize))
            }
        }
    }

    /// Turns this type into an [`Insert`] fuzzer setting a fresh random value on
    /// every request.
    pub fn into_insert(self, mut rng: Random) -> Insert<impl FnMut() -> (String, String) + Send> {
        Insert::new(move || {
            let value = self.random(&mut rng);
            (self.name.clone(), value)
        })
    }
}

/// The set of known header types plus a `Kind` index over it.
///
/// The kind index is a projection of the name table and is rebuilt on every
/// [`Registry::insert`]. Once built, a registry is read-only and can be shared
/// between threads.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_name: BTreeMap<String, Type>,
    by_kind: HashMap<Kind, Vec<String>>,
}

impl Registry {
    pub fn new<I: IntoIterator<Item = Type>>(types: I) -> Self {
        let mut registry = Registry::default();
        for ty in types {
            registry.by_name.insert(ty.name.to_ascii_lowercase(), ty);
        }
        registry.reindex();
        registry
    }

    /// The table of S3 headers known to the fuzzer.
    pub fn s3() -> Self {
        let dates = &TimeFormat::ALL;
        Registry::new([
            Type::int("Content-Length"),
            Type::base64("Content-MD5", 16),
            Type::enumeration("Expect", &["100-continue"]),
            Type::time("Date", dates),
            Type::base64("X-Amz-Content-Sha256", 32),
            Type::time("X-Amz-Date", dates),
            Type::enumeration("X-Amz-Server-Side-Encryption", &["AES256", "aws:kms"]),
            Type::enumeration("X-Amz-Server-Side-Encryption-Customer-Algorithm", &["AES256"]),
            Type::base64("X-Amz-Server-Side-Encryption-Customer-Key", 32),
            Type::base64("X-Amz-Server-Side-Encryption-Customer-Key-Md5", 16),
            Type::base64(
                "X-Amz-Server-Side-Encryption-Context",
                -MAX_ENCRYPTION_CONTEXT_LEN,
            ),
        ])
    }

    /// Adds or replaces a type and rebuilds the kind index.
    pub fn insert(&mut self, ty: Type) {
        self.by_name.insert(ty.name.to_ascii_lowercase(), ty);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.by_kind.clear();
        // `by_name` is ordered, so members of each kind are sorted by name.
        for ty in self.by_name.values() {
            self.by_kind
                .entry(ty.kind())
                .or_default()
                .push(ty.name.clone());
        }
    }

    /// Looks up the type of a header, ignoring case.
    pub fn lookup_by_name(&self, name: &str) -> Option<&Type> {
        self.by_name.get(&name.to_ascii_lowercase())
    }

    /// Picks a random header of the given kind.
    ///
    /// Returns `None` if no header of that kind is registered.
    pub fn lookup_by_kind(&self, kind: Kind, rng: &mut Random) -> Option<&Type> {
        let names = self.by_kind.get(&kind).filter(|names| !names.is_empty())?;
        self.lookup_by_name(&names[rng.index(names.len())])
    }

    /// Names of all headers of the given kind, sorted case-insensitively.
    pub fn names_of_kind(&self, kind: Kind) -> &[String] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Type> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[test]
    fn s3_registry_contains_known_headers() {
        let registry = Registry::s3();
        assert_eq!(registry.len(), 11);

        let md5 = registry.lookup_by_name("content-md5").unwrap();
        assert_eq!(md5.name(), "Content-Md5");
        assert_eq!(md5.kind(), Kind::Base64);
        assert_eq!(md5.domain(), &Domain::Base64(16));

        assert_eq!(
            registry.lookup_by_name("X-Amz-Date").unwrap().kind(),
            Kind::Time
        );
        assert!(registry.lookup_by_name("X-Amz-Unknown").is_none());
    }

    #[test]
    fn kind_index_matches_name_table() {
        let registry = Registry::s3();
        for kind in Kind::ALL {
            for name in registry.names_of_kind(kind) {
                assert_eq!(registry.lookup_by_name(name).unwrap().kind(), kind);
            }
        }
        let indexed: usize = Kind::ALL
            .iter()
            .map(|k| registry.names_of_kind(*k).len())
            .sum();
        assert_eq!(indexed, registry.len());
        assert_eq!(registry.names_of_kind(Kind::Int), ["Content-Length"]);
    }

    #[test]
    fn lookup_by_kind_returns_member_of_kind() {
        let registry = Registry::s3();
        let mut rng = Random::new(1);
        for kind in Kind::ALL {
            for _ in 0..20 {
                assert_eq!(registry.lookup_by_kind(kind, &mut rng).unwrap().kind(), kind);
            }
        }
    }

    #[test]
    fn lookup_by_kind_on_empty_kind_is_none() {
        let registry = Registry::new([Type::int("Content-Length")]);
        let mut rng = Random::new(1);
        assert!(registry.lookup_by_kind(Kind::Time, &mut rng).is_none());
        assert!(Registry::default().lookup_by_kind(Kind::Int, &mut rng).is_none());
    }

    #[test]
    fn lookup_by_kind_is_deterministic_per_seed() {
        let registry = Registry::s3();
        let pick = |seed| {
            let mut rng = Random::new(seed);
            (0..16)
                .map(|_| {
                    registry
                        .lookup_by_kind(Kind::Base64, &mut rng)
                        .unwrap()
                        .name()
                        .to_string()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(pick(77), pick(77));
    }

    #[test]
    fn insert_extends_kind_index() {
        let mut registry = Registry::s3();
        registry.insert(Type::int("X-Amz-Meta-Count"));
        assert_eq!(registry.len(), 12);
        assert_eq!(
            registry.names_of_kind(Kind::Int),
            ["Content-Length", "X-Amz-Meta-Count"]
        );

        // Re-registering with a different kind moves it between index buckets.
        registry.insert(Type::enumeration("X-Amz-Meta-Count", &["one"]));
        assert_eq!(registry.names_of_kind(Kind::Int), ["Content-Length"]);
        assert!(
            registry
                .names_of_kind(Kind::Enum)
                .contains(&"X-Amz-Meta-Count".to_string())
        );
    }

    #[test]
    fn int_renders_decimal_digits() {
        let mut rng = Random::new(2);
        let value = Type::int("Content-Length").random(&mut rng);
        assert!(value.parse::<i64>().unwrap() >= 0);
    }

    #[test]
    fn enum_renders_one_of_its_tokens() {
        let ty = Type::enumeration("X-Amz-Server-Side-Encryption", &["AES256", "aws:kms"]);
        let mut rng = Random::new(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let value = ty.random(&mut rng);
            assert!(value == "AES256" || value == "aws:kms");
            seen.insert(value);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn time_renders_in_every_format() {
        let mut rng = Random::new(4);
        let rfc1123 = Type::time("Date", &[TimeFormat::Rfc1123]).random(&mut rng);
        assert!(rfc1123.ends_with(" GMT"), "{rfc1123}");
        assert!(chrono::DateTime::parse_from_rfc2822(&rfc1123.replace("GMT", "+0000")).is_ok());

        let rfc1123z = Type::time("Date", &[TimeFormat::Rfc1123Z]).random(&mut rng);
        assert!(chrono::DateTime::parse_from_rfc2822(&rfc1123z).is_ok(), "{rfc1123z}");

        let iso = Type::time("X-Amz-Date", &[TimeFormat::Iso8601]).random(&mut rng);
        assert!(NaiveDateTime::parse_from_str(&iso, "%Y%m%dT%H%M%SZ").is_ok(), "{iso}");
    }

    #[test]
    fn base64_fixed_length_decodes_to_that_length() {
        let mut rng = Random::new(5);
        let value = Type::base64("Content-MD5", 16).random(&mut rng);
        assert_eq!(BASE64.decode(value).unwrap().len(), 16);

        let empty = Type::base64("Content-MD5", 0).random(&mut rng);
        assert_eq!(empty, "");
    }

    #[test]
    fn base64_negative_length_is_an_upper_bound() {
        let registry = Registry::new([Type::base64("X-Amz-Server-Side-Encryption-Context", -64)]);
        let mut rng = Random::new(6);
        for _ in 0..500 {
            let ty = registry.lookup_by_kind(Kind::Base64, &mut rng).unwrap();
            let decoded = BASE64.decode(ty.random(&mut rng)).unwrap();
            assert!(decoded.len() < 64);
        }
    }

    #[test]
    fn random_values_are_valid_header_values() {
        let registry = Registry::s3();
        let mut rng = Random::new(8);
        for ty in registry.iter() {
            let value = ty.random(&mut rng);
            assert!(http::HeaderValue::from_str(&value).is_ok(), "{}: {value}", ty.name());
        }
    }

    #[test]
    fn kind_parses_and_displays() {
        for kind in Kind::ALL {
            assert_eq!(kind.to_string().parse::<Kind>().unwrap(), kind);
        }
        assert_eq!("BASE64".parse::<Kind>().unwrap(), Kind::Base64);
        assert!("float".parse::<Kind>().is_err());
    }
}
