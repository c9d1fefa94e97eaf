pub mod auth;
pub mod config;
pub mod functions;
pub mod fuzzer;
pub mod headers;
pub mod random;
pub mod transport;

pub use auth::{Credentials, HmacSigner, Signer, SignerV2, SignerV4};
pub use config::HarnessConfig;
pub use functions::{Filter, Insert, Logger, Map};
pub use fuzzer::{BoxedFuzzer, FuzzError, Fuzzer, LoopFuzzer, MultiFuzzer, Request, Response};
pub use headers::{Domain, Kind, Registry, TimeFormat, Type};
pub use random::Random;
pub use transport::{Intercept, InterceptError, ReqwestTransport, Transport, register_fuzzer};
