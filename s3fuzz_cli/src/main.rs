use s3fuzz_core::config::{HarnessConfig, SignatureVersion};
use s3fuzz_core::{
    BoxedFuzzer, Credentials, Filter, HmacSigner, InterceptError, Logger, Random, Registry,
    Request, ReqwestTransport, SignerV2, SignerV4, Transport, register_fuzzer,
};

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Overrides `target.endpoint`.
    #[clap(short, long)]
    endpoint: Option<String>,
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Overrides `fuzzer.seed`.
    #[clap(short, long)]
    seed: Option<u64>,
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, anyhow::Error> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            info!(path = ?config_path, "Loading configuration");
            HarnessConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("s3fuzz.toml");
            if default_config_path.exists() {
                info!(path = ?default_config_path, "Loading default configuration");
                HarnessConfig::load_from_file(&default_config_path)?
            } else {
                info!("No config file found, using built-in defaults");
                HarnessConfig::default()
            }
        }
    };

    if let Some(endpoint) = &cli.endpoint {
        config.target.endpoint = endpoint.clone();
    }
    if let Some(iterations) = cli.iterations {
        config.fuzzer.iterations = iterations;
    }
    if let Some(seed) = cli.seed {
        config.fuzzer.seed = Some(seed);
    }
    Ok(config)
}

/// Builds the mutation pipeline: header removal, one random header per
/// configured kind, optional request logging and finally signing.
fn build_pipeline(config: &HarnessConfig, rng: &mut Random) -> Vec<BoxedFuzzer> {
    let registry = Registry::s3();
    let mut fuzzers: Vec<BoxedFuzzer> = Vec::new();

    let drop = config
        .fuzzer
        .drop_prefixes
        .iter()
        .map(|prefix| Filter::prefix(prefix))
        .reduce(Filter::or);
    if let Some(filter) = drop {
        fuzzers.push(Box::new(filter));
    }

    for &kind in &config.fuzzer.insert_kinds {
        match registry.lookup_by_kind(kind, rng) {
            Some(ty) => {
                debug!(header = ty.name(), %kind, "Inserting random header");
                let seed = rng.int() as u64;
                fuzzers.push(Box::new(ty.clone().into_insert(Random::new(seed))));
            }
            None => warn!(%kind, "No header of this kind is registered"),
        }
    }

    if config.fuzzer.log_requests {
        fuzzers.push(Box::new(Logger::stdout()));
    }

    if let Some(creds) = &config.credentials {
        let credentials = Credentials {
            access_key: creds.access_key.clone(),
            secret_key: creds.secret_key.clone(),
            session_token: creds.session_token.clone(),
        };
        match creds.signature {
            SignatureVersion::V2 => {
                fuzzers.push(Box::new(SignerV2::with_signer(credentials, HmacSigner::new())))
            }
            SignatureVersion::V4 => {
                fuzzers.push(Box::new(SignerV4::with_signer(credentials, HmacSigner::new())))
            }
        }
    }

    fuzzers
}

fn base_request(config: &HarnessConfig) -> Result<Request, anyhow::Error> {
    let url = config.target.url();
    http::Request::builder()
        .method(config.target.method.as_str())
        .uri(url.as_str())
        .body(Bytes::new())
        .with_context(|| format!("Invalid target {} {}", config.target.method, url))
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(?config, "Effective configuration");

    let mut rng = match config.fuzzer.seed {
        Some(seed) => Random::new(seed),
        None => Random::from_time(),
    };
    let fuzzers = build_pipeline(&config, &mut rng);
    let mut transport = register_fuzzer(ReqwestTransport::new(), fuzzers);

    let iterations = config.fuzzer.iterations;
    info!(
        url = %config.target.url(),
        iterations,
        stages = transport.fuzzer().len(),
        "Starting fuzz loop"
    );
    let start_time = Instant::now();
    let mut statuses: BTreeMap<u16, u64> = BTreeMap::new();
    let mut fuzz_failures = 0u64;
    let mut transport_failures = 0u64;

    for i in 0..iterations {
        match transport.send(base_request(&config)?) {
            Ok(resp) => {
                debug!(iteration = i, status = resp.status().as_u16(), "Response");
                *statuses.entry(resp.status().as_u16()).or_default() += 1;
            }
            Err(InterceptError::Fuzz(e)) => {
                warn!(iteration = i, error = %e, "Fuzzing failed, request not sent");
                fuzz_failures += 1;
            }
            Err(InterceptError::Transport(e)) => {
                warn!(iteration = i, error = %e, "Request failed");
                transport_failures += 1;
            }
        }
    }

    info!(
        elapsed = ?start_time.elapsed(),
        fuzz_failures,
        transport_failures,
        "Fuzz loop finished"
    );
    for (status, count) in &statuses {
        info!(status, count, "Responses");
    }

    Ok(())
}
