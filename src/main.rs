//! Backend shield CLI.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller ──▶ Shield::call(operation)
//!                    │
//!                    ▼
//!              CircuitRegistry ──▶ CircuitBreaker ──▶ remote API
//!                    │                   │
//!                    ▼                   ▼
//!               BatchEngine ◀────── TtlCache
//!
//!     TokenManager ──(refresh ahead of expiry)──▶ token issuer
//! ```
//!
//! `check-config` validates a configuration file and prints the effective
//! settings. `probe` drives GET requests through a circuit so its state
//! transitions can be watched in the logs.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use backend_shield::config::{load_config, ShieldConfig};
use backend_shield::observability::{logging, metrics};
use backend_shield::resilience::UpstreamError;
use backend_shield::tokens::{IssuedToken, TokenIssuer, TokenRequest};
use backend_shield::Shield;

const PROBE_OPERATION: &str = "probe.get";
const PROBE_NAMESPACE: &str = "probe";

#[derive(Parser)]
#[command(name = "backend-shield")]
#[command(about = "Circuit breaking, caching and token refresh in front of an HTTP API", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the effective settings
    CheckConfig,
    /// Send GET requests through the shield and report circuit state
    Probe {
        #[arg(long)]
        url: String,

        #[arg(long, default_value_t = 10)]
        requests: u32,

        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Endpoint that mints bearer tokens for the probe requests.
        #[arg(long, requires = "credential")]
        token_url: Option<String>,

        #[arg(long)]
        credential: Option<String>,
    },
}

/// Token endpoint response body.
#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    join_link: String,
}

/// Mints tokens by POSTing the credential to a configured endpoint.
struct HttpIssuer {
    client: reqwest::Client,
    url: Option<String>,
}

impl TokenIssuer for HttpIssuer {
    fn issue<'a>(&'a self, request: &'a TokenRequest, validity: Duration) -> BoxFuture<'a, Result<IssuedToken, UpstreamError>> {
        Box::pin(async move {
            let Some(url) = &self.url else {
                return Err(UpstreamError::Other("no token endpoint configured".into()));
            };
            let response = self
                .client
                .post(url)
                .json(&json!({
                    "credential": request.credential,
                    "validity_ms": validity.as_millis() as u64,
                }))
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::from_status(status.as_u16(), body));
            }

            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| UpstreamError::Other(format!("invalid token response: {e}")))?;
            Ok(IssuedToken {
                value: body.token,
                join_link: body.join_link,
            })
        })
    }
}

fn transport_error(error: reqwest::Error) -> UpstreamError {
    UpstreamError::Network(error.to_string())
}

/// GET `url`, mapping non-success statuses onto the upstream taxonomy.
async fn fetch(client: reqwest::Client, url: String, bearer: Option<String>) -> Result<Value, UpstreamError> {
    let mut request = client.get(&url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(UpstreamError::from_status(status.as_u16(), body));
    }

    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ShieldConfig::default(),
    };

    logging::init_logging(&config.observability);

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            tracing::info!("Configuration is valid");
        }
        Commands::Probe {
            url,
            requests,
            interval_ms,
            token_url,
            credential,
        } => {
            if config.observability.metrics_enabled {
                match config.observability.metrics_address.parse() {
                    Ok(addr) => metrics::init_metrics(addr),
                    Err(_) => tracing::error!(
                        metrics_address = %config.observability.metrics_address,
                        "Failed to parse metrics address"
                    ),
                }
            }

            let client = reqwest::Client::new();
            let issuer = Arc::new(HttpIssuer {
                client: client.clone(),
                url: token_url,
            });
            let shield = Shield::new(config, issuer);

            tokio::select! {
                result = probe(&shield, &client, &url, requests, Duration::from_millis(interval_ms), credential) => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, stopping probe"),
            }

            let report = json!({
                "circuits": shield.circuits().snapshots(),
                "cache": shield.cache().get_stats(),
                "tokens": shield.tokens().get_stats(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            shield.shutdown();
        }
    }

    Ok(())
}

async fn probe(
    shield: &Shield,
    client: &reqwest::Client,
    url: &str,
    requests: u32,
    interval: Duration,
    credential: Option<String>,
) -> Result<(), Box<dyn Error>> {
    const SESSION: &str = "probe";

    if let Some(credential) = credential {
        shield
            .tokens()
            .generate_token(SESSION, TokenRequest::new(credential))
            .await?;
    }

    for attempt in 1..=requests {
        let bearer = shield.tokens().get_token(SESSION).map(|token| token.value);
        let client = client.clone();
        let result = shield
            .call(PROBE_OPERATION, json!({ "url": url }), move |args| {
                let url = args["url"].as_str().unwrap_or_default().to_string();
                fetch(client, url, bearer)
            })
            .await;

        let state = shield.circuit(PROBE_OPERATION).state();
        match result {
            Ok(body) => {
                shield.cache().set(PROBE_NAMESPACE, url, body, None)?;
                tracing::info!(attempt, %state, "Probe succeeded");
            }
            Err(error) if error.is_open() => {
                let cached = shield.cache().get(PROBE_NAMESPACE, url).is_some();
                tracing::warn!(attempt, %state, serving_cached = cached, "Circuit open, request rejected");
            }
            Err(error) => {
                tracing::warn!(attempt, %state, error = %error, "Probe failed");
            }
        }

        if attempt < requests {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(())
}
