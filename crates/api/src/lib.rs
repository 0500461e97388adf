//! Catalogue provider client utilities.
//!
//! This module provides a lightweight HTTP client shared by every provider
//! the gateway talks to. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Validating provider endpoint URLs for safety
//! - Building requests with a consistent User-Agent and Accept headers
//! - Discovering basic-auth credentials from `~/.netrc`
//!
//! The primary entry point is [`ProviderClient`]. Unlike a single-service
//! API client it carries no base URL: every provider query already holds an
//! absolute endpoint rendered from configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use eogate_api::ProviderClient;
//!
//! let client = ProviderClient::new(Duration::from_secs(30))?;
//! let response = client
//!     .request(reqwest::Method::GET, "https://catalogue.example/search")
//!     .send()
//!     .await?;
//! println!("status: {}", response.status());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result, anyhow};
use eogate_util::{expand_tilde, redact_sensitive};
use reqwest::{Client, RequestBuilder, header};
use tracing::{debug, warn};
use url::Url;

/// Hostnames allowed to use plain HTTP without a warning.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Overrides the location of the netrc file.
pub const NETRC_PATH_ENV: &str = "NETRC";

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client`.
pub struct ProviderClient {
    pub http: Client,
    pub user_agent: String,
}

impl ProviderClient {
    /// Construct a client whose requests give up after `timeout`.
    ///
    /// Callers usually also bound each request with their own per-provider
    /// timeout; this one is the outer safety net.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/geo+json, application/json;q=0.9, */*;q=0.1"),
        );

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            user_agent: format!("eogate/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a `reqwest::RequestBuilder` for a method and absolute URL.
    pub fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        debug!(url = %redact_sensitive(url), %method, "building request");

        self.http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
    }
}

/// Validate that a provider endpoint URL is acceptable.
///
/// Rules:
/// - the URL must parse and carry a host
/// - the scheme must be `http` or `https`
/// - plain `http` to anything other than `localhost`/`127.0.0.1` is allowed
///   but logged, since credentials may travel in clear text
pub fn validate_endpoint_url(endpoint: &str) -> Result<Url> {
    let parsed = Url::parse(endpoint).map_err(|e| anyhow!("invalid endpoint URL '{}': {}", endpoint, e))?;

    let host_name = parsed
        .host_str()
        .ok_or_else(|| anyhow!("endpoint URL '{}' must include a host", endpoint))?
        .to_string();

    match parsed.scheme() {
        "https" => {}
        "http" => {
            let is_local = LOCALHOST_DOMAINS
                .iter()
                .any(|&allowed| host_name.eq_ignore_ascii_case(allowed));
            if !is_local {
                warn!(host = %host_name, "provider endpoint uses plain http");
            }
        }
        other => {
            return Err(anyhow!(
                "endpoint URL '{}' must use http or https; got '{}://'",
                endpoint,
                other
            ));
        }
    }

    Ok(parsed)
}

/// Look up `(login, password)` for `machine` in the user's netrc file.
///
/// The file is `$NETRC` when set, `~/.netrc` otherwise.
pub fn netrc_credentials(machine: &str) -> Option<(String, String)> {
    let path = netrc_path()?;
    let content = fs::read_to_string(&path).ok()?;
    let credentials = parse_netrc(&content, machine);
    if credentials.is_none() {
        debug!(machine, path = %path.display(), "no netrc entry");
    }
    credentials
}

fn netrc_path() -> Option<PathBuf> {
    match env::var(NETRC_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => Some(expand_tilde(&path)),
        _ => dirs_next::home_dir().map(|home| home.join(".netrc")),
    }
}

/// Minimal `.netrc` parser.
///
/// Understands `machine`, `default`, `login`, `password`, `account` and
/// skips `macdef` bodies. An exact `machine` entry wins over `default`.
///
/// ```text
/// machine catalogue.example
///   login alice
///   password s3cret
/// ```
pub fn parse_netrc(content: &str, machine: &str) -> Option<(String, String)> {
    #[derive(Default)]
    struct Entry {
        login: Option<String>,
        password: Option<String>,
    }

    let mut exact: Option<Entry> = None;
    let mut fallback: Option<Entry> = None;
    // Some(true) inside the wanted machine, Some(false) inside `default`.
    let mut current: Option<bool> = None;
    let mut in_macro = false;

    for line in content.lines() {
        if in_macro {
            // macro bodies end at the first blank line
            if line.trim().is_empty() {
                in_macro = false;
            }
            continue;
        }
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "machine" => {
                    let name = tokens.next().unwrap_or_default();
                    current = if name.eq_ignore_ascii_case(machine) && exact.is_none() {
                        exact = Some(Entry::default());
                        Some(true)
                    } else {
                        None
                    };
                }
                "default" => {
                    fallback = Some(Entry::default());
                    current = Some(false);
                }
                "login" | "password" | "account" => {
                    let value = tokens.next().map(str::to_string);
                    let target = match current {
                        Some(true) => exact.as_mut(),
                        Some(false) => fallback.as_mut(),
                        None => None,
                    };
                    if let Some(entry) = target {
                        match token {
                            "login" => entry.login = value,
                            "password" => entry.password = value,
                            _ => {}
                        }
                    }
                }
                "macdef" => {
                    in_macro = true;
                    break;
                }
                _ => {}
            }
        }
    }

    [exact, fallback]
        .into_iter()
        .flatten()
        .find_map(|entry| Some((entry.login?, entry.password?)))
}
