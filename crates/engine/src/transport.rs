//! Transport and authentication seams.
//!
//! The engine never talks HTTP directly: pages go through a [`Transport`],
//! and credentials are attached by an [`AuthProvider`] just before sending.
//! Tests substitute scripted implementations of both.

use std::time::Duration;

use async_trait::async_trait;
use eogate_api::{ProviderClient, netrc_credentials};
use eogate_types::{HttpMethod, ProviderQuery, RawProviderResponse};
use eogate_util::{interpolate_string, redact_sensitive, status_error_message, truncate_response_preview};
use reqwest::Method;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{AuthError, TransportError};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one rendered query. Non-2xx answers are `HttpStatus` errors.
    async fn send(&self, query: &ProviderQuery) -> Result<RawProviderResponse, TransportError>;
}

/// Attaches credentials to a query.
pub trait AuthProvider: Send + Sync {
    fn decorate(&self, auth: &AuthConfig, query: &mut ProviderQuery) -> Result<(), AuthError>;
}

/// `reqwest` backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ProviderClient,
}

impl HttpTransport {
    /// `timeout` is the client-wide ceiling; per-provider timeouts are
    /// enforced by the pagination controller.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: ProviderClient::new(timeout)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, query: &ProviderQuery) -> Result<RawProviderResponse, TransportError> {
        let url = query
            .full_url()
            .map_err(|error| TransportError::connection(format!("invalid request URL '{}': {error}", query.url)))?;
        let method = match query.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let mut builder = self.client.request(method, url.as_str());
        for (name, value) in &query.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((login, password)) = &query.basic_auth {
            builder = builder.basic_auth(login, Some(password));
        }
        if let Some(body) = &query.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            let message = redact_sensitive(&error.to_string());
            if error.is_timeout() {
                TransportError::timeout(message)
            } else {
                TransportError::connection(message)
            }
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| TransportError::connection(format!("reading response body: {error}")))?;
        debug!(provider = %query.provider, status, bytes = bytes.len(), "received response");

        if !(200..300).contains(&status) {
            let preview = truncate_response_preview(&String::from_utf8_lossy(&bytes), 200);
            let message = status_error_message(status)
                .map(|hint| format!("{hint}; body: {preview}"))
                .unwrap_or(preview);
            return Err(TransportError::http_status(status, message));
        }
        Ok(RawProviderResponse::from_bytes(status, bytes.to_vec()))
    }
}

/// Applies the provider's configured [`AuthConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredAuth;

impl AuthProvider for ConfiguredAuth {
    fn decorate(&self, auth: &AuthConfig, query: &mut ProviderQuery) -> Result<(), AuthError> {
        match auth {
            AuthConfig::None => Ok(()),
            AuthConfig::Header { headers } => {
                for (name, template) in headers {
                    let value = interpolate_string(template).map_err(|error| AuthError::new(error.to_string()))?;
                    query.push_header(name.as_str(), value);
                }
                Ok(())
            }
            AuthConfig::Query { params } => {
                for (name, template) in params {
                    let value = interpolate_string(template).map_err(|error| AuthError::new(error.to_string()))?;
                    query.set_param(name, value);
                }
                Ok(())
            }
            AuthConfig::Netrc { machine } => {
                let machine = match machine {
                    Some(machine) => machine.clone(),
                    None => url::Url::parse(&query.url)
                        .ok()
                        .and_then(|url| url.host_str().map(str::to_string))
                        .ok_or_else(|| AuthError::new(format!("cannot derive a netrc machine from '{}'", query.url)))?,
                };
                let credentials = netrc_credentials(&machine)
                    .ok_or_else(|| AuthError::new(format!("no netrc credentials for machine '{machine}'")))?;
                query.basic_auth = Some(credentials);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indexmap::IndexMap;

    use super::*;

    fn query() -> ProviderQuery {
        ProviderQuery::new("peps", HttpMethod::Get, "https://peps.example/search")
    }

    #[test]
    fn header_auth_interpolates_environment() {
        let mut headers = IndexMap::new();
        headers.insert("X-Api-Key".to_string(), "${env:EOGATE_TEST_KEY}".to_string());
        let auth = AuthConfig::Header { headers };
        temp_env::with_var("EOGATE_TEST_KEY", Some("s3cret"), || {
            let mut query = query();
            ConfiguredAuth.decorate(&auth, &mut query).unwrap();
            assert_eq!(query.headers, vec![("X-Api-Key".to_string(), "s3cret".to_string())]);
        });
    }

    #[test]
    fn missing_environment_variable_is_an_auth_error() {
        let mut params = IndexMap::new();
        params.insert("apikey".to_string(), "${env:EOGATE_TEST_MISSING}".to_string());
        let auth = AuthConfig::Query { params };
        temp_env::with_var_unset("EOGATE_TEST_MISSING", || {
            let error = ConfiguredAuth.decorate(&auth, &mut query()).unwrap_err();
            assert!(error.message.contains("EOGATE_TEST_MISSING"));
        });
    }

    #[test]
    fn netrc_auth_uses_endpoint_host() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "machine peps.example login alice password s3cret").unwrap();
        let path = file.path().to_string_lossy().to_string();
        temp_env::with_var(eogate_api::NETRC_PATH_ENV, Some(path), || {
            let mut query = query();
            ConfiguredAuth
                .decorate(&AuthConfig::Netrc { machine: None }, &mut query)
                .unwrap();
            assert_eq!(query.basic_auth, Some(("alice".to_string(), "s3cret".to_string())));

            let error = ConfiguredAuth
                .decorate(
                    &AuthConfig::Netrc {
                        machine: Some("other.example".into()),
                    },
                    &mut query,
                )
                .unwrap_err();
            assert!(error.message.contains("other.example"));
        });
    }
}
