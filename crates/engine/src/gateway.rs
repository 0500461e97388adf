//! Gateway facade: the entry point applications use.
//!
//! A [`Gateway`] owns the snapshot store, the transport and the auth
//! provider. Each search takes the current snapshot once and runs the
//! resolver → query builder → pagination pipeline against it.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use eogate_types::{PageCursor, Product, Queryable, SearchMode, SearchRequest};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CatalogSnapshot, ProvidersDocument, SnapshotStore, load_config, load_config_from_path, validate_document};
use crate::error::{GatewayError, ProviderFailure};
use crate::pagination::{PaginationController, ProviderRun};
use crate::query::build_query;
use crate::queryables::{QueryablesNegotiator, local_queryables, merge_across_providers};
use crate::resolver::{Candidate, execute_with_fallback, resolve_candidates};
use crate::transport::{AuthProvider, ConfiguredAuth, HttpTransport, Transport};

/// Request-scoped bookkeeping of one search.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    pub candidates: Vec<String>,
    /// Index into `candidates` of the provider that answered.
    pub current_index: usize,
    pub pages_fetched: u32,
    pub item_count: usize,
    pub dropped_fields: usize,
    /// Failures of the providers tried before `current_index`, in order.
    pub errors: Vec<ProviderFailure>,
    /// No further page can be requested from this search.
    pub terminal: bool,
    pub snapshot_version: u64,
}

impl SearchContext {
    pub fn provider(&self) -> Option<&str> {
        self.candidates.get(self.current_index).map(String::as_str)
    }
}

/// Products of a search plus the optional total and its context.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub products: Vec<Product>,
    pub total_count: Option<u64>,
    /// Pass back through [`SearchRequest::cursor`] to fetch the next page.
    pub next_cursor: Option<PageCursor>,
    pub context: SearchContext,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Product> {
        self.products.iter()
    }
}

impl IntoIterator for SearchResults {
    type Item = Product;
    type IntoIter = std::vec::IntoIter<Product>;

    fn into_iter(self) -> Self::IntoIter {
        self.products.into_iter()
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a Product;
    type IntoIter = std::slice::Iter<'a, Product>;

    fn into_iter(self) -> Self::IntoIter {
        self.products.iter()
    }
}

/// One row of [`Gateway::list_product_types`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductTypeSummary {
    pub name: String,
    pub aliases: Vec<String>,
    pub providers: Vec<String>,
}

struct GatewayInner {
    store: SnapshotStore,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    negotiator: QueryablesNegotiator,
}

/// Cheap to clone; clones share the snapshot store and caches.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("snapshot_version", &self.snapshot().version)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(document: ProvidersDocument, transport: Arc<dyn Transport>, auth: Arc<dyn AuthProvider>) -> Self {
        let ttl = Duration::from_secs(document.settings.constraints_cache_ttl_secs);
        Self {
            inner: Arc::new(GatewayInner {
                store: SnapshotStore::new(document),
                transport,
                auth,
                negotiator: QueryablesNegotiator::new(ttl),
            }),
        }
    }

    /// Gateway over the default HTTP transport and configured auth.
    pub fn with_http(document: ProvidersDocument) -> anyhow::Result<Self> {
        let ceiling = document
            .providers
            .iter()
            .map(|provider| provider.timeout_secs.saturating_mul(u64::from(provider.max_attempts.max(1))))
            .max()
            .unwrap_or(crate::config::model::DEFAULT_TIMEOUT_SECS);
        let transport = HttpTransport::new(Duration::from_secs(ceiling.max(1)))?;
        Ok(Self::new(document, Arc::new(transport), Arc::new(ConfiguredAuth)))
    }

    /// Loads `path`, or the default providers file, and builds an HTTP gateway.
    pub fn from_config_file(path: Option<&Path>) -> anyhow::Result<Self> {
        let document = match path {
            Some(path) => load_config_from_path(path)?,
            None => load_config()?,
        };
        Self::with_http(document).context("failed to build the HTTP transport")
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.inner.store.current()
    }

    pub async fn search(&self, request: &SearchRequest, mode: SearchMode) -> Result<SearchResults, GatewayError> {
        self.search_with_cancel(request, mode, CancellationToken::new()).await
    }

    /// Searches the candidates in priority order, falling back on
    /// provider failures. `cancel` is checked before every page request.
    pub async fn search_with_cancel(
        &self,
        request: &SearchRequest,
        mode: SearchMode,
        cancel: CancellationToken,
    ) -> Result<SearchResults, GatewayError> {
        let snapshot = self.snapshot();
        let candidates = resolve_candidates(&snapshot, &request.product_type, request.provider.as_deref())?;
        let started = Instant::now();
        info!(
            product_type = %request.product_type,
            ?mode,
            candidates = candidates.len(),
            snapshot = snapshot.version,
            "search started"
        );

        let outcome = execute_with_fallback(&request.product_type, &candidates, |_, candidate| {
            let candidate = candidate.clone();
            let cancel = &cancel;
            async move { self.run_candidate(request, &candidate, mode, cancel).await }
        })
        .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(product_type = %request.product_type, %error, "search failed");
                return Err(error);
            }
        };

        let run = outcome.value;
        let context = SearchContext {
            candidates: candidates.iter().map(|candidate| candidate.name().to_string()).collect(),
            current_index: outcome.index,
            pages_fetched: run.pages_fetched,
            item_count: run.products.len(),
            dropped_fields: run.dropped_fields,
            errors: outcome.errors,
            terminal: run.next_cursor.is_none(),
            snapshot_version: snapshot.version,
        };
        info!(
            product_type = %request.product_type,
            provider = %run.provider,
            item_count = context.item_count,
            pages = context.pages_fetched,
            duration_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );
        Ok(SearchResults {
            products: run.products,
            total_count: run.total_count,
            next_cursor: run.next_cursor,
            context,
        })
    }

    async fn run_candidate(
        &self,
        request: &SearchRequest,
        candidate: &Candidate,
        mode: SearchMode,
        cancel: &CancellationToken,
    ) -> Result<ProviderRun, GatewayError> {
        let entry = candidate.entry();
        let mapping = entry.mapping.as_ref();
        // Aliases stop here; providers and products only see the declared name.
        let resolved;
        let request = if request.product_type == entry.name {
            request
        } else {
            resolved = SearchRequest {
                product_type: entry.name.clone(),
                ..request.clone()
            };
            &resolved
        };
        let queryables = local_queryables(&candidate.provider, entry);
        let base = build_query(request, mapping, &queryables)?;
        debug!(provider = %candidate.name(), product_type = %entry.name, url = %base.url, "querying provider");
        PaginationController::new(self.inner.transport.as_ref(), self.inner.auth.as_ref(), mapping, cancel)
            .run(request, base, mode)
            .await
    }

    /// Searches every candidate concurrently without fallback, at most
    /// `max_workers` at a time. Results come back in priority order.
    pub async fn search_all_providers(
        &self,
        request: &SearchRequest,
        mode: SearchMode,
        cancel: CancellationToken,
    ) -> Result<Vec<(String, Result<SearchResults, GatewayError>)>, GatewayError> {
        let snapshot = self.snapshot();
        let candidates = resolve_candidates(&snapshot, &request.product_type, request.provider.as_deref())?;
        let semaphore = Arc::new(Semaphore::new(snapshot.settings.max_workers.max(1)));
        let mut tasks = JoinSet::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let gateway = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let request = request.clone().with_provider(candidate.name());
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, gateway.search_with_cancel(&request, mode, cancel).await)
            });
        }

        let mut results: Vec<Option<Result<SearchResults, GatewayError>>> =
            (0..candidates.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(error) => warn!(%error, "provider search task failed"),
            }
        }
        // A task that died still gets its row in the report.
        Ok(candidates
            .iter()
            .zip(results)
            .map(|(candidate, result)| {
                let name = candidate.name().to_string();
                let result = result.unwrap_or_else(|| {
                    Err(GatewayError::Cancelled {
                        provider: Some(name.clone()),
                    })
                });
                (name, result)
            })
            .collect())
    }

    /// Runs independent searches concurrently, at most `max_workers` at a
    /// time. Results keep the order of `requests`.
    pub async fn search_batch(
        &self,
        requests: Vec<SearchRequest>,
        mode: SearchMode,
        cancel: CancellationToken,
    ) -> Vec<Result<SearchResults, GatewayError>> {
        let semaphore = Arc::new(Semaphore::new(self.snapshot().settings.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        let count = requests.len();
        for (index, request) in requests.into_iter().enumerate() {
            let gateway = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, gateway.search_with_cancel(&request, mode, cancel).await)
            });
        }

        let mut results: Vec<Option<Result<SearchResults, GatewayError>>> = (0..count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(error) => warn!(%error, "batch search task failed"),
            }
        }
        results
            .into_iter()
            .map(|result| result.unwrap_or(Err(GatewayError::Cancelled { provider: None })))
            .collect()
    }

    /// Queryables for `product_type`, for one provider or merged across
    /// every candidate with the higher priority provider winning.
    pub async fn list_queryables(
        &self,
        provider: Option<&str>,
        product_type: &str,
    ) -> Result<IndexMap<String, Queryable>, GatewayError> {
        let snapshot = self.snapshot();
        let candidates = resolve_candidates(&snapshot, product_type, provider)?;
        let mut per_provider = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let queryables = self
                .inner
                .negotiator
                .negotiate(
                    self.inner.transport.as_ref(),
                    self.inner.auth.as_ref(),
                    &candidate.provider,
                    candidate.entry(),
                )
                .await;
            per_provider.push((candidate.name().to_string(), queryables));
        }
        Ok(merge_across_providers(per_provider))
    }

    /// Validates and publishes a new providers document.
    pub fn update_providers_config(&self, document: ProvidersDocument) -> Result<Arc<CatalogSnapshot>, GatewayError> {
        validate_document(&document).map_err(|error| GatewayError::Configuration {
            provider: None,
            message: error.to_string(),
        })?;
        let snapshot = self.inner.store.publish(document);
        info!(version = snapshot.version, providers = snapshot.providers.len(), "published provider configuration");
        Ok(snapshot)
    }

    /// Changes one provider's priority and publishes the result.
    pub fn set_priority(&self, provider: &str, priority: i64) -> Result<(), GatewayError> {
        let snapshot = self.inner.store.update(|document| {
            let config = document
                .providers
                .iter_mut()
                .find(|config| config.name == provider)
                .ok_or_else(|| GatewayError::UnknownProvider {
                    provider: provider.to_string(),
                })?;
            config.priority = priority;
            Ok(())
        })?;
        info!(provider, priority, version = snapshot.version, "provider priority changed");
        Ok(())
    }

    /// Usable providers in search order, optionally limited to those
    /// offering `product_type`.
    pub fn available_providers(&self, product_type: Option<&str>) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut providers: Vec<_> = snapshot
            .providers
            .values()
            .filter(|provider| product_type.is_none_or(|product_type| provider.offers(product_type)))
            .collect();
        providers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.declaration_index.cmp(&b.declaration_index)));
        providers.iter().map(|provider| provider.name.clone()).collect()
    }

    /// Product types offered by `provider`, or by any provider.
    pub fn list_product_types(&self, provider: Option<&str>) -> Result<Vec<ProductTypeSummary>, GatewayError> {
        let snapshot = self.snapshot();
        let providers: Vec<_> = match provider {
            Some(name) => vec![snapshot.provider(name).ok_or_else(|| GatewayError::UnknownProvider {
                provider: name.to_string(),
            })?],
            None => snapshot.providers.values().collect(),
        };

        let mut summaries: IndexMap<String, ProductTypeSummary> = IndexMap::new();
        for compiled in providers {
            for name in compiled.products.keys() {
                let summary = summaries.entry(name.clone()).or_insert_with(|| ProductTypeSummary {
                    name: name.clone(),
                    aliases: Vec::new(),
                    providers: Vec::new(),
                });
                summary.providers.push(compiled.name.clone());
            }
            for (alias, target) in &compiled.aliases {
                if let Some(summary) = summaries.get_mut(target)
                    && !summary.aliases.contains(alias)
                {
                    summary.aliases.push(alias.clone());
                }
            }
        }
        let mut summaries: Vec<_> = summaries.into_values().collect();
        for summary in &mut summaries {
            summary.aliases.sort();
        }
        Ok(summaries)
    }
}
