//! Pagination & count controller.
//!
//! Drives the page loop for one provider: builds each page request from the
//! first-page query, sends it with timeout, retry and cancellation, extracts
//! products and decides whether another page is worth asking for.

use std::time::{Duration, Instant};

use eogate_types::{PageCursor, Product, ProviderQuery, RawProviderResponse, SearchMode, SearchRequest};
use indexmap::IndexMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{NextPageStrategy, ProviderMapping};
use crate::error::{GatewayError, TransportError};
use crate::extract::{ExtractContext, extract, read_text, read_total, response_tree};
use crate::query::query_parameters;
use crate::transport::{AuthProvider, Transport};

/// Hard stop for providers that keep announcing a next page.
pub const MAX_PAGES: u32 = 1000;

const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// What one provider produced for a search.
#[derive(Debug, Clone, Default)]
pub struct ProviderRun {
    pub provider: String,
    pub products: Vec<Product>,
    pub total_count: Option<u64>,
    pub pages_fetched: u32,
    pub dropped_fields: usize,
    /// Continuation for the page after the last one returned, in `OnePage` mode.
    pub next_cursor: Option<PageCursor>,
}

enum PageState {
    Init,
    Requesting(ProviderQuery),
    Extracting { raw: RawProviderResponse },
    Continue(ProviderQuery),
    Done,
    Failed(GatewayError),
}

pub struct PaginationController<'a> {
    transport: &'a dyn Transport,
    auth: &'a dyn AuthProvider,
    mapping: &'a ProviderMapping,
    cancel: &'a CancellationToken,
}

impl<'a> PaginationController<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        auth: &'a dyn AuthProvider,
        mapping: &'a ProviderMapping,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            auth,
            mapping,
            cancel,
        }
    }

    fn provider(&self) -> &str {
        &self.mapping.provider
    }

    /// Runs `mode` starting from the first-page query built for `request`.
    pub async fn run(
        &self,
        request: &SearchRequest,
        base: ProviderQuery,
        mode: SearchMode,
    ) -> Result<ProviderRun, GatewayError> {
        match mode {
            SearchMode::CountOnly => self.count_only(request, &base).await,
            SearchMode::OnePage | SearchMode::AllPages => {
                let mut run = self.paginate(request, &base, mode).await?;
                if request.count && run.total_count.is_none() && self.mapping.pagination.count_endpoint.is_some() {
                    match self.count_via_endpoint(request, &base).await {
                        Ok(total) => run.total_count = Some(total),
                        Err(GatewayError::Cancelled { provider }) => return Err(GatewayError::Cancelled { provider }),
                        Err(error) => warn!(provider = %self.provider(), %error, "count request failed"),
                    }
                }
                Ok(run)
            }
        }
    }

    async fn paginate(
        &self,
        request: &SearchRequest,
        base: &ProviderQuery,
        mode: SearchMode,
    ) -> Result<ProviderRun, GatewayError> {
        let pagination = &self.mapping.pagination;
        let items_per_page = pagination.page_size(request.items_per_page);
        let (mut page, mut cursor) = match &request.cursor {
            Some(PageCursor::Page { number }) => ((*number).max(1), None),
            Some(other) => (request.page.unwrap_or(1).max(1), Some(other.clone())),
            None => (request.page.unwrap_or(1).max(1), None),
        };

        let mut run = ProviderRun {
            provider: self.provider().to_string(),
            ..ProviderRun::default()
        };
        let mut known_total: Option<u64> = None;
        let mut state = PageState::Init;

        loop {
            state = match state {
                PageState::Init => match self.page_query(base, page, items_per_page, cursor.as_ref()) {
                    Ok(query) => PageState::Requesting(query),
                    Err(error) => PageState::Failed(error),
                },
                PageState::Requesting(query) => match self.fetch(&query).await {
                    Ok(raw) => PageState::Extracting { raw },
                    Err(error) => PageState::Failed(error),
                },
                PageState::Extracting { raw } => {
                    let context = ExtractContext {
                        product_type: &request.product_type,
                        page,
                    };
                    let extraction = match extract(&raw, self.mapping, context) {
                        Ok(extraction) => extraction,
                        Err(error) => {
                            state = PageState::Failed(error);
                            continue;
                        }
                    };
                    let tree = match response_tree(&raw, self.provider()) {
                        Ok(tree) => tree,
                        Err(error) => {
                            state = PageState::Failed(error);
                            continue;
                        }
                    };
                    run.pages_fetched += 1;
                    if known_total.is_none()
                        && let Some(path) = &pagination.total_items_path
                    {
                        known_total = read_total(&tree, path);
                    }
                    let received = extraction.len();
                    run.dropped_fields += extraction.dropped().len();
                    run.products.extend(extraction.into_products());
                    let next = self.next_cursor(&tree, page);
                    debug!(
                        provider = %self.provider(),
                        page,
                        item_count = received,
                        collected = run.products.len(),
                        "page extracted"
                    );

                    let full_page = received == items_per_page;
                    if matches!(mode, SearchMode::OnePage) {
                        run.next_cursor = if full_page { next } else { None };
                        PageState::Done
                    } else if !full_page {
                        PageState::Done
                    } else if known_total.is_some_and(|total| run.products.len() as u64 >= total) {
                        PageState::Done
                    } else if next.is_none() {
                        PageState::Done
                    } else if run.pages_fetched >= MAX_PAGES {
                        warn!(provider = %self.provider(), pages = run.pages_fetched, "page guard reached, stopping");
                        PageState::Done
                    } else if self.cancel.is_cancelled() {
                        PageState::Failed(self.cancelled())
                    } else {
                        page += 1;
                        cursor = next;
                        match self.page_query(base, page, items_per_page, cursor.as_ref()) {
                            Ok(query) => PageState::Continue(query),
                            Err(error) => PageState::Failed(error),
                        }
                    }
                }
                PageState::Continue(query) => {
                    debug!(provider = %self.provider(), page, "requesting next page");
                    PageState::Requesting(query)
                }
                PageState::Done => break,
                PageState::Failed(error) => {
                    debug!(provider = %self.provider(), page, %error, "pagination failed");
                    return Err(error);
                }
            };
        }

        if request.count {
            run.total_count = known_total;
        }
        Ok(run)
    }

    async fn count_only(&self, request: &SearchRequest, base: &ProviderQuery) -> Result<ProviderRun, GatewayError> {
        let pagination = &self.mapping.pagination;
        let mut run = ProviderRun {
            provider: self.provider().to_string(),
            ..ProviderRun::default()
        };

        if let Some(path) = &pagination.total_items_path {
            let query = self.page_query(base, 1, 1, None)?;
            let raw = self.fetch(&query).await?;
            run.pages_fetched = 1;
            let tree = response_tree(&raw, self.provider())?;
            if let Some(total) = read_total(&tree, path) {
                run.total_count = Some(total);
                return Ok(run);
            }
            warn!(provider = %self.provider(), path = %path, "total not found in response, counting pages");
        } else if pagination.count_endpoint.is_some() {
            run.total_count = Some(self.count_via_endpoint(request, base).await?);
            return Ok(run);
        }

        let mut walk = request.clone();
        walk.count = false;
        let walked = self.paginate(&walk, base, SearchMode::AllPages).await?;
        run.pages_fetched += walked.pages_fetched;
        run.total_count = Some(walked.products.len() as u64);
        Ok(run)
    }

    async fn count_via_endpoint(&self, request: &SearchRequest, base: &ProviderQuery) -> Result<u64, GatewayError> {
        let provider = self.provider();
        let Some(template) = &self.mapping.pagination.count_endpoint else {
            return Err(GatewayError::Configuration {
                provider: Some(provider.to_string()),
                message: "no count endpoint configured".to_string(),
            });
        };
        let params = query_parameters(request, self.mapping, &IndexMap::new());
        let url = template
            .render(&|name: &str| params.get(name).cloned())
            .map_err(|error| GatewayError::InvalidParameter {
                provider: provider.to_string(),
                field: "count_endpoint".to_string(),
                reason: error.to_string(),
            })?
            .ok_or_else(|| GatewayError::IncompleteQuery {
                provider: provider.to_string(),
                missing: template
                    .fields()
                    .filter(|field| !params.contains_key(*field))
                    .map(str::to_string)
                    .collect(),
            })?;

        let mut query = base.clone();
        query.url = url;
        self.decorate(&mut query)?;
        let raw = self.fetch(&query).await?;
        let tree = response_tree(&raw, provider)?;
        let total = match (tree.as_ref(), &self.mapping.pagination.total_items_path) {
            (Value::Number(number), _) => number.as_u64(),
            (Value::String(text), _) => text.trim().parse().ok(),
            (document, Some(path)) => read_total(document, path),
            (_, None) => None,
        };
        total.ok_or_else(|| GatewayError::extraction(provider, "count endpoint answer holds no total"))
    }

    /// Builds the request for canonical 1-based `page`.
    fn page_query(
        &self,
        base: &ProviderQuery,
        page: u32,
        items_per_page: usize,
        cursor: Option<&PageCursor>,
    ) -> Result<ProviderQuery, GatewayError> {
        let pagination = &self.mapping.pagination;
        let plugin = self.mapping.plugin;
        let mut query = base.clone();

        if let Some(PageCursor::NextUrl { url }) = cursor {
            query.url = url.clone();
            query.query_params.clear();
        } else {
            if let Some(template) = &pagination.next_page_params {
                let variables = self.page_variables(page, items_per_page);
                let rendered = template
                    .render(&|name: &str| variables.get(name).cloned())
                    .map_err(|error| self.invalid_pagination(error.to_string()))?;
                if let Some(rendered) = rendered {
                    plugin
                        .apply_pagination(&mut query, &rendered)
                        .map_err(|reason| self.invalid_pagination(reason))?;
                }
            }
            if let Some(PageCursor::Token { value }) = cursor {
                let name = pagination.cursor_param.clone().ok_or_else(|| GatewayError::Configuration {
                    provider: Some(self.provider().to_string()),
                    message: "a cursor was given but no cursor_param is configured".to_string(),
                })?;
                plugin.apply_param(&mut query, name, value.clone(), true);
            }
        }

        self.decorate(&mut query)?;
        Ok(query)
    }

    fn page_variables(&self, page: u32, items_per_page: usize) -> IndexMap<String, Value> {
        let offset = page.saturating_sub(1);
        let skip = offset as usize * items_per_page;
        let mut variables = IndexMap::new();
        variables.insert("items_per_page".to_string(), Value::from(items_per_page));
        variables.insert(
            "page".to_string(),
            Value::from(self.mapping.pagination.start_page + offset),
        );
        variables.insert("skip".to_string(), Value::from(skip));
        variables.insert("skip_base_1".to_string(), Value::from(skip + 1));
        variables
    }

    fn next_cursor(&self, tree: &Value, page: u32) -> Option<PageCursor> {
        let pagination = &self.mapping.pagination;
        match pagination.strategy {
            NextPageStrategy::Page => pagination
                .next_page_params
                .as_ref()
                .map(|_| PageCursor::Page { number: page + 1 }),
            NextPageStrategy::Cursor => pagination
                .next_page_path
                .as_ref()
                .and_then(|path| read_text(tree, path))
                .map(|value| PageCursor::Token { value }),
            NextPageStrategy::NextUrl => pagination
                .next_page_path
                .as_ref()
                .and_then(|path| read_text(tree, path))
                .map(|url| PageCursor::NextUrl { url }),
        }
    }

    fn decorate(&self, query: &mut ProviderQuery) -> Result<(), GatewayError> {
        self.auth
            .decorate(&self.mapping.auth, query)
            .map_err(|source| GatewayError::Auth {
                provider: self.provider().to_string(),
                source,
            })
    }

    /// Sends one page with the provider timeout, retrying transport
    /// failures up to `max_attempts`.
    async fn fetch(&self, query: &ProviderQuery) -> Result<RawProviderResponse, GatewayError> {
        let provider = self.provider();
        let max_attempts = self.mapping.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }
            let started = Instant::now();
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                outcome = tokio::time::timeout(self.mapping.timeout, self.transport.send(query)) => outcome,
            };
            let result = outcome.unwrap_or_else(|_| {
                Err(TransportError::timeout(format!(
                    "no answer within {}s",
                    self.mapping.timeout.as_secs_f64()
                )))
            });
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(raw) => {
                    debug!(provider = %provider, attempt, duration_ms, status = raw.status, "page received");
                    return Ok(raw);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    warn!(provider = %provider, attempt, duration_ms, %error, "request failed, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(self.cancelled()),
                        _ = tokio::time::sleep(RETRY_BACKOFF * attempt) => {}
                    }
                }
                Err(error) => {
                    debug!(provider = %provider, attempt, duration_ms, %error, "request failed");
                    return Err(GatewayError::from_transport(provider, error));
                }
            }
        }
    }

    fn cancelled(&self) -> GatewayError {
        GatewayError::Cancelled {
            provider: Some(self.provider().to_string()),
        }
    }

    fn invalid_pagination(&self, reason: String) -> GatewayError {
        GatewayError::InvalidParameter {
            provider: self.provider().to_string(),
            field: "next_page_params".to_string(),
            reason,
        }
    }
}
