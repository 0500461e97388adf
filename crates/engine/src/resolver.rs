//! Provider resolver & fallback.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{CatalogSnapshot, CompiledProvider, ProductTypeEntry};
use crate::error::{GatewayError, ProviderFailure};

/// A provider able to serve a product type, with the alias already resolved.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: Arc<CompiledProvider>,
    /// The provider's own product type name.
    pub product_type: String,
}

impl Candidate {
    pub fn name(&self) -> &str {
        &self.provider.name
    }

    pub fn entry(&self) -> &ProductTypeEntry {
        // Candidates are only built for product types the provider declares.
        &self.provider.products[self.product_type.as_str()]
    }
}

/// Providers offering `product_type`, highest priority first. Equal
/// priorities keep declaration order.
pub fn resolve_candidates(
    snapshot: &CatalogSnapshot,
    product_type: &str,
    provider: Option<&str>,
) -> Result<Vec<Candidate>, GatewayError> {
    let mut candidates: Vec<Candidate> = match provider {
        Some(name) => {
            let compiled = snapshot.provider(name).ok_or_else(|| GatewayError::UnknownProvider {
                provider: name.to_string(),
            })?;
            compiled.product(product_type).into_iter().map(|entry| candidate(compiled, entry)).collect()
        }
        None => snapshot
            .providers
            .values()
            .filter_map(|compiled| compiled.product(product_type).map(|entry| candidate(compiled, entry)))
            .collect(),
    };
    if candidates.is_empty() {
        return Err(GatewayError::UnsupportedProductType {
            product_type: product_type.to_string(),
        });
    }

    candidates.sort_by(|a, b| {
        b.provider
            .priority
            .cmp(&a.provider.priority)
            .then(a.provider.declaration_index.cmp(&b.provider.declaration_index))
    });
    debug!(
        product_type,
        candidates = ?candidates.iter().map(Candidate::name).collect::<Vec<_>>(),
        "resolved candidate providers"
    );
    Ok(candidates)
}

fn candidate(provider: &Arc<CompiledProvider>, entry: &ProductTypeEntry) -> Candidate {
    Candidate {
        provider: Arc::clone(provider),
        product_type: entry.name.clone(),
    }
}

/// Successful outcome of a fallback chain.
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    pub value: T,
    /// Index of the candidate that answered.
    pub index: usize,
    /// Failures of the candidates tried before it, in attempt order.
    pub errors: Vec<ProviderFailure>,
}

/// Tries `candidates` in order until one succeeds.
///
/// Transport, auth and extraction failures move on to the next candidate;
/// any other failure is returned as is. When every candidate fails the
/// result is `FallbackExhausted` with one entry per attempt.
pub async fn execute_with_fallback<T, F, Fut>(
    product_type: &str,
    candidates: &[Candidate],
    mut attempt: F,
) -> Result<FallbackOutcome<T>, GatewayError>
where
    F: FnMut(usize, &Candidate) -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut errors = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        match attempt(index, candidate).await {
            Ok(value) => {
                if !errors.is_empty() {
                    info!(
                        product_type,
                        provider = %candidate.name(),
                        failed = errors.len(),
                        "search served by fallback provider"
                    );
                }
                return Ok(FallbackOutcome { value, index, errors });
            }
            Err(error) if error.is_fallback_eligible() => {
                warn!(product_type, provider = %candidate.name(), %error, "provider failed, trying next candidate");
                errors.push(ProviderFailure {
                    provider: candidate.name().to_string(),
                    error,
                });
            }
            Err(error) => return Err(error),
        }
    }
    Err(GatewayError::FallbackExhausted {
        product_type: product_type.to_string(),
        attempts: errors,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::ProvidersDocument;
    use crate::error::{ErrorKind, TransportError};

    const CATALOGUE: &str = r#"
providers:
  - name: low
    priority: 0
    search: {api_endpoint: "https://low.example/search"}
    products:
      S2_MSI_L1C: {aliases: [S2_L1C]}
  - name: first-tie
    priority: 5
    search: {api_endpoint: "https://a.example/search"}
    products:
      S2_MSI_L1C: {}
  - name: second-tie
    priority: 5
    search: {api_endpoint: "https://b.example/search"}
    products:
      S2_MSI_L1C: {}
      L8_OLI_TIRS: {}
"#;

    fn snapshot() -> CatalogSnapshot {
        let document: ProvidersDocument = serde_yaml::from_str(CATALOGUE).unwrap();
        CatalogSnapshot::compile(document, 1)
    }

    fn names(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(Candidate::name).collect()
    }

    #[test]
    fn candidates_sort_by_priority_then_declaration() {
        let snapshot = snapshot();
        let candidates = resolve_candidates(&snapshot, "S2_MSI_L1C", None).unwrap();
        assert_eq!(names(&candidates), vec!["first-tie", "second-tie", "low"]);
    }

    #[test]
    fn aliases_and_explicit_providers() {
        let snapshot = snapshot();
        let candidates = resolve_candidates(&snapshot, "S2_L1C", None).unwrap();
        assert_eq!(names(&candidates), vec!["low"]);
        assert_eq!(candidates[0].product_type, "S2_MSI_L1C");

        let candidates = resolve_candidates(&snapshot, "L8_OLI_TIRS", Some("second-tie")).unwrap();
        assert_eq!(names(&candidates), vec!["second-tie"]);

        let error = resolve_candidates(&snapshot, "L8_OLI_TIRS", Some("low")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedProductType);
        let error = resolve_candidates(&snapshot, "S2_MSI_L1C", Some("nope")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownProvider);
    }

    #[tokio::test]
    async fn fallback_collects_failures_in_attempt_order() {
        let snapshot = snapshot();
        let candidates = resolve_candidates(&snapshot, "S2_MSI_L1C", None).unwrap();
        let error = execute_with_fallback("S2_MSI_L1C", &candidates, |_, candidate| {
            let name = candidate.name().to_string();
            async move { Err::<(), _>(GatewayError::from_transport(&name, TransportError::timeout("slow"))) }
        })
        .await
        .unwrap_err();
        let GatewayError::FallbackExhausted { attempts, .. } = error else {
            panic!("expected FallbackExhausted");
        };
        let order: Vec<&str> = attempts.iter().map(|failure| failure.provider.as_str()).collect();
        assert_eq!(order, vec!["first-tie", "second-tie", "low"]);
    }

    #[tokio::test]
    async fn second_candidate_answers() {
        let snapshot = snapshot();
        let candidates = resolve_candidates(&snapshot, "S2_MSI_L1C", None).unwrap();
        let outcome = execute_with_fallback("S2_MSI_L1C", &candidates, |index, candidate| {
            let name = candidate.name().to_string();
            async move {
                if index == 0 {
                    Err(GatewayError::extraction(&name, "not JSON"))
                } else {
                    Ok(name)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.value, "second-tie");
        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn caller_errors_stop_the_chain() {
        let snapshot = snapshot();
        let candidates = resolve_candidates(&snapshot, "S2_MSI_L1C", None).unwrap();
        let calls = RefCell::new(0);
        let error = execute_with_fallback("S2_MSI_L1C", &candidates, |_, candidate| {
            *calls.borrow_mut() += 1;
            let name = candidate.name().to_string();
            async move {
                Err::<(), _>(GatewayError::IncompleteQuery {
                    provider: name,
                    missing: vec!["geometry".into()],
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::IncompleteQuery);
        assert_eq!(*calls.borrow(), 1);
    }
}
