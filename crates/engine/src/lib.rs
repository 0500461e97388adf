//! # eogate Engine
//!
//! The eogate engine federates searches for Earth-observation products over
//! heterogeneous remote catalogues. Each provider is described by a YAML
//! mapping; the engine compiles those mappings once, renders provider
//! queries from a canonical [`SearchRequest`], extracts canonical
//! [`Product`]s from the answers, follows pagination and falls back to the
//! next provider when one fails.
//!
//! ## Usage
//!
//! ```rust
//! use eogate_engine::config::{CatalogSnapshot, load_config_from_str};
//! use eogate_engine::resolver::resolve_candidates;
//!
//! let document = load_config_from_str(r#"
//! providers:
//!   - name: peps
//!     priority: 1
//!     search:
//!       api_endpoint: https://peps.example/search
//!     products:
//!       S2_MSI_L1C: {}
//! "#)?;
//! let snapshot = CatalogSnapshot::compile(document, 1);
//! let candidates = resolve_candidates(&snapshot, "S2_MSI_L1C", None)?;
//! assert_eq!(candidates[0].name(), "peps");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`mapping`**: converter registry, template and JSONPath languages, rule compiler
//! - **`config`**: providers document model, validation and compiled snapshots
//! - **`query`**: canonical request → provider query
//! - **`extract`**: provider response → products
//! - **`pagination`**: page loop, retries, count modes
//! - **`resolver`**: candidate ordering and fallback
//! - **`queryables`**: queryable negotiation and the constraints cache
//! - **`gateway`**: the facade tying it together
//! - **`crunch`** / **`results`**: post-search filters and the GeoJSON results file

pub mod config;
pub mod crunch;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod mapping;
pub mod pagination;
pub mod plugin;
pub mod query;
pub mod queryables;
pub mod resolver;
pub mod results;
pub mod transport;

pub use eogate_types::{PageCursor, Product, Queryable, SearchMode, SearchRequest};
pub use crunch::{CompareOp, Crunch, CrunchError, OverlapRule};
pub use error::{ErrorKind, GatewayError, ProviderFailure, TransportError, TransportFailure};
pub use extract::{Extraction, extract};
pub use gateway::{Gateway, ProductTypeSummary, SearchContext, SearchResults};
pub use query::build_query;
pub use results::ResultsError;
pub use transport::{AuthProvider, ConfiguredAuth, HttpTransport, Transport};
