//! Provider configuration.
//! This module handles parsing, validation and compilation of the
//! ~/.config/eogate/providers.yaml document.

mod io;
pub mod model;
pub mod snapshot;
mod validation;

pub use io::{PROVIDERS_PATH_ENV, default_config_path, load_config, load_config_from_path, load_config_from_str};
pub use model::{
    AuthConfig, DiscoverMetadata, GatewaySettings, NextPageStrategy, PaginationSettings, ProductTypeConfig, ProviderConfig,
    ProvidersDocument, SearchConfig, SearchType,
};
pub use snapshot::{CatalogSnapshot, CompiledProvider, ProductTypeEntry, ProviderMapping, SnapshotStore};
pub use validation::{ValidationError, validate_document, validate_provider, validate_provider_name};
