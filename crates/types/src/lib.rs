//! Shared data model for the eogate workspace.
//!
//! Everything that crosses a crate boundary lives here: the canonical search
//! request, the normalized product, queryable descriptions, and the
//! provider-specific query/response envelopes exchanged with a transport.

pub mod geometry;
pub mod product;
pub mod query;
pub mod queryable;
pub mod request;

pub use geometry::{BoundingBox, Geometry, GeometryError, Position};
pub use product::{FeatureError, Product, Provenance};
pub use query::{HttpMethod, ProviderQuery, RawProviderResponse, merge_json};
pub use queryable::{Queryable, QueryableType};
pub use request::{PageCursor, ParseSearchModeError, SearchMode, SearchRequest};

/// Canonical field names shared by every provider mapping.
pub mod fields {
    pub const PRODUCT_TYPE: &str = "productType";
    pub const GEOMETRY: &str = "geometry";
    pub const START: &str = "startTimeFromAscendingNode";
    pub const END: &str = "completionTimeFromAscendingNode";
    pub const ID: &str = "id";

    /// Fields lifted out of `properties` into dedicated [`crate::Product`] slots.
    pub const LIFTED: [&str; 4] = [ID, GEOMETRY, START, END];
}
