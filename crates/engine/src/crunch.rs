//! Post-search filters over a product list.
//!
//! Each [`Crunch`] takes the products of a search and keeps a subset, in
//! the original order. Filters never fail on a single odd product; a filter
//! whose input makes it meaningless logs a warning and keeps everything.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use eogate_types::{BoundingBox, Geometry, Position, Product};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Group every tile-name pattern must capture.
pub const TILE_GROUP: &str = "tileid";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CrunchError {
    #[error("unknown comparison operator '{0}'; expected one of lt, le, eq, ne, ge, gt")]
    UnknownOperator(String),
    #[error("invalid name pattern: {0}")]
    InvalidPattern(String),
    #[error("name pattern must capture a '(?P<{TILE_GROUP}>...)' group")]
    MissingTileGroup,
    #[error("invalid overlap percentage {0}")]
    InvalidOverlap(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl std::str::FromStr for CompareOp {
    type Err = CrunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lt" | "<" => Ok(CompareOp::Lt),
            "le" | "<=" => Ok(CompareOp::Le),
            "eq" | "=" | "==" => Ok(CompareOp::Eq),
            "ne" | "!=" => Ok(CompareOp::Ne),
            "ge" | ">=" => Ok(CompareOp::Ge),
            "gt" | ">" => Ok(CompareOp::Gt),
            other => Err(CrunchError::UnknownOperator(other.to_string())),
        }
    }
}

impl CompareOp {
    /// Numbers compare numerically and strings lexically. Anything else
    /// only supports `eq` and `ne`.
    fn holds(self, left: &Value, right: &Value) -> bool {
        let ordering = match (left, right) {
            (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        };
        match (self, ordering) {
            (CompareOp::Eq, Some(ordering)) => ordering == Ordering::Equal,
            (CompareOp::Ne, Some(ordering)) => ordering != Ordering::Equal,
            (CompareOp::Eq, None) => left == right,
            (CompareOp::Ne, None) => left != right,
            (_, None) => false,
            (CompareOp::Lt, Some(ordering)) => ordering == Ordering::Less,
            (CompareOp::Le, Some(ordering)) => ordering != Ordering::Greater,
            (CompareOp::Ge, Some(ordering)) => ordering != Ordering::Less,
            (CompareOp::Gt, Some(ordering)) => ordering == Ordering::Greater,
        }
    }
}

/// How a product footprint must relate to the search extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlapRule {
    /// Share of either the extent or the footprint covered by their
    /// intersection, in percent. A footprint inside the extent always passes.
    Minimum(f64),
    /// The footprint covers the whole extent.
    Contains,
    /// The footprint lies inside the extent.
    Within,
    Intersects,
}

#[derive(Debug, Clone)]
pub enum Crunch {
    /// Sensing window: products starting before `start`, or ending or
    /// starting after `end`, are dropped. Unknown dates pass.
    Date {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// Compares one property of every product with `value`. When a
    /// product lacks the property the filter is skipped altogether.
    Property {
        name: String,
        operator: CompareOp,
        value: Value,
    },
    Overlap { extent: BoundingBox, rule: OverlapRule },
    /// Keeps the first product of each id.
    RemoveDoubles,
    /// Keeps the first product per tile, the tile being the `tileid` group
    /// of `pattern` matched against the product title.
    LatestByName { pattern: Regex },
}

impl Crunch {
    pub fn property(name: impl Into<String>, operator: &str, value: Value) -> Result<Self, CrunchError> {
        Ok(Crunch::Property {
            name: name.into(),
            operator: operator.parse()?,
            value,
        })
    }

    pub fn overlap(extent: BoundingBox, rule: OverlapRule) -> Result<Self, CrunchError> {
        if let OverlapRule::Minimum(percent) = rule
            && !(0.0..=100.0).contains(&percent)
        {
            return Err(CrunchError::InvalidOverlap(percent));
        }
        Ok(Crunch::Overlap { extent, rule })
    }

    pub fn latest_by_name(pattern: &str) -> Result<Self, CrunchError> {
        let pattern = Regex::new(pattern).map_err(|error| CrunchError::InvalidPattern(error.to_string()))?;
        if !pattern.capture_names().flatten().any(|name| name == TILE_GROUP) {
            return Err(CrunchError::MissingTileGroup);
        }
        Ok(Crunch::LatestByName { pattern })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Crunch::Date { .. } => "date",
            Crunch::Property { .. } => "property",
            Crunch::Overlap { .. } => "overlap",
            Crunch::RemoveDoubles => "remove_doubles",
            Crunch::LatestByName { .. } => "latest_by_name",
        }
    }

    pub fn apply(&self, products: Vec<Product>) -> Vec<Product> {
        let before = products.len();
        let kept = match self {
            Crunch::Date { start, end } => filter_date(products, *start, *end),
            Crunch::Property { name, operator, value } => filter_property(products, name, *operator, value),
            Crunch::Overlap { extent, rule } => filter_overlap(products, extent, *rule),
            Crunch::RemoveDoubles => remove_doubles(products),
            Crunch::LatestByName { pattern } => latest_by_name(products, pattern),
        };
        info!(crunch = self.name(), before, after = kept.len(), "filtered products");
        kept
    }
}

fn filter_date(products: Vec<Product>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Vec<Product> {
    if start.is_none() && end.is_none() {
        return products;
    }
    products
        .into_iter()
        .filter(|product| {
            let starts_early = matches!((start, product.start), (Some(bound), Some(begin)) if begin < bound);
            let ends_late = matches!((end, product.end), (Some(bound), Some(finish)) if finish > bound);
            let starts_late = matches!((end, product.start), (Some(bound), Some(begin)) if begin > bound);
            !(starts_early || ends_late || starts_late)
        })
        .collect()
}

fn property<'a>(product: &'a Product, name: &str) -> Option<&'a Value> {
    product.properties.get(name)
}

fn filter_property(products: Vec<Product>, name: &str, operator: CompareOp, value: &Value) -> Vec<Product> {
    if let Some(missing) = products.iter().find(|product| property(product, name).is_none()) {
        warn!(property = name, product = ?missing.id, "property missing from a product, filter skipped");
        return products;
    }
    products
        .into_iter()
        .filter(|product| property(product, name).is_some_and(|actual| operator.holds(actual, value)))
        .collect()
}

fn filter_overlap(products: Vec<Product>, extent: &BoundingBox, rule: OverlapRule) -> Vec<Product> {
    let extent_area = rect_area(extent);
    if extent_area == 0.0 {
        debug!("search extent has no area, nothing can overlap it");
        return Vec::new();
    }
    products
        .into_iter()
        .filter(|product| {
            let Some(geometry) = &product.geometry else {
                return false;
            };
            let footprint = Footprint::of(geometry);
            let within = footprint.vertices().all(|position| inside(extent, position));
            let shared = footprint.clipped_area(extent);
            match rule {
                OverlapRule::Contains => shared >= extent_area * (1.0 - 1e-9),
                OverlapRule::Within => within,
                OverlapRule::Intersects => shared > 0.0 || footprint.vertices().any(|position| inside(extent, position)),
                OverlapRule::Minimum(percent) => {
                    let area = footprint.area();
                    within
                        || shared / extent_area * 100.0 >= percent
                        || (area > 0.0 && shared / area * 100.0 >= percent)
                }
            }
        })
        .collect()
}

fn remove_doubles(products: Vec<Product>) -> Vec<Product> {
    let mut seen = HashSet::new();
    products
        .into_iter()
        .filter(|product| match &product.id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        })
        .collect()
}

fn latest_by_name(products: Vec<Product>, pattern: &Regex) -> Vec<Product> {
    let mut tiles = HashSet::new();
    products
        .into_iter()
        .filter(|product| {
            let title = product
                .properties
                .get("title")
                .and_then(Value::as_str)
                .or(product.id.as_deref())
                .unwrap_or_default();
            let Some(tile) = pattern.captures(title).and_then(|captures| captures.name(TILE_GROUP)) else {
                warn!(title, pattern = %pattern, "product title does not match the name pattern");
                return false;
            };
            tiles.insert(tile.as_str().to_string())
        })
        .collect()
}

/// Footprint as rings: exterior rings add area and holes subtract it.
struct Footprint {
    polygons: Vec<Vec<Vec<Position>>>,
}

impl Footprint {
    fn of(geometry: &Geometry) -> Self {
        let polygons = match geometry {
            Geometry::Point(position) => vec![vec![vec![*position]]],
            Geometry::BoundingBox(bbox) => vec![vec![bbox.ring()]],
            Geometry::Polygon(rings) => vec![rings.clone()],
            Geometry::MultiPolygon(polygons) => polygons.clone(),
        };
        Self { polygons }
    }

    fn vertices(&self) -> impl Iterator<Item = &Position> {
        self.polygons.iter().filter_map(|rings| rings.first()).flatten()
    }

    fn area(&self) -> f64 {
        self.rings_area(|ring| ring.to_vec())
    }

    fn clipped_area(&self, extent: &BoundingBox) -> f64 {
        self.rings_area(|ring| clip(ring, extent))
    }

    fn rings_area(&self, prepare: impl Fn(&[Position]) -> Vec<Position>) -> f64 {
        self.polygons
            .iter()
            .map(|rings| {
                rings
                    .iter()
                    .enumerate()
                    .map(|(index, ring)| {
                        let area = shoelace(&prepare(ring));
                        if index == 0 { area } else { -area }
                    })
                    .sum::<f64>()
                    .max(0.0)
            })
            .sum()
    }
}

fn rect_area(bbox: &BoundingBox) -> f64 {
    (bbox.max_lon - bbox.min_lon) * (bbox.max_lat - bbox.min_lat)
}

fn inside(bbox: &BoundingBox, [lon, lat]: &Position) -> bool {
    (bbox.min_lon..=bbox.max_lon).contains(lon) && (bbox.min_lat..=bbox.max_lat).contains(lat)
}

fn shoelace(ring: &[Position]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let doubled: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|([x1, y1], [x2, y2])| x1 * y2 - x2 * y1)
        .sum();
    doubled.abs() / 2.0
}

#[derive(Clone, Copy)]
enum Side {
    West,
    East,
    South,
    North,
}

impl Side {
    fn keeps(self, [lon, lat]: &Position, bbox: &BoundingBox) -> bool {
        match self {
            Side::West => *lon >= bbox.min_lon,
            Side::East => *lon <= bbox.max_lon,
            Side::South => *lat >= bbox.min_lat,
            Side::North => *lat <= bbox.max_lat,
        }
    }

    /// Where the segment `from`-`to` crosses this side.
    fn crossing(self, from: &Position, to: &Position, bbox: &BoundingBox) -> Position {
        let at_lon = |lon: f64| {
            let t = (lon - from[0]) / (to[0] - from[0]);
            [lon, from[1] + t * (to[1] - from[1])]
        };
        let at_lat = |lat: f64| {
            let t = (lat - from[1]) / (to[1] - from[1]);
            [from[0] + t * (to[0] - from[0]), lat]
        };
        match self {
            Side::West => at_lon(bbox.min_lon),
            Side::East => at_lon(bbox.max_lon),
            Side::South => at_lat(bbox.min_lat),
            Side::North => at_lat(bbox.max_lat),
        }
    }
}

/// Sutherland-Hodgman clipping of `ring` against the rectangle.
fn clip(ring: &[Position], bbox: &BoundingBox) -> Vec<Position> {
    let mut output = ring.to_vec();
    for side in [Side::West, Side::East, Side::South, Side::North] {
        let input = std::mem::take(&mut output);
        let Some(mut previous) = input.last().copied() else {
            break;
        };
        for current in input {
            match (side.keeps(&current, bbox), side.keeps(&previous, bbox)) {
                (true, true) => output.push(current),
                (true, false) => {
                    output.push(side.crossing(&previous, &current, bbox));
                    output.push(current);
                }
                (false, true) => output.push(side.crossing(&previous, &current, bbox)),
                (false, false) => {}
            }
            previous = current;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use eogate_types::Provenance;
    use indexmap::IndexMap;
    use serde_json::json;

    use super::*;

    fn product(id: &str) -> Product {
        Product {
            id: Some(id.to_string()),
            provider: "peps".into(),
            product_type: "S2_MSI_L1C".into(),
            geometry: None,
            start: None,
            end: None,
            properties: IndexMap::new(),
            provenance: Provenance {
                provider: "peps".into(),
                page: 1,
                index: 0,
            },
        }
    }

    fn ids(products: &[Product]) -> Vec<&str> {
        products.iter().filter_map(|product| product.id.as_deref()).collect()
    }

    fn day(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, day, 12, 0, 0).unwrap()
    }

    fn square(min_lon: f64, min_lat: f64, size: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            [min_lon, min_lat],
            [min_lon + size, min_lat],
            [min_lon + size, min_lat + size],
            [min_lon, min_lat + size],
            [min_lon, min_lat],
        ]])
    }

    fn with_geometry(id: &str, geometry: Geometry) -> Product {
        Product {
            geometry: Some(geometry),
            ..product(id)
        }
    }

    #[test]
    fn date_window_drops_products_outside() {
        let dated = |id: &str, start: u32, end: u32| Product {
            start: Some(day(start)),
            end: Some(day(end)),
            ..product(id)
        };
        let products = vec![dated("early", 1, 2), dated("inside", 5, 6), dated("late", 9, 12), product("undated")];
        let crunch = Crunch::Date {
            start: Some(day(3)),
            end: Some(day(10)),
        };
        assert_eq!(ids(&crunch.apply(products)), vec!["inside", "undated"]);
    }

    #[test]
    fn property_comparisons() {
        let cloudy = |id: &str, cover: f64| {
            let mut product = product(id);
            product.properties.insert("cloudCover".into(), json!(cover));
            product
        };
        let products = vec![cloudy("clear", 5.0), cloudy("hazy", 20.0), cloudy("grey", 80.0)];

        let crunch = Crunch::property("cloudCover", "le", json!(20)).unwrap();
        assert_eq!(ids(&crunch.apply(products.clone())), vec!["clear", "hazy"]);
        let crunch = Crunch::property("cloudCover", "ne", json!(20.0)).unwrap();
        assert_eq!(ids(&crunch.apply(products.clone())), vec!["clear", "grey"]);

        let mut with_gap = products;
        with_gap.push(product("unknown"));
        let crunch = Crunch::property("cloudCover", "lt", json!(10)).unwrap();
        assert_eq!(crunch.apply(with_gap).len(), 4);

        assert_eq!(
            Crunch::property("cloudCover", "like", json!(1)).unwrap_err(),
            CrunchError::UnknownOperator("like".into())
        );
    }

    #[test]
    fn overlap_minimum_share() {
        let extent = BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let products = vec![
            with_geometry("half", square(5.0, 0.0, 10.0)),
            with_geometry("corner", square(9.0, 9.0, 10.0)),
            with_geometry("inside", square(2.0, 2.0, 1.0)),
            with_geometry("away", square(50.0, 50.0, 1.0)),
            product("no_geometry"),
        ];
        let crunch = Crunch::overlap(extent, OverlapRule::Minimum(30.0)).unwrap();
        assert_eq!(ids(&crunch.apply(products)), vec!["half", "inside"]);
        assert!(Crunch::overlap(extent, OverlapRule::Minimum(120.0)).is_err());
    }

    #[test]
    fn overlap_predicates() {
        let extent = BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let products = vec![
            with_geometry("cover", square(-1.0, -1.0, 12.0)),
            with_geometry("inside", square(2.0, 2.0, 1.0)),
            with_geometry("edge", square(9.0, 9.0, 10.0)),
            with_geometry("point", Geometry::Point([3.0, 3.0])),
            with_geometry("away", square(50.0, 50.0, 1.0)),
        ];
        let run = |rule: OverlapRule| -> Vec<String> {
            let kept = Crunch::overlap(extent, rule).unwrap().apply(products.clone());
            ids(&kept).into_iter().map(str::to_string).collect()
        };
        assert_eq!(run(OverlapRule::Contains), vec!["cover"]);
        assert_eq!(run(OverlapRule::Within), vec!["inside", "point"]);
        assert_eq!(run(OverlapRule::Intersects), vec!["cover", "inside", "edge", "point"]);
    }

    #[test]
    fn flat_extent_keeps_nothing() {
        let extent = BoundingBox::new(1.0, 1.0, 1.0, 2.0).unwrap();
        let products = vec![with_geometry("any", square(0.0, 0.0, 5.0))];
        assert!(Crunch::overlap(extent, OverlapRule::Intersects).unwrap().apply(products).is_empty());
    }

    #[test]
    fn doubles_keep_the_first_occurrence() {
        let mut second = product("a");
        second.provider = "creodias".into();
        let mut anonymous = product("x");
        anonymous.id = None;
        let products = vec![product("a"), product("b"), second, anonymous.clone(), anonymous];
        let kept = Crunch::RemoveDoubles.apply(products);
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].provider, "peps");
        assert_eq!(ids(&kept), vec!["a", "b"]);
    }

    #[test]
    fn latest_by_name_keeps_one_product_per_tile() {
        let titled = |title: &str| {
            let mut product = product(title);
            product.properties.insert("title".into(), json!(title));
            product
        };
        let products = vec![
            titled("S2A_MSIL1C_20210305_T31TCJ_N0209_R051_T310000"),
            titled("S2A_MSIL1C_20210301_T31TCJ_N0209_R051_T310000"),
            titled("S2B_MSIL1C_20210303_T31TDJ_N0209_R051_T320000"),
            titled("unrelated"),
        ];
        let crunch = Crunch::latest_by_name(r"S2[AB]_MSIL1C_\d{8}_\w+_T(?P<tileid>\d{6})").unwrap();
        assert_eq!(
            ids(&crunch.apply(products)),
            vec![
                "S2A_MSIL1C_20210305_T31TCJ_N0209_R051_T310000",
                "S2B_MSIL1C_20210303_T31TDJ_N0209_R051_T320000"
            ]
        );
        assert_eq!(Crunch::latest_by_name(r"T(\d{6})").unwrap_err(), CrunchError::MissingTileGroup);
    }
}
