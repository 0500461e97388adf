//! Search and footprint geometries.
//!
//! Geometries are always expressed in WGS84 longitude/latitude. The model is
//! deliberately small: points, bounding boxes, polygons and multipolygons
//! cover every search area the gateway accepts and every footprint providers
//! return. Text forms (WKT, EWKT, GeoJSON) are produced on demand by the
//! converter library rather than stored.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use thiserror::Error;

/// Longitude/latitude pair.
pub type Position = [f64; 2];

/// The only coordinate reference system accepted in EWKT input.
pub const WGS84_SRID: u32 = 4326;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("invalid WKT: {0}")]
    InvalidWkt(String),
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),
    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(String),
    #[error("unsupported geometry type '{0}'")]
    UnsupportedType(String),
    #[error("unsupported SRID {0}; only EPSG:4326 is accepted")]
    UnsupportedSrid(u32),
    #[error("value cannot be interpreted as a geometry: {0}")]
    Unrecognized(String),
}

/// Axis-aligned longitude/latitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, GeometryError> {
        let values = [min_lon, min_lat, max_lon, max_lat];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(GeometryError::InvalidBoundingBox("coordinates must be finite".into()));
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(GeometryError::InvalidBoundingBox(format!(
                "minimum exceeds maximum in [{min_lon}, {min_lat}, {max_lon}, {max_lat}]"
            )));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Closed counter-clockwise ring starting at the south-west corner.
    pub fn ring(&self) -> Vec<Position> {
        vec![
            [self.min_lon, self.min_lat],
            [self.max_lon, self.min_lat],
            [self.max_lon, self.max_lat],
            [self.min_lon, self.max_lat],
            [self.min_lon, self.min_lat],
        ]
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Position),
    BoundingBox(BoundingBox),
    /// Exterior ring followed by optional holes.
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    /// Bounding box covering every vertex of the geometry.
    pub fn bounds(&self) -> BoundingBox {
        if let Geometry::BoundingBox(bbox) = self {
            return *bbox;
        }
        let mut bounds = BoundingBox {
            min_lon: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for [lon, lat] in self.positions() {
            bounds.min_lon = bounds.min_lon.min(lon);
            bounds.min_lat = bounds.min_lat.min(lat);
            bounds.max_lon = bounds.max_lon.max(lon);
            bounds.max_lat = bounds.max_lat.max(lat);
        }
        bounds
    }

    fn positions(&self) -> Vec<Position> {
        match self {
            Geometry::Point(position) => vec![*position],
            Geometry::BoundingBox(bbox) => bbox.ring(),
            Geometry::Polygon(rings) => rings.iter().flatten().copied().collect(),
            Geometry::MultiPolygon(polygons) => polygons.iter().flatten().flatten().copied().collect(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::BoundingBox(_) | Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Renders the geometry as WKT. With `precision`, coordinates are rounded
    /// to that many decimals and trailing zeros are dropped.
    pub fn to_wkt(&self, precision: Option<u32>) -> String {
        let coordinate = |value: f64| format_coordinate(value, precision);
        let ring = |ring: &[Position]| {
            let points: Vec<String> = ring
                .iter()
                .map(|[lon, lat]| format!("{} {}", coordinate(*lon), coordinate(*lat)))
                .collect();
            format!("({})", points.join(", "))
        };
        let polygon = |rings: &[Vec<Position>]| {
            let rendered: Vec<String> = rings.iter().map(|r| ring(r)).collect();
            format!("({})", rendered.join(", "))
        };
        match self {
            Geometry::Point([lon, lat]) => format!("POINT ({} {})", coordinate(*lon), coordinate(*lat)),
            Geometry::BoundingBox(bbox) => format!("POLYGON {}", polygon(&[bbox.ring()])),
            Geometry::Polygon(rings) => format!("POLYGON {}", polygon(rings)),
            Geometry::MultiPolygon(polygons) => {
                let rendered: Vec<String> = polygons.iter().map(|p| polygon(p)).collect();
                format!("MULTIPOLYGON ({})", rendered.join(", "))
            }
        }
    }

    /// Parses `POINT`, `POLYGON` and `MULTIPOLYGON` WKT. Z values are ignored.
    pub fn from_wkt(text: &str) -> Result<Self, GeometryError> {
        let trimmed = text.trim();
        let keyword_end = trimmed.find('(').ok_or_else(|| GeometryError::InvalidWkt(trimmed.to_string()))?;
        let keyword = trimmed[..keyword_end].trim().to_ascii_uppercase();
        let keyword = keyword.trim_end_matches(" Z").trim();
        let body = WktParser::new(&trimmed[keyword_end..]).parse_document()?;
        match keyword {
            "POINT" => {
                let points = body.into_positions()?;
                match points.as_slice() {
                    [position] => Ok(Geometry::Point(*position)),
                    _ => Err(GeometryError::InvalidWkt("POINT expects exactly one coordinate".into())),
                }
            }
            "POLYGON" => Ok(Geometry::Polygon(body.into_rings()?)),
            "MULTIPOLYGON" => {
                let polygons = body
                    .into_children()?
                    .into_iter()
                    .map(WktNode::into_rings)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Geometry::MultiPolygon(polygons))
            }
            other => Err(GeometryError::UnsupportedType(other.to_string())),
        }
    }

    /// Parses `SRID=4326;<wkt>`; plain WKT is accepted as already WGS84.
    pub fn from_ewkt(text: &str) -> Result<Self, GeometryError> {
        let trimmed = text.trim();
        let Some((srid_part, wkt)) = trimmed.split_once(';') else {
            return Self::from_wkt(trimmed);
        };
        let srid = srid_part
            .trim()
            .strip_prefix("SRID=")
            .or_else(|| srid_part.trim().strip_prefix("srid="))
            .and_then(|value| value.trim().parse::<u32>().ok())
            .ok_or_else(|| GeometryError::InvalidWkt(format!("malformed SRID prefix '{srid_part}'")))?;
        if srid != WGS84_SRID {
            return Err(GeometryError::UnsupportedSrid(srid));
        }
        Self::from_wkt(wkt)
    }

    pub fn to_ewkt(&self, precision: Option<u32>) -> String {
        format!("SRID={WGS84_SRID};{}", self.to_wkt(precision))
    }

    /// GeoJSON geometry object. Bounding boxes are emitted as polygons.
    pub fn to_geojson_value(&self) -> Value {
        let ring = |ring: &[Position]| ring.iter().map(|[lon, lat]| json!([lon, lat])).collect::<Vec<_>>();
        let polygon = |rings: &[Vec<Position>]| rings.iter().map(|r| Value::Array(ring(r))).collect::<Vec<_>>();
        match self {
            Geometry::Point([lon, lat]) => json!({"type": "Point", "coordinates": [lon, lat]}),
            Geometry::BoundingBox(bbox) => json!({"type": "Polygon", "coordinates": polygon(&[bbox.ring()])}),
            Geometry::Polygon(rings) => json!({"type": "Polygon", "coordinates": polygon(rings)}),
            Geometry::MultiPolygon(polygons) => {
                let coordinates: Vec<Value> = polygons.iter().map(|p| Value::Array(polygon(p))).collect();
                json!({"type": "MultiPolygon", "coordinates": coordinates})
            }
        }
    }

    /// Parses a GeoJSON geometry, or the geometry of a GeoJSON feature.
    pub fn from_geojson_value(value: &Value) -> Result<Self, GeometryError> {
        let parsed: geojson::GeoJson =
            serde_json::from_value(value.clone()).map_err(|error| GeometryError::InvalidGeoJson(error.to_string()))?;
        let geometry = match parsed {
            geojson::GeoJson::Geometry(geometry) => geometry,
            geojson::GeoJson::Feature(feature) => feature
                .geometry
                .ok_or_else(|| GeometryError::InvalidGeoJson("feature has no geometry".into()))?,
            geojson::GeoJson::FeatureCollection(_) => {
                return Err(GeometryError::UnsupportedType("FeatureCollection".into()));
            }
        };
        Self::from_geojson_geometry(&geometry.value)
    }

    fn from_geojson_geometry(value: &geojson::Value) -> Result<Self, GeometryError> {
        match value {
            geojson::Value::Point(position) => Ok(Geometry::Point(position_from(position)?)),
            geojson::Value::Polygon(rings) => Ok(Geometry::Polygon(rings_from(rings)?)),
            geojson::Value::MultiPolygon(polygons) => Ok(Geometry::MultiPolygon(
                polygons.iter().map(|rings| rings_from(rings)).collect::<Result<_, _>>()?,
            )),
            geojson::Value::MultiPoint(_) => Err(GeometryError::UnsupportedType("MultiPoint".into())),
            geojson::Value::LineString(_) => Err(GeometryError::UnsupportedType("LineString".into())),
            geojson::Value::MultiLineString(_) => Err(GeometryError::UnsupportedType("MultiLineString".into())),
            geojson::Value::GeometryCollection(_) => Err(GeometryError::UnsupportedType("GeometryCollection".into())),
        }
    }

    /// Interprets any of the accepted user-facing geometry forms: a
    /// `[min_lon, min_lat, max_lon, max_lat]` array, a
    /// `{lonmin, latmin, lonmax, latmax}` object, a GeoJSON object, a WKT or
    /// EWKT string, a JSON-encoded GeoJSON string, or a comma separated bbox.
    pub fn from_value(value: &Value) -> Result<Self, GeometryError> {
        match value {
            Value::Array(items) if items.len() == 4 => {
                let numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
                match numbers.as_slice() {
                    [min_lon, min_lat, max_lon, max_lat] => Ok(Geometry::BoundingBox(BoundingBox::new(
                        *min_lon, *min_lat, *max_lon, *max_lat,
                    )?)),
                    _ => Err(GeometryError::InvalidBoundingBox("expected four numbers".into())),
                }
            }
            Value::Object(map) if map.contains_key("lonmin") => {
                let read = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_f64)
                        .ok_or_else(|| GeometryError::InvalidBoundingBox(format!("missing numeric '{key}'")))
                };
                Ok(Geometry::BoundingBox(BoundingBox::new(
                    read("lonmin")?,
                    read("latmin")?,
                    read("lonmax")?,
                    read("latmax")?,
                )?))
            }
            Value::Object(_) => Self::from_geojson_value(value),
            Value::String(text) => Self::from_text(text),
            other => Err(GeometryError::Unrecognized(other.to_string())),
        }
    }

    fn from_text(text: &str) -> Result<Self, GeometryError> {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            let parsed: Value =
                serde_json::from_str(trimmed).map_err(|error| GeometryError::InvalidGeoJson(error.to_string()))?;
            return Self::from_geojson_value(&parsed);
        }
        if trimmed.contains('(') {
            return Self::from_ewkt(trimmed);
        }
        let numbers: Vec<f64> = trimmed
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| GeometryError::Unrecognized(trimmed.to_string()))?;
        match numbers.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => Ok(Geometry::BoundingBox(BoundingBox::new(
                *min_lon, *min_lat, *max_lon, *max_lat,
            )?)),
            _ => Err(GeometryError::Unrecognized(trimmed.to_string())),
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wkt(None))
    }
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Geometry::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn format_coordinate(value: f64, precision: Option<u32>) -> String {
    match precision {
        Some(digits) => {
            let factor = 10f64.powi(digits as i32);
            let rounded = (value * factor).round() / factor;
            // avoid "-0"
            if rounded == 0.0 { "0".to_string() } else { rounded.to_string() }
        }
        None => value.to_string(),
    }
}

fn position_from(position: &[f64]) -> Result<Position, GeometryError> {
    match position {
        [lon, lat, ..] => Ok([*lon, *lat]),
        _ => Err(GeometryError::InvalidGeoJson("position needs at least two values".into())),
    }
}

fn rings_from(rings: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<Position>>, GeometryError> {
    rings
        .iter()
        .map(|ring| ring.iter().map(|position| position_from(position)).collect())
        .collect()
}

enum WktNode {
    Group(Vec<WktNode>),
    Coordinate(Position),
}

impl WktNode {
    fn into_children(self) -> Result<Vec<WktNode>, GeometryError> {
        match self {
            WktNode::Group(children) => Ok(children),
            WktNode::Coordinate(_) => Err(GeometryError::InvalidWkt("expected a parenthesized group".into())),
        }
    }

    fn into_positions(self) -> Result<Vec<Position>, GeometryError> {
        self.into_children()?
            .into_iter()
            .map(|node| match node {
                WktNode::Coordinate(position) => Ok(position),
                WktNode::Group(_) => Err(GeometryError::InvalidWkt("unexpected nesting level".into())),
            })
            .collect()
    }

    fn into_rings(self) -> Result<Vec<Vec<Position>>, GeometryError> {
        let rings = self
            .into_children()?
            .into_iter()
            .map(WktNode::into_positions)
            .collect::<Result<Vec<_>, _>>()?;
        if rings.iter().any(|ring| ring.len() < 4) {
            return Err(GeometryError::InvalidWkt("polygon rings need at least four positions".into()));
        }
        Ok(rings)
    }
}

struct WktParser<'a> {
    bytes: &'a [u8],
    text: &'a str,
    position: usize,
}

impl<'a> WktParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            text,
            position: 0,
        }
    }

    fn parse_document(mut self) -> Result<WktNode, GeometryError> {
        let node = self.parse_node()?;
        self.skip_whitespace();
        if self.position != self.bytes.len() {
            return Err(GeometryError::InvalidWkt(format!(
                "trailing characters at offset {}",
                self.position
            )));
        }
        Ok(node)
    }

    fn parse_node(&mut self) -> Result<WktNode, GeometryError> {
        self.skip_whitespace();
        if self.bytes.get(self.position) != Some(&b'(') {
            return self.parse_coordinate();
        }
        self.position += 1;
        let mut children = Vec::new();
        loop {
            children.push(self.parse_node()?);
            self.skip_whitespace();
            match self.bytes.get(self.position) {
                Some(b',') => self.position += 1,
                Some(b')') => {
                    self.position += 1;
                    return Ok(WktNode::Group(children));
                }
                _ => return Err(GeometryError::InvalidWkt("unbalanced parentheses".into())),
            }
        }
    }

    fn parse_coordinate(&mut self) -> Result<WktNode, GeometryError> {
        let start = self.position;
        while let Some(byte) = self.bytes.get(self.position) {
            if matches!(byte, b',' | b')' | b'(') {
                break;
            }
            self.position += 1;
        }
        let raw = &self.text[start..self.position];
        let numbers: Vec<f64> = raw
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<_, _>>()
            .map_err(|_| GeometryError::InvalidWkt(format!("invalid coordinate '{}'", raw.trim())))?;
        match numbers.as_slice() {
            [lon, lat, ..] => Ok(WktNode::Coordinate([*lon, *lat])),
            _ => Err(GeometryError::InvalidWkt(format!("invalid coordinate '{}'", raw.trim()))),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.bytes.get(self.position).is_some_and(u8::is_ascii_whitespace) {
            self.position += 1;
        }
    }
}
