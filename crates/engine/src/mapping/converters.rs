//! Named value transformers invocable from mapping templates as
//! `{field#converter(args)}` and from extract specs as `$.path#converter`.
//!
//! Converters are pure functions over JSON values. Compiled templates refer
//! to them by [`ConverterId`], an index into the process-wide registry, so
//! no name lookup happens while rendering or extracting.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use chrono::Duration;
use eogate_types::Geometry;
use eogate_util::date_handling::{
    TimePrecision, format_iso_date, format_iso_utc, from_timestamp_millis, parse_datetime_utc, timestamp_millis,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use thiserror::Error;

/// Decimal places kept by the WKT/EWKT converters.
pub const COORDINATES_PRECISION: u32 = 4;

pub type ConverterFn = fn(&Value, &[String]) -> Result<Value, ConversionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("converter '{converter}' failed: {reason}")]
pub struct ConversionError {
    pub converter: &'static str,
    pub reason: String,
}

impl ConversionError {
    fn new(converter: &'static str, reason: impl Into<String>) -> Self {
        Self {
            converter,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConverterId(usize);

/// A resolved converter invocation with its parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterCall {
    pub id: ConverterId,
    pub args: Vec<String>,
}

impl ConverterCall {
    pub fn name(&self) -> &'static str {
        ConverterRegistry::global().name(self.id)
    }
}

struct ConverterSpec {
    name: &'static str,
    function: ConverterFn,
    arity: RangeInclusive<usize>,
}

impl ConverterSpec {
    fn new(name: &'static str, function: ConverterFn, arity: RangeInclusive<usize>) -> Self {
        Self { name, function, arity }
    }
}

pub struct ConverterRegistry {
    converters: Vec<ConverterSpec>,
    index: HashMap<&'static str, ConverterId>,
}

static BUILTIN_CONVERTERS: Lazy<ConverterRegistry> = Lazy::new(ConverterRegistry::builtin);

impl ConverterRegistry {
    pub fn global() -> &'static ConverterRegistry {
        &BUILTIN_CONVERTERS
    }

    fn builtin() -> Self {
        let converters = vec![
            ConverterSpec::new("datetime_to_timestamp_milliseconds", datetime_to_timestamp_milliseconds, 0..=0),
            ConverterSpec::new("to_iso_utc_datetime_from_milliseconds", to_iso_utc_datetime_from_milliseconds, 0..=0),
            ConverterSpec::new("to_iso_utc_datetime", to_iso_utc_datetime, 0..=1),
            ConverterSpec::new("to_iso_date", to_iso_date, 0..=1),
            ConverterSpec::new("to_rounded_wkt", to_rounded_wkt, 0..=0),
            ConverterSpec::new("to_bounds", to_bounds, 0..=0),
            ConverterSpec::new("to_bounds_str", to_bounds_str, 0..=1),
            ConverterSpec::new("to_nwse_bounds", to_nwse_bounds, 0..=0),
            ConverterSpec::new("to_nwse_bounds_str", to_nwse_bounds_str, 0..=1),
            ConverterSpec::new("to_geojson", to_geojson, 0..=0),
            ConverterSpec::new("from_geojson", from_geojson, 0..=0),
            ConverterSpec::new("to_ewkt", to_ewkt, 0..=0),
            ConverterSpec::new("from_ewkt", from_ewkt, 0..=0),
            ConverterSpec::new("from_wkt", from_wkt, 0..=0),
            ConverterSpec::new("csv_list", csv_list, 0..=1),
            ConverterSpec::new("remove_extension", remove_extension, 0..=0),
            ConverterSpec::new("get_group_name", get_group_name, 1..=1),
            ConverterSpec::new("replace_str", replace_str, 2..=2),
            ConverterSpec::new("slice_str", slice_str, 1..=3),
            ConverterSpec::new("to_upper", to_upper, 0..=0),
            ConverterSpec::new("to_lower", to_lower, 0..=0),
            ConverterSpec::new("to_int", to_int, 0..=0),
            ConverterSpec::new("to_float", to_float, 0..=0),
        ];
        let index = converters
            .iter()
            .enumerate()
            .map(|(position, spec)| (spec.name, ConverterId(position)))
            .collect();
        Self { converters, index }
    }

    pub fn lookup(&self, name: &str) -> Option<ConverterId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: ConverterId) -> &'static str {
        self.converters[id.0].name
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.converters.iter().map(|spec| spec.name)
    }

    /// Resolves `name(raw_args)` into a call, checking the argument count.
    pub fn resolve(&self, name: &str, raw_args: Option<&str>) -> Result<ConverterCall, String> {
        let id = self.lookup(name).ok_or_else(|| format!("unknown converter '{name}'"))?;
        let args = match raw_args {
            Some(raw) => parse_arguments(raw)?,
            None => Vec::new(),
        };
        let arity = &self.converters[id.0].arity;
        if !arity.contains(&args.len()) {
            return Err(format!(
                "converter '{name}' takes {}..={} argument(s), got {}",
                arity.start(),
                arity.end(),
                args.len()
            ));
        }
        Ok(ConverterCall { id, args })
    }

    pub fn apply(&self, call: &ConverterCall, value: &Value) -> Result<Value, ConversionError> {
        (self.converters[call.id.0].function)(value, &call.args)
    }
}

/// Runs `value` through every converter of `chain`, left to right.
pub fn apply_chain(chain: &[ConverterCall], value: Value) -> Result<Value, ConversionError> {
    let registry = ConverterRegistry::global();
    chain
        .iter()
        .try_fold(value, |current, call| registry.apply(call, &current))
}

/// Splits a converter argument list on top-level commas. Arguments may be
/// quoted with `'` or `"`, optionally with a raw-string `r` prefix; quotes
/// are stripped.
pub fn parse_arguments(raw: &str) -> Result<Vec<String>, String> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for ch in raw.chars() {
        match (quote, ch) {
            (Some(open), c) if c == open => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '(' | '[' | '{') => {
                depth += 1;
                current.push(ch);
            }
            (None, ')' | ']' | '}') => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            (None, ',') if depth == 0 => arguments.push(unquote(&std::mem::take(&mut current))),
            (None, c) => current.push(c),
        }
    }
    if let Some(open) = quote {
        return Err(format!("unterminated {open} quote in arguments '{raw}'"));
    }
    arguments.push(unquote(&current));
    Ok(arguments)
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    let unprefixed = trimmed
        .strip_prefix('r')
        .filter(|rest| rest.starts_with('\'') || rest.starts_with('"'))
        .unwrap_or(trimmed);
    for quote in ['\'', '"'] {
        if unprefixed.len() >= 2 && unprefixed.starts_with(quote) && unprefixed.ends_with(quote) {
            return unprefixed[1..unprefixed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn text_arg(name: &'static str, value: &Value) -> Result<String, ConversionError> {
    value_text(value).ok_or_else(|| ConversionError::new(name, format!("expected a scalar, got {value}")))
}

fn geometry_arg(name: &'static str, value: &Value) -> Result<Geometry, ConversionError> {
    Geometry::from_value(value).map_err(|error| ConversionError::new(name, error.to_string()))
}

fn datetime_arg(name: &'static str, value: &Value) -> Result<chrono::DateTime<chrono::Utc>, ConversionError> {
    let text = text_arg(name, value)?;
    parse_datetime_utc(&text).ok_or_else(|| ConversionError::new(name, format!("'{text}' is not a datetime")))
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn datetime_to_timestamp_milliseconds(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "datetime_to_timestamp_milliseconds";
    let text = text_arg(NAME, value)?;
    timestamp_millis(&text)
        .map(Value::from)
        .ok_or_else(|| ConversionError::new(NAME, format!("'{text}' is not a datetime")))
}

fn to_iso_utc_datetime_from_milliseconds(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "to_iso_utc_datetime_from_milliseconds";
    let millis = match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ConversionError::new(NAME, format!("{value} is not a millisecond timestamp")))?;
    let datetime =
        from_timestamp_millis(millis).ok_or_else(|| ConversionError::new(NAME, format!("{millis} is out of range")))?;
    Ok(Value::String(format_iso_utc(&datetime, TimePrecision::Milliseconds)))
}

fn to_iso_utc_datetime(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "to_iso_utc_datetime";
    let precision = match args.first() {
        Some(timespec) => TimePrecision::from_timespec(timespec)
            .ok_or_else(|| ConversionError::new(NAME, format!("unknown timespec '{timespec}'")))?,
        None => TimePrecision::Milliseconds,
    };
    let datetime = datetime_arg(NAME, value)?;
    Ok(Value::String(format_iso_utc(&datetime, precision)))
}

fn to_iso_date(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "to_iso_date";
    let offset_days = match args.first() {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ConversionError::new(NAME, format!("day offset '{raw}' is not an integer")))?,
        None => 0,
    };
    let datetime = datetime_arg(NAME, value)? + Duration::days(offset_days);
    Ok(Value::String(format_iso_date(&datetime)))
}

fn to_rounded_wkt(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    let geometry = geometry_arg("to_rounded_wkt", value)?;
    Ok(Value::String(geometry.to_wkt(Some(COORDINATES_PRECISION))))
}

fn to_bounds(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    let bounds = geometry_arg("to_bounds", value)?.bounds();
    Ok(Value::Array(bounds.as_array().into_iter().map(float_value).collect()))
}

fn join_numbers(numbers: &[f64], separator: &str) -> String {
    numbers
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

fn to_bounds_str(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    let bounds = geometry_arg("to_bounds_str", value)?.bounds();
    let separator = args.first().map(String::as_str).unwrap_or(",");
    Ok(Value::String(join_numbers(&bounds.as_array(), separator)))
}

fn nwse(value: &Value, name: &'static str) -> Result<[f64; 4], ConversionError> {
    let bounds = geometry_arg(name, value)?.bounds();
    Ok([bounds.max_lat, bounds.min_lon, bounds.min_lat, bounds.max_lon])
}

fn to_nwse_bounds(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    let ordered = nwse(value, "to_nwse_bounds")?;
    Ok(Value::Array(ordered.into_iter().map(float_value).collect()))
}

fn to_nwse_bounds_str(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    let ordered = nwse(value, "to_nwse_bounds_str")?;
    let separator = args.first().map(String::as_str).unwrap_or("/");
    Ok(Value::String(join_numbers(&ordered, separator)))
}

fn to_geojson(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    let geometry = geometry_arg("to_geojson", value)?;
    Ok(Value::String(geometry.to_geojson_value().to_string()))
}

fn from_geojson(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    Ok(geometry_arg("from_geojson", value)?.to_geojson_value())
}

fn to_ewkt(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    let geometry = geometry_arg("to_ewkt", value)?;
    Ok(Value::String(geometry.to_ewkt(Some(COORDINATES_PRECISION))))
}

fn from_ewkt(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "from_ewkt";
    let text = text_arg(NAME, value)?;
    let geometry = Geometry::from_ewkt(&text).map_err(|error| ConversionError::new(NAME, error.to_string()))?;
    Ok(geometry.to_geojson_value())
}

fn from_wkt(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "from_wkt";
    let text = text_arg(NAME, value)?;
    let geometry = Geometry::from_wkt(&text).map_err(|error| ConversionError::new(NAME, error.to_string()))?;
    Ok(geometry.to_geojson_value())
}

fn csv_list(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    let separator = args.first().map(String::as_str).unwrap_or(",");
    match value {
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| text_arg("csv_list", item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::String(parts.join(separator)))
        }
        other => Ok(Value::String(text_arg("csv_list", other)?)),
    }
}

fn remove_extension(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    let text = text_arg("remove_extension", value)?;
    let stem = text.split('.').next().unwrap_or_default();
    Ok(Value::String(stem.to_string()))
}

fn compile_pattern(name: &'static str, pattern: &str) -> Result<Regex, ConversionError> {
    Regex::new(pattern).map_err(|error| ConversionError::new(name, error.to_string()))
}

fn get_group_name(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "get_group_name";
    let text = text_arg(NAME, value)?;
    let pattern = compile_pattern(NAME, &args[0])?;
    let captures = pattern
        .captures(&text)
        .ok_or_else(|| ConversionError::new(NAME, format!("'{text}' does not match '{}'", args[0])))?;
    pattern
        .capture_names()
        .flatten()
        .filter(|group| captures.name(group).is_some())
        .last()
        .map(|group| Value::String(group.to_string()))
        .ok_or_else(|| ConversionError::new(NAME, "no named group matched"))
}

static BACKREFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(\d+)").expect("backreference regex should compile"));

fn replace_str(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "replace_str";
    let text = text_arg(NAME, value)?;
    let pattern = compile_pattern(NAME, &args[0])?;
    // Literal `$` must not read as a capture reference; only `\N` does.
    let escaped = args[1].replace('$', "$$");
    let replacement = BACKREFERENCE.replace_all(&escaped, "$${$1}");
    Ok(Value::String(pattern.replace_all(&text, replacement.as_ref()).into_owned()))
}

fn slice_str(value: &Value, args: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "slice_str";
    let text = text_arg(NAME, value)?;
    let chars: Vec<char> = text.chars().collect();
    let length = chars.len() as i64;
    let parse = |raw: Option<&String>| -> Result<Option<i64>, ConversionError> {
        match raw.map(|s| s.trim()).filter(|s| !s.is_empty() && *s != "None") {
            Some(number) => number
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ConversionError::new(NAME, format!("'{number}' is not an integer"))),
            None => Ok(None),
        }
    };
    let clamp = |index: i64| if index < 0 { (length + index).max(0) } else { index.min(length) };
    let start = parse(args.first())?.map(clamp).unwrap_or(0);
    let end = parse(args.get(1))?.map(clamp).unwrap_or(length);
    let step = parse(args.get(2))?.unwrap_or(1);
    if step <= 0 {
        return Err(ConversionError::new(NAME, "step must be positive"));
    }
    let sliced: String = (start..end)
        .step_by(step as usize)
        .filter_map(|index| chars.get(index as usize))
        .collect();
    Ok(Value::String(sliced))
}

fn to_upper(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    Ok(Value::String(text_arg("to_upper", value)?.to_uppercase()))
}

fn to_lower(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    Ok(Value::String(text_arg("to_lower", value)?.to_lowercase()))
}

fn to_int(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "to_int";
    let parsed = match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f.trunc() as i64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    };
    parsed
        .map(Value::from)
        .ok_or_else(|| ConversionError::new(NAME, format!("{value} is not an integer")))
}

fn to_float(value: &Value, _: &[String]) -> Result<Value, ConversionError> {
    const NAME: &str = "to_float";
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .map(float_value)
        .ok_or_else(|| ConversionError::new(NAME, format!("{value} is not a number")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn run(name: &str, args: Option<&str>, value: Value) -> Result<Value, ConversionError> {
        let registry = ConverterRegistry::global();
        let call = registry.resolve(name, args).unwrap();
        registry.apply(&call, &value)
    }

    #[test]
    fn resolve_rejects_unknown_names_and_bad_arity() {
        let registry = ConverterRegistry::global();
        assert!(registry.resolve("to_martian", None).unwrap_err().contains("unknown converter"));
        assert!(registry.resolve("replace_str", Some("'a'")).is_err());
        assert!(registry.resolve("to_upper", Some("")).is_ok());
    }

    #[test]
    fn argument_parsing_respects_quotes_and_groups() {
        assert_eq!(
            parse_arguments(r#"r"^(.*),(x)$", '\1-\2'"#).unwrap(),
            vec![r"^(.*),(x)$".to_string(), r"\1-\2".to_string()]
        );
        assert_eq!(parse_arguments("1, -1").unwrap(), vec!["1", "-1"]);
        assert!(parse_arguments("'open").is_err());
    }

    #[test]
    fn date_converters() {
        assert_eq!(
            run("to_iso_utc_datetime", None, json!("2021-01-01T10:00:00+02:00")).unwrap(),
            json!("2021-01-01T08:00:00.000Z")
        );
        assert_eq!(
            run("to_iso_utc_datetime", Some("seconds"), json!("2021-01-01")).unwrap(),
            json!("2021-01-01T00:00:00Z")
        );
        assert_eq!(
            run("to_iso_date", None, json!("2021-01-01T23:59:59Z")).unwrap(),
            json!("2021-01-01")
        );
        assert_eq!(
            run("to_iso_date", Some("1"), json!("2021-01-31T10:00:00Z")).unwrap(),
            json!("2021-02-01")
        );
        assert_eq!(
            run("datetime_to_timestamp_milliseconds", None, json!("1970-01-01T00:00:01Z")).unwrap(),
            json!(1000)
        );
        assert_eq!(
            run("to_iso_utc_datetime_from_milliseconds", None, json!(1000)).unwrap(),
            json!("1970-01-01T00:00:01.000Z")
        );
        assert!(run("to_iso_date", None, json!("not a date")).is_err());
    }

    #[test]
    fn geometry_converters() {
        let polygon = json!({
            "type": "Polygon",
            "coordinates": [[[1.123456, 43.0], [2.0, 43.0], [2.0, 44.0], [1.123456, 44.0], [1.123456, 43.0]]]
        });
        assert_eq!(
            run("to_rounded_wkt", None, polygon.clone()).unwrap(),
            json!("POLYGON ((1.1235 43, 2 43, 2 44, 1.1235 44, 1.1235 43))")
        );
        assert_eq!(
            run("to_bounds", None, polygon.clone()).unwrap(),
            json!([1.123456, 43.0, 2.0, 44.0])
        );
        assert_eq!(
            run("to_bounds_str", None, json!([1, 43, 2, 44])).unwrap(),
            json!("1,43,2,44")
        );
        assert_eq!(
            run("to_nwse_bounds_str", None, json!([1, 43, 2, 44])).unwrap(),
            json!("44/1/43/2")
        );
        assert_eq!(
            run("to_nwse_bounds", None, json!([1, 43, 2, 44])).unwrap(),
            json!([44.0, 1.0, 43.0, 2.0])
        );
        assert_eq!(
            run("to_ewkt", None, json!({"type": "Point", "coordinates": [1.0, 2.0]})).unwrap(),
            json!("SRID=4326;POINT (1 2)")
        );
        assert_eq!(
            run("from_wkt", None, json!("POINT (1 2)")).unwrap(),
            json!({"type": "Point", "coordinates": [1.0, 2.0]})
        );
        assert_eq!(
            run("from_ewkt", None, json!("SRID=4326;POINT (1 2)")).unwrap(),
            json!({"type": "Point", "coordinates": [1.0, 2.0]})
        );
        let encoded = run("to_geojson", None, json!("POINT (1 2)")).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(encoded.as_str().unwrap()).unwrap()["type"],
            "Point"
        );
        assert!(run("from_geojson", None, json!({"type": "Nope"})).is_err());
    }

    #[test]
    fn string_converters() {
        assert_eq!(run("csv_list", None, json!(["a", "b", 3])).unwrap(), json!("a,b,3"));
        assert_eq!(run("csv_list", Some("'|'"), json!(["a", "b"])).unwrap(), json!("a|b"));
        assert_eq!(
            run("remove_extension", None, json!("S2A_MSIL1C.SAFE.zip")).unwrap(),
            json!("S2A_MSIL1C")
        );
        assert_eq!(
            run("replace_str", Some(r#"r"^(S2.)_", r"\1-""#), json!("S2A_MSIL1C")).unwrap(),
            json!("S2A-MSIL1C")
        );
        assert_eq!(
            run("replace_str", Some(r#"r"_", r"$1$""#), json!("a_b")).unwrap(),
            json!("a$1$b")
        );
        assert_eq!(
            run("replace_str", Some(r#"r"(\d+)", r"$\1""#), json!("cost 12")).unwrap(),
            json!("cost $12")
        );
        assert_eq!(
            run("slice_str", Some("0,3"), json!("S2A_MSIL1C")).unwrap(),
            json!("S2A")
        );
        assert_eq!(
            run("slice_str", Some("-5"), json!("S2A_MSIL1C")).unwrap(),
            json!("SIL1C")
        );
        assert_eq!(
            run("slice_str", Some("0, None, 2"), json!("abcdef")).unwrap(),
            json!("ace")
        );
        assert_eq!(run("to_upper", None, json!("s2a")).unwrap(), json!("S2A"));
        assert_eq!(run("to_lower", None, json!("S2A")).unwrap(), json!("s2a"));
        assert_eq!(
            run(
                "get_group_name",
                Some(r"'(?P<L1C>MSIL1C)|(?P<L2A>MSIL2A)'"),
                json!("S2B_MSIL2A_2021")
            )
            .unwrap(),
            json!("L2A")
        );
    }

    #[test]
    fn numeric_converters() {
        assert_eq!(run("to_int", None, json!("12.7")).unwrap(), json!(12));
        assert_eq!(run("to_int", None, json!(3.9)).unwrap(), json!(3));
        assert_eq!(run("to_float", None, json!("0.5")).unwrap(), json!(0.5));
        assert!(run("to_float", None, json!("abc")).is_err());
    }

    #[test]
    fn chains_apply_left_to_right() {
        let registry = ConverterRegistry::global();
        let chain = vec![
            registry.resolve("slice_str", Some("0,3")).unwrap(),
            registry.resolve("to_lower", None).unwrap(),
        ];
        assert_eq!(apply_chain(&chain, json!("S2A_MSIL1C")).unwrap(), json!("s2a"));
        assert_eq!(chain[0].name(), "slice_str");
    }
}
