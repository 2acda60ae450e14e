//! # Request Data Binder
//!
//! Loads loosely typed, multi-valued form data (`key -> [values]`) into a
//! destination value.
//!
//! - A [`serde_json::Map`] destination infers a JSON type for every value.
//! - A struct destination is described by `#[derive(Bind)]`, which generates
//!   one [`FormField`] assignment per field. Field names come from the
//!   `#[bind(<tag_key> = "name")]` attribute or the field identifier.
//!
//! The reserved [`JSON_PAYLOAD_KEY`] carries a literal JSON object that is
//! merged over the destination after the scalar fields, with plain JSON
//! semantics.
//!
//! ```rust,ignore
//! #[derive(Bind, Serialize, Deserialize, Default)]
//! struct Search {
//!     #[bind(form = "q")]
//!     query: String,
//!     page: Option<u32>,
//!     tags: Vec<String>,
//! }
//!
//! let mut dst = Search::default();
//! unmarshal_request_data(&form, &mut dst, "", "")?;
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::io;
use thiserror::Error;

/// Key carrying a literal JSON object inside form data.
pub const JSON_PAYLOAD_KEY: &str = "@jsonPayload";

/// Tag key used when none is given.
pub const DEFAULT_TAG_KEY: &str = "form";

/// Parsed multi-valued form data.
pub type FormData = HashMap<String, Vec<String>>;

/// Errors raised while binding request data.
#[derive(Error, Debug)]
pub enum BindError {
    /// Not a recognised boolean literal.
    #[error("invalid boolean {0:?}")]
    InvalidBool(String),

    /// Not an integer literal.
    #[error("invalid integer {0:?}")]
    InvalidInt(String),

    /// Not a floating point literal.
    #[error("invalid number {0:?}")]
    InvalidFloat(String),

    /// The number doesn't fit the destination type.
    #[error("{value:?} is out of range for {ty}")]
    OutOfRange {
        /// Raw input.
        value: String,
        /// Destination type name.
        ty: &'static str,
    },

    /// A text-decodable field rejected its input.
    #[error("invalid value {value:?}: {message}")]
    InvalidText {
        /// Raw input.
        value: String,
        /// Decoder error message.
        message: String,
    },

    /// A field failed to bind.
    #[error("failed to bind field {field:?}: {source}")]
    Field {
        /// Full (prefixed) field name.
        field: String,
        /// Underlying failure.
        #[source]
        source: Box<BindError>,
    },

    /// The JSON payload is malformed or doesn't fit the destination.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The request body format can't be bound.
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),

    /// The request body couldn't be read.
    #[error("failed to read request body: {0}")]
    Body(#[from] io::Error),
}

/// A destination for [`unmarshal_request_data`].
///
/// Implemented for [`serde_json::Map`], for `Option<B>` and by
/// `#[derive(Bind)]` for structs.
pub trait Bindable {
    /// Assign the plain (non JSON payload) form values.
    fn bind_fields(&mut self, data: &FormData, tag_key: &str, prefix: &str)
    -> Result<(), BindError>;

    /// Merge a literal JSON payload over the current value.
    fn merge_json_payload(&mut self, payload: &[u8]) -> Result<(), BindError>;
}

/// Load `data` into `dst`.
///
/// `tag_key` selects which `#[bind(..)]` name is used for struct fields
/// (default `form`). `prefix` is prepended, dot separated, to every struct
/// field name; map destinations ignore it.
pub fn unmarshal_request_data<D>(
    data: &FormData,
    dst: &mut D,
    tag_key: &str,
    prefix: &str,
) -> Result<(), BindError>
where
    D: Bindable + ?Sized,
{
    if data.is_empty() {
        return Ok(());
    }

    let tag_key = if tag_key.is_empty() {
        DEFAULT_TAG_KEY
    } else {
        tag_key
    };
    dst.bind_fields(data, tag_key, prefix)?;

    for payload in data.get(JSON_PAYLOAD_KEY).into_iter().flatten() {
        dst.merge_json_payload(payload.as_bytes())?;
    }
    Ok(())
}

/// Parse an `application/x-www-form-urlencoded` string.
pub fn parse_form(input: &str) -> FormData {
    let mut data = FormData::new();
    for pair in input.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        data.entry(decode_component(key))
            .or_default()
            .push(decode_component(value));
    }
    data
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

// ============================================================================
// Map destination
// ============================================================================

impl Bindable for Map<String, Value> {
    fn bind_fields(
        &mut self,
        data: &FormData,
        _tag_key: &str,
        _prefix: &str,
    ) -> Result<(), BindError> {
        for (key, values) in data {
            if key == JSON_PAYLOAD_KEY {
                continue;
            }
            let value = match values.as_slice() {
                [single] => infer_value(single),
                many => Value::Array(many.iter().map(|v| infer_value(v)).collect()),
            };
            self.insert(key.clone(), value);
        }
        Ok(())
    }

    fn merge_json_payload(&mut self, payload: &[u8]) -> Result<(), BindError> {
        let patch: Map<String, Value> = serde_json::from_slice(payload)?;
        self.extend(patch);
        Ok(())
    }
}

/// Infer a JSON value from a raw form string.
///
/// A numeric-looking string becomes a number only if the number prints back
/// to exactly the same string, so `"000001"`, `"1.50"` or `"1.6E-35"` stay
/// strings.
pub fn infer_value(raw: &str) -> Value {
    match raw {
        "" => Value::String(String::new()),
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => infer_number(raw).unwrap_or_else(|| Value::String(raw.to_string())),
    }
}

fn infer_number(raw: &str) -> Option<Value> {
    let first = raw.chars().next()?;
    if !(first == '-' || first.is_ascii_digit()) {
        return None;
    }
    if !raw.chars().all(|c| c == '-' || c == '.' || c.is_ascii_digit()) {
        return None;
    }

    if let Ok(int) = raw.parse::<i64>() {
        if int.to_string() == raw {
            return Some(Value::Number(int.into()));
        }
    }
    let float = raw.parse::<f64>().ok()?;
    if float.to_string() != raw {
        return None;
    }
    Number::from_f64(float).map(Value::Number)
}

// ============================================================================
// Struct destinations
// ============================================================================

impl<B: Bindable + Default> Bindable for Option<B> {
    fn bind_fields(
        &mut self,
        data: &FormData,
        tag_key: &str,
        prefix: &str,
    ) -> Result<(), BindError> {
        self.get_or_insert_with(B::default)
            .bind_fields(data, tag_key, prefix)
    }

    fn merge_json_payload(&mut self, payload: &[u8]) -> Result<(), BindError> {
        self.get_or_insert_with(B::default).merge_json_payload(payload)
    }
}

/// Merge a JSON payload over any serde value: objects merge key by key,
/// recursively; everything else is replaced.
pub fn merge_json_into<D>(dst: &mut D, payload: &[u8]) -> Result<(), BindError>
where
    D: Serialize + DeserializeOwned,
{
    let patch: Value = serde_json::from_slice(payload)?;
    let mut current = serde_json::to_value(&*dst)?;
    merge_value(&mut current, patch);
    *dst = serde_json::from_value(current)?;
    Ok(())
}

fn merge_value(current: &mut Value, patch: Value) {
    match (current, patch) {
        (Value::Object(current), Value::Object(patch)) => {
            for (key, value) in patch {
                match current.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        current.insert(key, value);
                    }
                }
            }
        }
        (current, patch) => *current = patch,
    }
}

/// Resolve the form key of a struct field.
///
/// `tags` are the `(tag_key, name)` pairs declared on the field. Returns
/// `None` for skipped (`"-"`) fields. An untagged flattened field keeps the
/// current prefix.
#[doc(hidden)]
pub fn field_name(
    tags: &[(&str, &str)],
    tag_key: &str,
    ident: &str,
    prefix: &str,
    flatten: bool,
) -> Option<String> {
    let tag = tags
        .iter()
        .find(|(key, _)| *key == tag_key)
        .map(|(_, name)| *name)
        .unwrap_or_default();
    if tag == "-" {
        return None;
    }

    let name = if tag.is_empty() && !flatten { ident } else { tag };
    Some(match (prefix.is_empty(), name.is_empty()) {
        (_, true) => prefix.to_string(),
        (true, false) => name.to_string(),
        (false, false) => format!("{prefix}.{name}"),
    })
}

/// Attach the field name to a binding failure.
#[doc(hidden)]
pub fn field_error(field: &str, err: BindError) -> BindError {
    match err {
        BindError::Field { .. } | BindError::Json(_) => err,
        other => BindError::Field {
            field: field.to_string(),
            source: Box::new(other),
        },
    }
}

// ============================================================================
// Field values
// ============================================================================

/// A scalar that can be decoded from one form value.
pub trait FieldValue: Sized {
    /// Decode `raw`.
    fn parse_field(raw: &str) -> Result<Self, BindError>;
}

/// A struct field that can be assigned from form data.
///
/// Scalars take the first value, `Vec<T>` takes every value, and `Option<T>`
/// or `Option<Vec<T>>` are only set when the key is present.
pub trait FormField {
    /// Assign the values stored under `name`. Missing keys leave the field
    /// untouched.
    fn bind_field(&mut self, data: &FormData, name: &str) -> Result<(), BindError>;
}

fn first_value<'d>(data: &'d FormData, name: &str) -> Option<&'d str> {
    data.get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
}

/// [`FormField::bind_field`] for plain scalars.
#[doc(hidden)]
pub fn bind_scalar<T: FieldValue>(
    field: &mut T,
    data: &FormData,
    name: &str,
) -> Result<(), BindError> {
    if let Some(raw) = first_value(data, name) {
        *field = T::parse_field(raw)?;
    }
    Ok(())
}

impl<T: FieldValue> FormField for Vec<T> {
    fn bind_field(&mut self, data: &FormData, name: &str) -> Result<(), BindError> {
        match data.get(name) {
            Some(values) if !values.is_empty() => {
                *self = values
                    .iter()
                    .map(|v| T::parse_field(v))
                    .collect::<Result<_, _>>()?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl<T: FieldValue> FormField for Option<T> {
    fn bind_field(&mut self, data: &FormData, name: &str) -> Result<(), BindError> {
        if let Some(raw) = first_value(data, name) {
            *self = Some(T::parse_field(raw)?);
        }
        Ok(())
    }
}

impl<T: FieldValue> FormField for Option<Vec<T>> {
    fn bind_field(&mut self, data: &FormData, name: &str) -> Result<(), BindError> {
        let mut values = Vec::new();
        values.bind_field(data, name)?;
        if data.get(name).is_some_and(|v| !v.is_empty()) {
            *self = Some(values);
        }
        Ok(())
    }
}

macro_rules! scalar_fields {
    ($($ty:ty => $parse:expr),* $(,)?) => {$(
        impl FieldValue for $ty {
            fn parse_field(raw: &str) -> Result<Self, BindError> {
                $parse(raw)
            }
        }

        impl FormField for $ty {
            fn bind_field(&mut self, data: &FormData, name: &str) -> Result<(), BindError> {
                bind_scalar(self, data, name)
            }
        }
    )*};
}

scalar_fields! {
    String => |raw: &str| Ok(raw.to_string()),
    bool => parse_bool,
    i8 => parse_signed::<i8>,
    i16 => parse_signed::<i16>,
    i32 => parse_signed::<i32>,
    i64 => parse_signed::<i64>,
    isize => parse_signed::<isize>,
    u8 => parse_unsigned::<u8>,
    u16 => parse_unsigned::<u16>,
    u32 => parse_unsigned::<u32>,
    u64 => parse_unsigned::<u64>,
    usize => parse_unsigned::<usize>,
    f32 => |raw: &str| parse_float::<f32>(raw),
    f64 => |raw: &str| parse_float::<f64>(raw),
    Value => |raw: &str| Ok(infer_value(raw)),
}

/// Implement [`FieldValue`] and [`FormField`] for types decodable with
/// [`std::str::FromStr`].
///
/// ```rust,ignore
/// text_field!(std::net::IpAddr, MyDate);
/// ```
#[macro_export]
macro_rules! text_field {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::binder::FieldValue for $ty {
            fn parse_field(raw: &str) -> ::core::result::Result<Self, $crate::binder::BindError> {
                raw.parse::<$ty>().map_err(|e| $crate::binder::BindError::InvalidText {
                    value: raw.to_string(),
                    message: e.to_string(),
                })
            }
        }

        impl $crate::binder::FormField for $ty {
            fn bind_field(
                &mut self,
                data: &$crate::binder::FormData,
                name: &str,
            ) -> ::core::result::Result<(), $crate::binder::BindError> {
                $crate::binder::bind_scalar(self, data, name)
            }
        }
    )+};
}

text_field!(std::net::IpAddr, std::net::SocketAddr);

fn parse_bool(raw: &str) -> Result<bool, BindError> {
    match raw {
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        _ => Err(BindError::InvalidBool(raw.to_string())),
    }
}

/// Parse an integer literal with an optional sign, `0x`/`0o`/`0b` prefix,
/// leading-zero octal and `_` digit separators.
fn parse_integer(raw: &str) -> Result<(bool, u128), BindError> {
    let invalid = || BindError::InvalidInt(raw.to_string());

    let (negative, body) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };

    let lower = body.to_ascii_lowercase();
    let (radix, digits, prefixed) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest, true)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest, true)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest, true)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..], true)
    } else {
        (10, lower.as_str(), false)
    };

    if digits.contains('_') {
        let separated_ok = (prefixed || !digits.starts_with('_'))
            && !digits.ends_with('_')
            && !digits.contains("__");
        if !separated_ok {
            return Err(invalid());
        }
    }
    let digits = digits.replace('_', "");
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }

    u128::from_str_radix(&digits, radix)
        .map(|magnitude| (negative, magnitude))
        .map_err(|_| BindError::OutOfRange {
            value: raw.to_string(),
            ty: "u128",
        })
}

fn parse_signed<T>(raw: &str) -> Result<T, BindError>
where
    T: TryFrom<i128> + Default,
{
    if raw.is_empty() {
        return Ok(T::default());
    }
    let out_of_range = || BindError::OutOfRange {
        value: raw.to_string(),
        ty: std::any::type_name::<T>(),
    };

    let (negative, magnitude) = parse_integer(raw)?;
    let magnitude = i128::try_from(magnitude).map_err(|_| out_of_range())?;
    let value = if negative { -magnitude } else { magnitude };
    T::try_from(value).map_err(|_| out_of_range())
}

fn parse_unsigned<T>(raw: &str) -> Result<T, BindError>
where
    T: TryFrom<u128> + Default,
{
    if raw.is_empty() {
        return Ok(T::default());
    }
    if raw.starts_with(['-', '+']) {
        return Err(BindError::InvalidInt(raw.to_string()));
    }

    let (_, magnitude) = parse_integer(raw)?;
    T::try_from(magnitude).map_err(|_| BindError::OutOfRange {
        value: raw.to_string(),
        ty: std::any::type_name::<T>(),
    })
}

fn parse_float<T>(raw: &str) -> Result<T, BindError>
where
    T: std::str::FromStr + Default,
{
    if raw.is_empty() {
        return Ok(T::default());
    }
    raw.parse::<T>()
        .map_err(|_| BindError::InvalidFloat(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(pairs: &[(&str, &[&str])]) -> FormData {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn infer_value_keeps_non_canonical_numbers_as_strings() {
        assert_eq!(infer_value(""), json!(""));
        assert_eq!(infer_value("true"), json!(true));
        assert_eq!(infer_value("false"), json!(false));
        assert_eq!(infer_value("123"), json!(123));
        assert_eq!(infer_value("-12.5"), json!(-12.5));
        assert_eq!(infer_value("000001"), json!("000001"));
        assert_eq!(infer_value("1.6E-35"), json!("1.6E-35"));
        assert_eq!(infer_value("1.50"), json!("1.50"));
        assert_eq!(infer_value("1,000"), json!("1,000"));
        assert_eq!(infer_value("Infinity"), json!("Infinity"));
        assert_eq!(infer_value("TRUE"), json!("TRUE"));
        assert_eq!(infer_value("--1"), json!("--1"));
    }

    #[test]
    fn map_destination() {
        let data = form(&[
            ("single", &["1"]),
            ("multi", &["a", "2", "false"]),
            (JSON_PAYLOAD_KEY, &[r#"{"single": {"nested": [1, 2]}, "extra": null}"#]),
        ]);

        let mut dst = Map::new();
        dst.insert("kept".into(), json!("yes"));
        unmarshal_request_data(&data, &mut dst, "", "ignored").unwrap();

        assert_eq!(
            Value::Object(dst),
            json!({
                "kept": "yes",
                "single": {"nested": [1, 2]},
                "multi": ["a", 2, false],
                "extra": null
            })
        );
    }

    #[test]
    fn map_payload_must_be_an_object() {
        let data = form(&[(JSON_PAYLOAD_KEY, &["[1, 2]"])]);
        let mut dst = Map::new();
        assert!(matches!(
            unmarshal_request_data(&data, &mut dst, "", ""),
            Err(BindError::Json(_))
        ));
    }

    #[test]
    fn integer_literals() {
        assert_eq!(parse_signed::<i64>("42").unwrap(), 42);
        assert_eq!(parse_signed::<i64>("-0x1f").unwrap(), -31);
        assert_eq!(parse_signed::<i64>("0o17").unwrap(), 15);
        assert_eq!(parse_signed::<i64>("017").unwrap(), 15);
        assert_eq!(parse_signed::<i64>("0b101").unwrap(), 5);
        assert_eq!(parse_signed::<i64>("1_000").unwrap(), 1000);
        assert_eq!(parse_signed::<i64>("").unwrap(), 0);
        assert_eq!(parse_signed::<i8>("-128").unwrap(), -128);
        assert_eq!(parse_unsigned::<u8>("255").unwrap(), 255);

        assert!(matches!(
            parse_signed::<i8>("128"),
            Err(BindError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_unsigned::<u16>("-1"),
            Err(BindError::InvalidInt(_))
        ));
        assert!(matches!(
            parse_signed::<i32>("08"),
            Err(BindError::InvalidInt(_))
        ));
        assert!(matches!(
            parse_signed::<i32>("1__0"),
            Err(BindError::InvalidInt(_))
        ));
        assert!(matches!(
            parse_signed::<i32>("abc"),
            Err(BindError::InvalidInt(_))
        ));
    }

    #[test]
    fn bool_literals() {
        for raw in ["1", "t", "T", "TRUE", "true", "True"] {
            assert!(parse_bool(raw).unwrap(), "{raw}");
        }
        for raw in ["", "0", "f", "F", "FALSE", "false", "False"] {
            assert!(!parse_bool(raw).unwrap(), "{raw}");
        }
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn field_names() {
        let tags = [("form", "title"), ("json", "-")];
        assert_eq!(field_name(&tags, "form", "name", "", false).as_deref(), Some("title"));
        assert_eq!(field_name(&tags, "json", "name", "", false), None);
        assert_eq!(field_name(&[], "form", "name", "meta", false).as_deref(), Some("meta.name"));
        assert_eq!(field_name(&[], "form", "base", "meta", true).as_deref(), Some("meta"));
        assert_eq!(field_name(&[("form", "b")], "form", "base", "", true).as_deref(), Some("b"));
    }

    #[test]
    fn field_kinds() {
        let data = form(&[("n", &["7", "8"]), ("list", &["1", "2"]), ("ip", &["127.0.0.1"])]);

        let mut n = 0u32;
        n.bind_field(&data, "n").unwrap();
        assert_eq!(n, 7);

        let mut list: Vec<i16> = vec![9];
        list.bind_field(&data, "list").unwrap();
        assert_eq!(list, vec![1, 2]);

        let mut missing: Option<f64> = None;
        missing.bind_field(&data, "missing").unwrap();
        assert_eq!(missing, None);

        let mut ip: Option<std::net::IpAddr> = None;
        ip.bind_field(&data, "ip").unwrap();
        assert_eq!(ip, Some([127, 0, 0, 1].into()));
    }

    #[test]
    fn merge_json_objects_recursively() {
        let mut current = json!({"a": {"x": 1, "y": 2}, "b": [1]});
        merge_value(&mut current, json!({"a": {"y": 3}, "b": [2, 3]}));
        assert_eq!(current, json!({"a": {"x": 1, "y": 3}, "b": [2, 3]}));
    }

    #[test]
    fn parse_form_decodes_components() {
        let data = parse_form("a=1&a=2&name=John+Doe&path=%2Fx%2Fy&flag");
        assert_eq!(data["a"], vec!["1", "2"]);
        assert_eq!(data["name"], vec!["John Doe"]);
        assert_eq!(data["path"], vec!["/x/y"]);
        assert_eq!(data["flag"], vec![""]);
    }
}
