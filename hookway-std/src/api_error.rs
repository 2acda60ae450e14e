//! # API Error Normalizer
//!
//! Converts arbitrary handler errors into one client-safe JSON envelope:
//!
//! ```json
//! {"data": {"title": {"code": "validation_required", "message": "Missing value."}},
//!  "message": "Failed to create record.",
//!  "status": 400}
//! ```
//!
//! Only structured validation errors ([`ValidationErrors`], [`SafeError`]) or
//! the data of an already normalized [`ApiError`] ever reach `data`. Any other
//! error is reduced to a generic leaf, so internal error text never leaks.

use hookway_core::{BoxError, find_source};
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

const GENERIC_CODE: &str = "validation_invalid_value";
const GENERIC_MESSAGE: &str = "Invalid value.";

const NOT_FOUND_MESSAGE: &str = "The requested resource wasn't found.";
const BAD_REQUEST_MESSAGE: &str = "Something went wrong while processing your request.";
const FORBIDDEN_MESSAGE: &str = "You are not allowed to perform this request.";
const UNAUTHORIZED_MESSAGE: &str = "Missing or invalid authentication.";
const TOO_MANY_REQUESTS_MESSAGE: &str = "Too Many Requests.";

/// The storage layer found nothing matching the query.
#[derive(thiserror::Error, Debug, Default, Clone, Copy)]
#[error("no rows in result set")]
pub struct NoRowsError;

// ============================================================================
// Validation errors
// ============================================================================

/// A leaf validation error that is safe to show to clients.
pub trait SafeError: Error + Send + Sync {
    /// Stable machine-readable error code.
    fn code(&self) -> &str;

    /// Template parameters of the message.
    fn params(&self) -> Option<Map<String, Value>> {
        None
    }

    /// Final customization of the rendered `{code, message, params}` leaf.
    fn resolve(&self, leaf: Map<String, Value>) -> Map<String, Value> {
        leaf
    }
}

/// A plain [`SafeError`] with an optional parameter map.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    code: String,
    message: String,
    params: Option<Map<String, Value>>,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            params: None,
        }
    }

    /// Attach message parameters.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ValidationError {}

impl SafeError for ValidationError {
    fn code(&self) -> &str {
        &self.code
    }

    fn params(&self) -> Option<Map<String, Value>> {
        self.params.clone()
    }
}

/// One entry of a [`ValidationErrors`] tree.
#[derive(Debug)]
pub enum FieldError {
    /// A nested error collection, e.g. for an object field.
    Nested(ValidationErrors),
    /// A client-safe leaf error.
    Safe(Box<dyn SafeError>),
    /// Any other error. Rendered as the generic leaf.
    Other(BoxError),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nested(errs) => write!(f, "({errs})"),
            Self::Safe(err) => fmt::Display::fmt(err, f),
            Self::Other(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl From<ValidationError> for FieldError {
    fn from(err: ValidationError) -> Self {
        Self::Safe(Box::new(err))
    }
}

impl From<ValidationErrors> for FieldError {
    fn from(errs: ValidationErrors) -> Self {
        Self::Nested(errs)
    }
}

impl From<BoxError> for FieldError {
    fn from(err: BoxError) -> Self {
        Self::Other(err)
    }
}

/// A field-keyed, arbitrarily nested collection of validation errors.
#[derive(Debug, Default)]
pub struct ValidationErrors(BTreeMap<String, FieldError>);

impl ValidationErrors {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the error of `field`.
    pub fn insert(&mut self, field: impl Into<String>, err: impl Into<FieldError>) {
        self.0.insert(field.into(), err.into());
    }

    /// Builder-style [`ValidationErrors::insert`].
    pub fn with(mut self, field: impl Into<String>, err: impl Into<FieldError>) -> Self {
        self.insert(field, err);
        self
    }

    /// Error of `field`, if any.
    pub fn get(&self, field: &str) -> Option<&FieldError> {
        self.0.get(field)
    }

    /// Whether the collection holds no errors.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldError)> {
        self.0.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, err)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {err}")?;
        }
        if !self.0.is_empty() {
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl Error for ValidationErrors {}

// ============================================================================
// ApiError
// ============================================================================

/// The client-facing error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Field-keyed, client-safe error details.
    pub data: Map<String, Value>,
    /// Human readable sentence.
    pub message: String,
    /// HTTP status code.
    pub status: u16,
    #[serde(skip)]
    raw: Option<Arc<dyn Error + Send + Sync>>,
}

impl ApiError {
    /// Build an envelope. An empty `message` defaults to the status text.
    ///
    /// Only validation errors found in `raw` (or the data of a wrapped
    /// `ApiError`) are copied into `data`; `raw` itself stays available via
    /// [`ApiError::raw`] and [`Error::source`].
    pub fn new(status: StatusCode, message: impl Into<String>, raw: Option<BoxError>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = status.canonical_reason().unwrap_or_default().to_string();
        }

        let raw: Option<Arc<dyn Error + Send + Sync>> = raw.map(Arc::from);
        let data = match raw.as_deref() {
            Some(err) => safe_errors_data(err),
            None => Map::new(),
        };

        Self {
            data,
            message: sentenize(&message),
            status: status.as_u16(),
            raw,
        }
    }

    /// 404 with a default "wasn't found" message.
    pub fn not_found(message: impl Into<String>, raw: Option<BoxError>) -> Self {
        Self::new(StatusCode::NOT_FOUND, or_default(message, NOT_FOUND_MESSAGE), raw)
    }

    /// 400 with a generic default message.
    pub fn bad_request(message: impl Into<String>, raw: Option<BoxError>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, or_default(message, BAD_REQUEST_MESSAGE), raw)
    }

    /// 403.
    pub fn forbidden(message: impl Into<String>, raw: Option<BoxError>) -> Self {
        Self::new(StatusCode::FORBIDDEN, or_default(message, FORBIDDEN_MESSAGE), raw)
    }

    /// 401.
    pub fn unauthorized(message: impl Into<String>, raw: Option<BoxError>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, or_default(message, UNAUTHORIZED_MESSAGE), raw)
    }

    /// 429.
    pub fn too_many_requests(message: impl Into<String>, raw: Option<BoxError>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            or_default(message, TOO_MANY_REQUESTS_MESSAGE),
            raw,
        )
    }

    /// 500. The message defaults to the same generic text as a bad request.
    pub fn internal(message: impl Into<String>, raw: Option<BoxError>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            or_default(message, BAD_REQUEST_MESSAGE),
            raw,
        )
    }

    /// The status as an [`http::StatusCode`].
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// The original, unfiltered error.
    pub fn raw(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.raw.as_deref()
    }

    /// The envelope as a JSON value.
    pub fn to_json(&self) -> Value {
        let mut envelope = Map::new();
        envelope.insert("data".into(), Value::Object(self.data.clone()));
        envelope.insert("message".into(), Value::String(self.message.clone()));
        envelope.insert("status".into(), Value::from(self.status));
        Value::Object(envelope)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.raw
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

/// Wrap any handler error into an [`ApiError`].
///
/// An `ApiError` anywhere in the source chain is returned as is. "Not found"
/// style failures become 404, everything else 400.
pub fn to_api_error(err: BoxError) -> ApiError {
    if let Some(api) = find_source::<ApiError>(&*err) {
        return api.clone();
    }

    let not_found = find_source::<NoRowsError>(&*err).is_some()
        || find_source::<io::Error>(&*err)
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound);

    if not_found {
        ApiError::not_found("", Some(err))
    } else {
        ApiError::bad_request("", Some(err))
    }
}

fn or_default(message: impl Into<String>, default: &str) -> String {
    let message = message.into();
    if message.trim().is_empty() {
        default.to_string()
    } else {
        message
    }
}

/// Trim, upper-case the first letter and terminate with a period.
fn sentenize(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let mut out = uc_first(text);
    if !out.ends_with(['.', '?', '!']) {
        out.push('.');
    }
    out
}

fn uc_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn safe_errors_data(err: &(dyn Error + 'static)) -> Map<String, Value> {
    if let Some(errs) = find_source::<ValidationErrors>(err) {
        return resolve_errors(errs);
    }
    if let Some(api) = find_source::<ApiError>(err) {
        return api.data.clone();
    }
    Map::new()
}

fn resolve_errors(errs: &ValidationErrors) -> Map<String, Value> {
    errs.iter()
        .map(|(field, err)| (field.clone(), resolve_field(err)))
        .collect()
}

fn resolve_field(err: &FieldError) -> Value {
    match err {
        FieldError::Nested(errs) => Value::Object(resolve_errors(errs)),
        FieldError::Safe(err) => Value::Object(safe_leaf(err.as_ref())),
        FieldError::Other(err) => {
            if let Some(errs) = err.downcast_ref::<ValidationErrors>() {
                Value::Object(resolve_errors(errs))
            } else if let Some(leaf) = err.downcast_ref::<ValidationError>() {
                Value::Object(safe_leaf(leaf))
            } else {
                Value::Object(generic_leaf())
            }
        }
    }
}

fn safe_leaf(err: &dyn SafeError) -> Map<String, Value> {
    let mut leaf = Map::new();
    leaf.insert("code".into(), Value::String(err.code().to_string()));
    leaf.insert("message".into(), Value::String(uc_first(&err.to_string())));
    if let Some(params) = err.params().filter(|p| !p.is_empty()) {
        leaf.insert("params".into(), Value::Object(params));
    }
    err.resolve(leaf)
}

fn generic_leaf() -> Map<String, Value> {
    let mut leaf = Map::new();
    leaf.insert("code".into(), Value::String(GENERIC_CODE.into()));
    leaf.insert("message".into(), Value::String(GENERIC_MESSAGE.into()));
    leaf
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped: {0}")]
    struct Wrapper(#[source] BoxError);

    #[derive(Debug, thiserror::Error)]
    #[error("min length is {min}")]
    struct MinLength {
        min: u64,
    }

    impl SafeError for MinLength {
        fn code(&self) -> &str {
            "validation_min_length"
        }

        fn params(&self) -> Option<Map<String, Value>> {
            let mut params = Map::new();
            params.insert("min".into(), json!(self.min));
            Some(params)
        }

        fn resolve(&self, mut leaf: Map<String, Value>) -> Map<String, Value> {
            leaf.insert("hint".into(), json!("be longer"));
            leaf
        }
    }

    #[test]
    fn message_defaults_and_sentence_form() {
        let err = ApiError::new(StatusCode::CONFLICT, "", None);
        assert_eq!(err.message, "Conflict.");
        assert_eq!(err.status, 409);

        let err = ApiError::new(StatusCode::BAD_REQUEST, "  oops  ", None);
        assert_eq!(err.message, "Oops.");

        let err = ApiError::new(StatusCode::BAD_REQUEST, "really?", None);
        assert_eq!(err.message, "Really?");

        assert_eq!(
            ApiError::not_found("", None).message,
            "The requested resource wasn't found."
        );
        assert_eq!(ApiError::too_many_requests("", None).status, 429);
    }

    #[test]
    fn nested_validation_errors_are_rendered() {
        let errs = ValidationErrors::new()
            .with("title", ValidationError::new("validation_required", "missing value"))
            .with(
                "meta",
                ValidationErrors::new()
                    .with("name", FieldError::Safe(Box::new(MinLength { min: 3 })))
                    .with("secret", FieldError::Other("db password leaked".into())),
            );

        let api = ApiError::bad_request("", Some(Box::new(Wrapper(Box::new(errs)))));
        assert_eq!(
            Value::Object(api.data),
            json!({
                "title": {"code": "validation_required", "message": "Missing value"},
                "meta": {
                    "name": {
                        "code": "validation_min_length",
                        "message": "Min length is 3",
                        "params": {"min": 3},
                        "hint": "be longer"
                    },
                    "secret": {"code": "validation_invalid_value", "message": "Invalid value."}
                }
            })
        );
    }

    #[test]
    fn unrecognized_errors_never_leak() {
        let api = ApiError::bad_request("", Some("select * from secrets".into()));
        assert!(api.data.is_empty());
        assert!(!api.to_json().to_string().contains("secrets"));
        assert!(api.raw().is_some());
    }

    #[test]
    fn to_api_error_classification() {
        let api = to_api_error(Box::new(NoRowsError));
        assert_eq!(api.status, 404);

        let io = io::Error::new(io::ErrorKind::NotFound, "missing file");
        assert_eq!(to_api_error(Box::new(Wrapper(Box::new(io)))).status, 404);

        let api = to_api_error("anything".into());
        assert_eq!(api.status, 400);
        assert_eq!(
            api.message,
            "Something went wrong while processing your request."
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let errs = ValidationErrors::new().with("a", ValidationError::new("c", "m"));
        let first = ApiError::forbidden("nope", Some(Box::new(errs)));
        let expected = first.to_json();

        let again = to_api_error(Box::new(Wrapper(Box::new(first.clone()))));
        assert_eq!(again.to_json(), expected);

        let rewrapped = ApiError::new(
            first.status_code(),
            first.message.clone(),
            Some(Box::new(first)),
        );
        assert_eq!(rewrapped.to_json(), expected);
    }
}
