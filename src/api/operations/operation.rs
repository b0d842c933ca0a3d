//! A single logical call packed into a batch

use crate::api::params::{Params, encode_params, quote};
use crate::api::resilience::BodyFormat;
use serde_json::Value;

/// One sub-call of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct SubCall {
    /// Explicit name, or `None` for a positional `data_N` name
    pub name: Option<String>,
    pub method: String,
    pub params: Params,
}

impl SubCall {
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self {
            name: None,
            method: method.into(),
            params,
        }
    }

    pub fn named(name: impl Into<String>, method: impl Into<String>, params: Params) -> Self {
        Self {
            name: Some(name.into()),
            method: method.into(),
            params,
        }
    }

    /// Build from JSON: `["method", {params}]` or `["name", "method", {params}]`
    pub fn from_json(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        match items.as_slice() {
            [Value::String(method)] => Some(Self::new(method.clone(), Params::new())),
            [Value::String(method), params] => {
                Some(Self::new(method.clone(), Params::from(params.clone())))
            }
            [Value::String(name), Value::String(method), params] => Some(Self::named(
                name.clone(),
                method.clone(),
                Params::from(params.clone()),
            )),
            _ => None,
        }
    }

    /// Encode as a batch command string (`method?query`)
    pub fn command(&self, format: BodyFormat) -> String {
        let query = encode_params(&self.params);
        match format {
            // The whole command is a single form value, so `&` must be escaped once more
            BodyFormat::Form => format!("{}?{}", self.method, quote(&query, "[]=")),
            BodyFormat::Json => format!("{}?{}", self.method, query),
        }
    }
}

/// Outcome of one sub-call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchItem {
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub time: Option<Value>,
    pub total: Option<u64>,
    pub next: Option<u64>,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Per-item error as an [`ApiError`](crate::api::ApiError).
    ///
    /// Sub-calls carry no HTTP status of their own and are reported as 400.
    pub fn api_error(&self) -> Option<crate::api::ApiError> {
        let error = self.error.as_ref()?;
        Some(match error {
            Value::Object(_) => crate::api::ApiError::from_envelope(400, error),
            Value::String(code) => crate::api::ApiError::new(400, code.clone(), ""),
            other => crate::api::ApiError::new(400, other.to_string(), ""),
        })
    }
}
