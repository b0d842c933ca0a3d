//! Batch executor
//!
//! Packs named sub-calls into physical `batch` calls of at most
//! `chunk_size` commands each and reassembles one ordered result set.
//! An expired token anywhere restarts the whole operation from the first
//! chunk after a refresh, so every chunk runs under the same token.

use super::operation::{BatchItem, SubCall};
use super::operations::SubCalls;
use crate::api::client::{PlatformClient, as_u64, preview};
use crate::api::constants::{self, envelope, params as param_keys};
use crate::api::error::{ApiError, BatchFailure, Error, Result};
use crate::api::auth::Credential;
use crate::api::params::{Param, Params};
use crate::api::transport::RawResponse;
use serde_json::{Map, Value};
use std::time::Duration;

/// Options of one batch operation
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Stop executing the remaining sub-calls of a chunk after the first error
    pub halt: bool,
    /// Sub-calls per physical call, 1 to 50
    pub chunk_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            halt: false,
            chunk_size: constants::MAX_BATCH_SIZE,
            timeout: None,
        }
    }
}

impl BatchOptions {
    pub fn halting() -> Self {
        Self {
            halt: true,
            ..Self::default()
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Name-keyed outcome of a batch, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResultSet {
    entries: Vec<(String, BatchItem)>,
}

impl BatchResultSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&BatchItem> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, item)| item)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BatchItem)> {
        self.entries.iter().map(|(n, item)| (n.as_str(), item))
    }

    pub fn all_ok(&self) -> bool {
        self.iter_errors().next().is_none()
    }

    pub fn iter_errors(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter_map(|(n, item)| item.error.as_ref().map(|e| (n.as_str(), e)))
    }

    pub fn errors(&self) -> Vec<(String, Value)> {
        self.iter_errors()
            .map(|(n, e)| (n.to_string(), e.clone()))
            .collect()
    }

    pub fn iter_successes(&self) -> impl Iterator<Item = (&str, &BatchItem)> {
        self.iter().filter(|(_, item)| item.is_ok())
    }

    pub fn successes(&self) -> Vec<(String, BatchItem)> {
        self.iter_successes()
            .map(|(n, item)| (n.to_string(), item.clone()))
            .collect()
    }

    /// JSON object keyed by sub-call name
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(name, item)| {
                let value = serde_json::json!({
                    "result": item.result,
                    "error": item.error,
                    "time": item.time,
                    "total": item.total,
                    "next": item.next,
                });
                (name.clone(), value)
            })
            .collect();
        Value::Object(map)
    }

    fn push(&mut self, name: String, item: BatchItem) {
        self.entries.push((name, item));
    }
}

impl IntoIterator for BatchResultSet {
    type Item = (String, BatchItem);
    type IntoIter = std::vec::IntoIter<(String, BatchItem)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Keys of a chunk reply that hold per-item maps
const ITEM_MAPS: [&str; 5] = [
    envelope::RESULT,
    envelope::RESULT_ERROR,
    envelope::RESULT_TIME,
    envelope::RESULT_TOTAL,
    envelope::RESULT_NEXT,
];

/// Turn the `result` of a chunk reply into uniform per-item maps.
///
/// The platform's serializer sends `[]` for an empty map and a list for a
/// map keyed `0..n`; both become objects, and missing maps become empty.
pub(crate) fn normalize_chunk(result: &Value) -> Map<String, Value> {
    let mut normalized = Map::new();
    for key in ITEM_MAPS {
        let map = match result.get(key) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            _ => Map::new(),
        };
        normalized.insert(key.to_string(), Value::Object(map));
    }
    normalized
}

fn item_for(normalized: &Map<String, Value>, name: &str) -> BatchItem {
    let lookup = |key: &str| {
        normalized
            .get(key)
            .and_then(|map| map.get(name))
            .filter(|v| !v.is_null())
            .cloned()
    };
    BatchItem {
        result: lookup(envelope::RESULT),
        error: lookup(envelope::RESULT_ERROR),
        time: lookup(envelope::RESULT_TIME),
        total: lookup(envelope::RESULT_TOTAL).as_ref().and_then(as_u64),
        next: lookup(envelope::RESULT_NEXT).as_ref().and_then(as_u64),
    }
}

/// Highest operating time reported by a chunk reply
fn chunk_operating(reply: &Value, normalized: &Map<String, Value>) -> f64 {
    let items = normalized
        .get(envelope::RESULT_TIME)
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|times| times.values())
        .filter_map(|t| t.get(envelope::OPERATING).and_then(Value::as_f64));
    let total = reply
        .get(envelope::TIME)
        .and_then(|t| t.get(envelope::OPERATING))
        .and_then(Value::as_f64);
    items.chain(total).fold(0.0, f64::max)
}

impl PlatformClient {
    fn decode_chunk(&self, response: &RawResponse, domain: &str) -> Result<Value> {
        let reply = match response.json() {
            Some(reply @ Value::Object(_)) => reply,
            _ => {
                self.logger().batch_non_json(response.status, &preview(&response.body));
                return Err(BatchFailure::Undecodable {
                    status: response.status,
                    body: preview(&response.body),
                }
                .into());
            }
        };

        match reply.get(envelope::ERROR) {
            Some(Value::Null) | None => Ok(reply),
            Some(Value::String(code)) if code.is_empty() => Ok(reply),
            Some(Value::String(code)) if code == envelope::EXPIRED_TOKEN => {
                Err(Error::ExpiredToken {
                    domain: domain.to_string(),
                })
            }
            Some(_) => Err(BatchFailure::Rejected(ApiError::from_envelope(response.status, &reply)).into()),
        }
    }

    async fn run_chunks(
        &self,
        credential: &Credential,
        commands: &[(String, String)],
        methods: &str,
        options: &BatchOptions,
    ) -> Result<BatchResultSet> {
        let mut results = BatchResultSet::default();

        for chunk in commands.chunks(options.chunk_size) {
            let cmd: Params = chunk
                .iter()
                .map(|(name, command)| (name.clone(), Param::raw(command.clone())))
                .collect();
            let params = Params::new()
                .with(param_keys::CMD, cmd)
                .with(param_keys::HALT, i64::from(options.halt));

            let response = self
                .execute_raw(credential, constants::BATCH_METHOD, &params, options.timeout)
                .await?;
            let reply = self.decode_chunk(&response, credential.domain())?;
            let normalized = normalize_chunk(reply.get(envelope::RESULT).unwrap_or(&Value::Null));

            for (name, _) in chunk {
                results.push(name.clone(), item_for(&normalized, name));
            }

            let operating = chunk_operating(&reply, &normalized);
            if operating > constants::OPERATING_THRESHOLD {
                self.logger().method_operating(
                    credential.domain(),
                    &format!("batch({})", methods),
                    operating,
                );
                if self.config().batch.throttle_on_operating {
                    let pause = operating - constants::OPERATING_THRESHOLD;
                    tokio::time::sleep(Duration::from_secs_f64(pause)).await;
                }
            }
        }

        Ok(results)
    }

    /// Execute sub-calls as one logical batch.
    ///
    /// Names are checked before any request is sent. A per-item platform
    /// error lands in the result set; a chunk that cannot be decoded or is
    /// rejected as a whole fails the operation.
    pub async fn batch(
        &self,
        credential: &mut Credential,
        calls: impl Into<SubCalls>,
        options: &BatchOptions,
    ) -> Result<BatchResultSet> {
        let max = self.config().batch.max_chunk_size.min(constants::MAX_BATCH_SIZE);
        if options.chunk_size < 1 || options.chunk_size > max {
            return Err(Error::usage(format!(
                "chunk_size must be within the range [1, {}]",
                max
            )));
        }

        let named = calls.into().normalize()?;
        if named.is_empty() {
            return Ok(BatchResultSet::default());
        }

        let format = self.config().body_format;
        let commands: Vec<(String, String)> = named
            .iter()
            .map(|(name, call)| (name.clone(), call.command(format)))
            .collect();
        let methods = method_summary(named.iter().map(|(_, call)| call));

        let mut refreshed = false;
        loop {
            match self.run_chunks(credential, &commands, &methods, options).await {
                Err(e) if e.is_expired_token() && !refreshed => {
                    if !self.try_refresh(credential, options.timeout).await {
                        return Err(e);
                    }
                    refreshed = true;
                }
                other => return other,
            }
        }
    }
}

fn method_summary<'a>(calls: impl Iterator<Item = &'a SubCall>) -> String {
    let mut methods: Vec<&str> = calls.map(|c| c.method.as_str()).collect();
    methods.sort_unstable();
    methods.dedup();
    methods.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_lists_to_maps() {
        let result = json!({
            "result": ["a", "b"],
            "result_error": [],
            "result_total": {"x": 5},
        });
        let normalized = normalize_chunk(&result);

        assert_eq!(normalized["result"], json!({"0": "a", "1": "b"}));
        assert_eq!(normalized["result_error"], json!({}));
        assert_eq!(normalized["result_time"], json!({}));
        assert_eq!(normalized["result_next"], json!({}));
        assert_eq!(normalized["result_total"], json!({"x": 5}));
    }

    #[test]
    fn test_item_uses_result_next() {
        let normalized = normalize_chunk(&json!({
            "result": {"page": [1, 2]},
            "result_total": {"page": 120},
            "result_next": {"page": 100},
        }));
        let item = item_for(&normalized, "page");
        assert_eq!(item.total, Some(120));
        assert_eq!(item.next, Some(100));
        assert_eq!(item.result, Some(json!([1, 2])));
        assert!(item.is_ok());
    }

    #[test]
    fn test_chunk_operating_takes_maximum() {
        let reply = json!({"time": {"operating": 120.0}});
        let normalized = normalize_chunk(&json!({
            "result_time": {"a": {"operating": 310.5}, "b": {"operating": 2.0}},
        }));
        assert_eq!(chunk_operating(&reply, &normalized), 310.5);
        assert_eq!(chunk_operating(&json!({}), &normalize_chunk(&json!({}))), 0.0);
    }

    #[test]
    fn test_result_set_views() {
        let mut set = BatchResultSet::default();
        set.push("a".into(), BatchItem { result: Some(json!(1)), ..BatchItem::default() });
        set.push("b".into(), BatchItem { error: Some(json!({"error": "X"})), ..BatchItem::default() });

        assert!(!set.all_ok());
        assert_eq!(set.errors(), vec![("b".to_string(), json!({"error": "X"}))]);
        assert_eq!(set.successes().len(), 1);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.to_json()["a"]["result"], 1);
    }

    #[test]
    fn test_method_summary() {
        let calls = [
            SubCall::new("user.get", Params::new()),
            SubCall::new("crm.deal.list", Params::new()),
            SubCall::new("user.get", Params::new()),
        ];
        assert_eq!(method_summary(calls.iter()), "crm.deal.list, user.get");
    }
}
