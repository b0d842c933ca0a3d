//! Fake portal shared by the integration tests
//!
//! Form bodies are decoded with the crate's own form decoder and JSON bodies
//! with `serde_json`. List methods are answered from an in-memory table of
//! deals and batch commands are run one by one, resolving `$result[...]`
//! references against earlier sub-calls the way the platform does.

#![allow(dead_code)]

use b24_client::api::params::{self, Param, Params};
use b24_client::api::{
    ClientConfig, ClientConfigBuilder, Credential, DynamicCredential, LogLevel, MemorySink,
    PlatformClient,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const HOOK: &str = "1/hook";
pub const PAGE_SIZE: usize = 50;

/// `127.0.0.1:port` of a mock server
pub fn domain(server: &MockServer) -> String {
    server.address().to_string()
}

pub fn webhook(server: &MockServer) -> Credential {
    DynamicCredential::webhook(domain(server), HOOK).into()
}

/// Plain-HTTP config without backoff pauses, logging everything
pub fn config() -> ClientConfigBuilder {
    ClientConfig::builder()
        .scheme("http")
        .backoff(Duration::ZERO, Duration::ZERO)
        .log_level(LogLevel::Debug)
}

pub fn client(config: ClientConfig) -> (PlatformClient, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let client = PlatformClient::builder(config)
        .telemetry(sink.clone())
        .build()
        .unwrap();
    (client, sink)
}

/// REST method addressed by a request path
pub fn method_name(request: &Request) -> String {
    let last = request.url.path().rsplit('/').next().unwrap_or_default();
    last.trim_end_matches(".json").to_string()
}

/// Request parameters, from a JSON or a form body
pub fn form(request: &Request) -> Params {
    if let Ok(body) = serde_json::from_slice::<Value>(&request.body) {
        return Params::from(body);
    }
    match params::decode(&String::from_utf8_lossy(&request.body)) {
        Param::Map(map) => map,
        _ => Params::new(),
    }
}

fn text(param: Option<&Param>) -> Option<String> {
    match param? {
        Param::Str(s) | Param::Raw(s) => Some(s.clone()),
        Param::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Sub-calls of a batch request as `(name, method, params)`
pub fn batch_commands(request: &Request) -> Vec<(String, String, Params)> {
    let form = form(request);
    let Some(Param::Map(cmd)) = form.get("cmd") else {
        return Vec::new();
    };
    cmd.iter()
        .filter_map(|(name, command)| {
            let command = text(Some(command))?;
            let (method, query) = command.split_once('?').unwrap_or((command.as_str(), ""));
            let params = match params::decode(query) {
                Param::Map(map) => map,
                _ => Params::new(),
            };
            Some((name.to_string(), method.to_string(), params))
        })
        .collect()
}

pub async fn requests(server: &MockServer) -> Vec<Request> {
    server.received_requests().await.unwrap_or_default()
}

pub async fn batch_requests(server: &MockServer) -> Vec<Request> {
    requests(server)
        .await
        .into_iter()
        .filter(|r| method_name(r) == "batch")
        .collect()
}

fn sql_error() -> Value {
    json!({"error": "", "error_description": "SQL query error!"})
}

fn access_denied() -> Value {
    json!({"error": "ACCESS_DENIED", "error_description": "Access denied"})
}

/// In-memory deals with IDs `1..=count`
#[derive(Clone)]
pub struct FakeCrm {
    ids: Vec<i64>,
    total_override: Option<usize>,
    /// `>ID` filters at or above this bound are refused
    deny_from: Option<i64>,
    /// Filtered requests still to be answered with `>=` instead of `>`
    inclusive_filters: Arc<AtomicUsize>,
}

impl FakeCrm {
    pub fn with_records(count: i64) -> Self {
        Self {
            ids: (1..=count).collect(),
            total_override: None,
            deny_from: None,
            inclusive_filters: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report this `total` regardless of the real row count
    pub fn total(mut self, total: usize) -> Self {
        self.total_override = Some(total);
        self
    }

    /// Refuse pages filtered on `>ID` with a bound of `bound` or more
    pub fn deny_from(mut self, bound: i64) -> Self {
        self.deny_from = Some(bound);
        self
    }

    /// Repeat the boundary record on the next `count` ID-filtered pages
    pub fn inclusive_filters(self, count: usize) -> Self {
        self.inclusive_filters.store(count, Ordering::SeqCst);
        self
    }

    fn take_inclusive(&self) -> bool {
        self.inclusive_filters
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Answer one list call with a `{result, next, total}` envelope or an item error
    pub fn list(&self, params: &Params) -> Result<Value, Value> {
        let order = params
            .get("order")
            .and_then(Param::as_map)
            .and_then(|order| text(order.get("ID")));
        let descending = order.is_some_and(|o| o.eq_ignore_ascii_case("desc"));

        let mut ids = self.ids.clone();
        if descending {
            ids.reverse();
        }

        if let Some(filter) = params.get("filter").and_then(Param::as_map) {
            for (key, value) in filter.iter() {
                match key {
                    "ID" => {
                        let wanted: Vec<i64> = match value {
                            Param::List(items) => items
                                .iter()
                                .filter_map(|v| text(Some(v))?.parse().ok())
                                .collect(),
                            other => text(Some(other))
                                .and_then(|v| v.parse().ok())
                                .into_iter()
                                .collect(),
                        };
                        ids.retain(|id| wanted.contains(id));
                    }
                    ">ID" | "<ID" => {
                        let bound: i64 = text(Some(value))
                            .and_then(|v| v.parse().ok())
                            .ok_or_else(sql_error)?;
                        if key == ">ID" && self.deny_from.is_some_and(|from| bound >= from) {
                            return Err(access_denied());
                        }
                        let inclusive = self.take_inclusive();
                        ids.retain(|&id| match (key, inclusive) {
                            (">ID", false) => id > bound,
                            (">ID", true) => id >= bound,
                            (_, false) => id < bound,
                            (_, true) => id <= bound,
                        });
                    }
                    _ => {}
                }
            }
        }

        let start = text(params.get("start")).and_then(|s| s.parse::<i64>().ok());
        let counted = start != Some(-1);
        let offset = start.unwrap_or(0).max(0) as usize;

        let page: Vec<Value> = ids
            .iter()
            .skip(offset)
            .take(PAGE_SIZE)
            .map(|id| json!({"ID": id.to_string(), "TITLE": format!("Deal {}", id)}))
            .collect();

        let mut envelope = json!({ "result": page, "time": {"operating": 0.01} });
        if counted {
            let total = self.total_override.unwrap_or(ids.len());
            envelope["total"] = json!(total);
            if offset + PAGE_SIZE < total {
                envelope["next"] = json!(offset + PAGE_SIZE);
            }
        }
        Ok(envelope)
    }
}

/// Responder for every `/rest/...` path of a portal
#[derive(Clone)]
pub struct FakePortal {
    pub crm: FakeCrm,
}

impl FakePortal {
    pub fn new(crm: FakeCrm) -> Self {
        Self { crm }
    }

    fn call(&self, method: &str, params: &Params) -> Result<Value, Value> {
        match method {
            "crm.deal.list" => self.crm.list(params),
            "crm.deal.fail" => Err(json!({
                "error": "ERROR_CORE",
                "error_description": "Deal is locked"
            })),
            _ => Ok(json!({ "result": {"method": method, "params": params.to_json()} })),
        }
    }

    fn batch(&self, form: &Params, commands: Vec<(String, String, Params)>) -> Value {
        let halt = text(form.get("halt")).as_deref() == Some("1");
        let mut results = Map::new();
        let mut errors = Map::new();
        let mut totals = Map::new();
        let mut nexts = Map::new();

        for (name, method, params) in commands {
            let outcome = match resolve(&params, &results) {
                Some(params) => self.call(&method, &params),
                None => Err(sql_error()),
            };
            match outcome {
                Ok(envelope) => {
                    results.insert(name.clone(), envelope["result"].clone());
                    if let Some(total) = envelope.get("total") {
                        totals.insert(name.clone(), total.clone());
                    }
                    if let Some(next) = envelope.get("next") {
                        nexts.insert(name.clone(), next.clone());
                    }
                }
                Err(error) => {
                    errors.insert(name, error);
                    if halt {
                        break;
                    }
                }
            }
        }

        json!({
            "result": {
                "result": results,
                "result_error": errors,
                "result_total": totals,
                "result_next": nexts,
                "result_time": {},
            },
            "time": {"operating": 0.02},
        })
    }
}

impl Respond for FakePortal {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = method_name(request);
        if method == "batch" {
            let reply = self.batch(&form(request), batch_commands(request));
            return ResponseTemplate::new(200).set_body_json(reply);
        }
        match self.call(&method, &form(request)) {
            Ok(envelope) => ResponseTemplate::new(200).set_body_json(envelope),
            Err(error) => ResponseTemplate::new(400).set_body_json(error),
        }
    }
}

pub async fn mount_portal(server: &MockServer, portal: FakePortal) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/rest/.+\.json$"))
        .respond_with(portal)
        .mount(server)
        .await;
}

/// Value at `$result[name][segment]...`, as the text the platform substitutes
fn resolve_reference(reference: &str, results: &Map<String, Value>) -> Option<String> {
    let path = reference.strip_prefix("$result[")?.strip_suffix(']')?;
    let mut segments = path.split("][");
    let mut value = results.get(segments.next()?)?;
    for segment in segments {
        value = match value {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn resolve_param(param: &Param, results: &Map<String, Value>) -> Option<Param> {
    match param {
        Param::Str(s) if s.starts_with("$result[") => {
            resolve_reference(s, results).map(Param::Str)
        }
        Param::Map(map) => resolve(map, results).map(Param::Map),
        Param::List(items) => items
            .iter()
            .map(|item| resolve_param(item, results))
            .collect::<Option<Vec<_>>>()
            .map(Param::List),
        other => Some(other.clone()),
    }
}

fn resolve(params: &Params, results: &Map<String, Value>) -> Option<Params> {
    params
        .iter()
        .map(|(key, value)| Some((key.to_string(), resolve_param(value, results)?)))
        .collect::<Option<Vec<_>>>()
        .map(|pairs| pairs.into_iter().collect())
}

/// IDs of records as integers
pub fn ids(records: &[Value]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r["ID"].as_str()?.parse().ok())
        .collect()
}
