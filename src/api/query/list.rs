//! Standard list aggregator
//!
//! Fetches the first page with a plain call and, when `next` shows there is
//! more, requests every remaining page in one halting batch. Results are
//! merged in page order.

use crate::api::auth::Credential;
use crate::api::client::PlatformClient;
use crate::api::constants::{self, UNSUPPORTED_LIST_METHOD, WEIRD_PAGINATION_METHODS, params as param_keys};
use crate::api::error::{Error, Result};
use crate::api::operations::{BatchOptions, BatchResultSet, SubCall, SubCalls};
use crate::api::params::{Param, Params};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Options of one list fetch
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Fetch at most this many records
    pub limit: Option<usize>,
    /// Accepted difference between the fetched length and the initial `total`
    pub allowable_error: Option<usize>,
    /// Sub-calls per physical batch call
    pub batch_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: None,
            allowable_error: None,
            batch_size: constants::MAX_BATCH_SIZE,
            timeout: None,
        }
    }
}

impl ListOptions {
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn allowable_error(mut self, allowable: usize) -> Self {
        self.allowable_error = Some(allowable);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Reject methods that cannot be paginated
pub fn check_params(method: &str) -> Result<()> {
    if method.eq_ignore_ascii_case(UNSUPPORTED_LIST_METHOD) {
        return Err(Error::usage(format!(
            "{} is a box-only method without pagination; use tasks.task.list",
            method
        )));
    }
    Ok(())
}

fn is_weird(method: &str) -> bool {
    let method = method.to_lowercase();
    WEIRD_PAGINATION_METHODS.contains(&method.as_str())
}

/// Parameters for the page starting at `next_step`.
///
/// Most methods take `start`. The task methods that page with positional
/// `NAV_PARAMS` get their parameter slots filled and the navigation block
/// placed where the method expects it.
pub fn next_params(method: &str, params: &Params, next_step: usize, page_size: usize) -> Result<Params> {
    if !is_weird(method) {
        return Ok(params.clone().with(param_keys::START, next_step));
    }

    let nav = Params::new()
        .with("nPageSize", page_size)
        .with("iNumPage", next_step / page_size.max(1) + 1);
    let mut params = params.clone();
    params.remove("PARAMS");

    match method.to_lowercase().as_str() {
        "task.item.list" => {
            // ORDER, FILTER, PARAMS, SELECT
            if params.len() < 1 {
                params.insert("ORDER", Params::new());
            }
            if params.len() < 2 {
                params.insert("FILTER", Params::new());
            }
            if params.len() > 3 {
                return Err(Error::usage(format!(
                    "{} takes at most ORDER, FILTER and SELECT; PARAMS is set by the client",
                    method
                )));
            }
            let select = if params.len() == 3 { params.pop() } else { None };
            params.insert("PARAMS", Params::new().with("NAV_PARAMS", nav));
            if let Some((_, select)) = select {
                params.insert("SELECT", select);
            }
        }
        "task.items.getlist" => {
            // ORDER, FILTER, TASKDATA, NAV_PARAMS
            if params.len() < 1 {
                params.insert("ORDER", Params::new().with("ID", "asc"));
            }
            if params.len() < 2 {
                params.insert("FILTER", Params::new());
            }
            if params.len() < 3 {
                params.insert("TASKDATA", vec!["ID", "TITLE"]);
            }
            while params.len() > 3 {
                params.pop();
            }
            params.insert("NAV_PARAMS", Params::new().with("NAV_PARAMS", nav));
        }
        _ => {
            // [TASKID], ORDER, FILTER, SELECT, PARAMS
            let optional = match params.values().next() {
                Some(Param::Int(_) | Param::Str(_)) => 1,
                _ => 0,
            };
            let required = |p: &Params| p.len() - optional.min(p.len());
            if required(&params) < 1 {
                params.insert("ORDER", Params::new().with("ID", "ASC"));
            }
            if required(&params) < 2 {
                params.insert("FILTER", Params::new());
            }
            if required(&params) < 3 {
                params.insert("SELECT", vec!["*"]);
            }
            while required(&params) > 3 {
                params.pop();
            }
            params.insert("PARAMS", Params::new().with("NAV_PARAMS", nav));
        }
    }
    Ok(params)
}

/// Records of one page, unwrapped from the method's wrapper key
pub fn page_records(method: &str, result: &Value) -> Result<Vec<Value>> {
    let result = match constants::method_wrapper(method) {
        Some(wrapper) => match result {
            Value::Object(map) => match map.get(wrapper) {
                Some(inner) => inner,
                None => {
                    return Err(Error::MalformedResponse {
                        status: 200,
                        message: format!("{} result has no `{}` key", method, wrapper),
                    });
                }
            },
            other => other,
        },
        None => result,
    };
    Ok(match result {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map.values().cloned().collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    })
}

/// Concatenate the pages of a halting batch; the first failed page aborts
fn merge_batch(method: &str, batch: &BatchResultSet, records: &mut Vec<Value>) -> Result<()> {
    for (_, item) in batch.iter() {
        if let Some(error) = item.api_error() {
            return Err(Error::Api(error));
        }
        if let Some(result) = &item.result {
            records.extend(page_records(method, result)?);
        }
    }
    Ok(())
}

/// `{filter: {ID: [..]}}`, optionally with `select`, and nothing else
fn id_list(params: &Params) -> Option<(&Vec<Param>, Option<&Param>)> {
    let filter = params.get("filter")?.as_map()?;
    let only_known_keys = params.keys().all(|k| k == "filter" || k == "select");
    if !only_known_keys || filter.len() != 1 {
        return None;
    }
    match filter.get("ID")? {
        Param::List(ids) => Some((ids, params.get("select"))),
        _ => None,
    }
}

impl PlatformClient {
    /// Fetch every record of a paginated list method.
    pub async fn list(
        &self,
        credential: &mut Credential,
        method: &str,
        params: Params,
        options: &ListOptions,
    ) -> Result<Vec<Value>> {
        check_params(method)?;
        if options.batch_size < 1 || options.batch_size > constants::MAX_BATCH_SIZE {
            return Err(Error::usage(format!(
                "batch_size must be within the range [1, {}]",
                constants::MAX_BATCH_SIZE
            )));
        }
        let batch_options = BatchOptions::halting()
            .chunk_size(options.batch_size)
            .timeout(options.timeout);

        if let Some((ids, select)) = id_list(&params) {
            return self
                .list_by_ids(credential, method, ids, select, &batch_options)
                .await;
        }

        let started = Instant::now();
        let page_size = self.config().batch.page_size;
        let params = if is_weird(method) {
            next_params(method, &params, 0, page_size)?
        } else {
            params
        };

        let first = self
            .call_with_timeout(credential, method, params.clone(), options.timeout)
            .await?;
        let mut records = page_records(method, &first.result)?;
        let initial_total = first.total.unwrap_or(0) as usize;
        let total = match options.limit {
            Some(limit) => limit.min(initial_total),
            None => initial_total,
        };

        let mut pages = 0;
        if let Some(next) = first.next.map(|n| n as usize) {
            if total > 0 && next < total {
                let mut calls = SubCalls::new();
                let mut offset = next;
                while offset < total {
                    calls.push(SubCall::new(method, next_params(method, &params, offset, page_size)?));
                    offset += page_size;
                }
                pages = calls.len();

                let batch = self.batch(credential, calls, &batch_options).await?;
                merge_batch(method, &batch, &mut records)?;
            }
        }

        let elapsed = started.elapsed();
        if pages > 0 && elapsed.as_millis() > constants::LIST_SLOW_THRESHOLD_MS {
            self.logger().list_slow(method, pages, elapsed);
        }

        match options.limit {
            Some(limit) => records.truncate(limit),
            None => {
                if let Some(allowable) = options.allowable_error {
                    let difference = records.len().abs_diff(initial_total);
                    if difference > allowable {
                        self.logger()
                            .list_length_error(initial_total, records.len(), allowable);
                        return Err(Error::ListLengthMismatch {
                            total: initial_total,
                            fetched: records.len(),
                            difference,
                            allowable,
                        });
                    }
                }
            }
        }

        Ok(records)
    }

    /// Fetch records by an explicit ID list, `batch_size` IDs per sub-call
    async fn list_by_ids(
        &self,
        credential: &mut Credential,
        method: &str,
        ids: &[Param],
        select: Option<&Param>,
        batch_options: &BatchOptions,
    ) -> Result<Vec<Value>> {
        let calls: SubCalls = ids
            .chunks(batch_options.chunk_size)
            .map(|chunk| {
                let mut params =
                    Params::new().with("filter", Params::new().with("ID", Param::List(chunk.to_vec())));
                if let Some(select) = select {
                    params.insert("select", select.clone());
                }
                SubCall::new(method, params)
            })
            .collect();

        let batch = self.batch(credential, calls, batch_options).await?;
        let mut records = Vec::new();
        merge_batch(method, &batch, &mut records)?;
        Ok(records)
    }
}
