//! Cursor-pipelined listing
//!
//! Instead of offset paging, every sub-call of a batch filters on the last ID
//! returned by the sub-call before it (`filter[>ID]=$result[req_0][49][ID]`),
//! so one round trip fetches up to `batch_size` pages and the platform never
//! has to count rows. Records come back as a stream in ID order.

use crate::api::auth::Credential;
use crate::api::client::PlatformClient;
use crate::api::constants::{self, params as param_keys};
use crate::api::error::{ApiError, Error, Result};
use crate::api::operations::{BatchOptions, BatchResultSet, SubCalls};
use crate::api::params::Params;
use crate::api::query::cursor::{ListCursor, Observation};
use crate::api::query::registry::Capability;
use futures::stream::{self, Stream};
use log::debug;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Options of one fast list fetch
#[derive(Debug, Clone)]
pub struct FastListOptions {
    /// Walk IDs from the highest down
    pub descending: bool,
    /// Stop after this many records
    pub limit: Option<usize>,
    /// Pages requested per round trip
    pub batch_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for FastListOptions {
    fn default() -> Self {
        Self {
            descending: false,
            limit: None,
            batch_size: constants::MAX_BATCH_SIZE,
            timeout: None,
        }
    }
}

impl FastListOptions {
    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Errors that mean "no more rows" rather than a failed request.
///
/// Filtering past the last ID makes some methods fail their SQL, and
/// `crm.item.list` rejects the filter outright.
fn is_end_of_data(method: &str, error: &ApiError) -> bool {
    let text = format!("{} {}", error.code, error.description).to_lowercase();
    text.contains("sql query error")
        || (method.eq_ignore_ascii_case("crm.item.list") && text.contains("invalid filter"))
}

/// Reject caller parameters that would clash with the ones the engine sets
fn check_caller_params(capability: &Capability, params: &Params) -> Result<()> {
    let engine_keys = capability.engine_keys();
    for key in params.keys() {
        for engine_key in &engine_keys {
            if key == *engine_key {
                if *engine_key == "filter" {
                    continue;
                }
                return Err(Error::usage(format!(
                    "method doesn't support sort/order: `{}` is set by fast listing",
                    key
                )));
            }
            if key.eq_ignore_ascii_case(engine_key) {
                return Err(Error::usage(format!(
                    "parameter `{}` clashes with `{}`; use lowercase keys",
                    key, engine_key
                )));
            }
        }
    }
    Ok(())
}

struct FastList<'a> {
    client: &'a PlatformClient,
    credential: &'a mut Credential,
    method: &'a str,
    capability: Capability,
    /// Caller params merged with the order block and `start=-1`
    base: Params,
    options: FastListOptions,
    page_size: usize,
    cursor: ListCursor,
    buffer: VecDeque<Value>,
    /// Sub-call error raised once the records before it are drained
    failure: Option<Error>,
    yielded: usize,
    finished: bool,
}

impl FastList<'_> {
    fn sub_calls(&self) -> Result<SubCalls> {
        let mut calls = SubCalls::new();
        for index in 0..self.options.batch_size {
            let mut params = self.base.clone();
            let filter = self.capability.filter_params(
                index,
                self.cursor.last_seen_id(),
                self.options.descending,
                self.page_size,
            );
            params.merge(filter).map_err(Error::Usage)?;
            calls = calls.named(format!("req_{}", index), self.method, params);
        }
        Ok(calls)
    }

    /// Request the next round of pages and buffer every new record
    async fn fetch(&mut self) -> Result<()> {
        let calls = self.sub_calls()?;
        debug!(
            "fast list {}: {} pages after id {:?}",
            self.method,
            calls.len(),
            self.cursor.last_seen_id()
        );
        let options = BatchOptions::halting()
            .chunk_size(self.options.batch_size)
            .timeout(self.options.timeout);
        let batch = self.client.batch(self.credential, calls, &options).await?;
        self.absorb(&batch)
    }

    fn absorb(&mut self, batch: &BatchResultSet) -> Result<()> {
        let before = self.buffer.len();

        for (_, item) in batch.iter() {
            if let Some(error) = item.api_error() {
                if is_end_of_data(self.method, &error) {
                    debug!("fast list {}: end of data ({})", self.method, error);
                    self.finished = true;
                    break;
                }
                self.failure = Some(Error::Api(error));
                self.finished = true;
                break;
            }

            let Some(records) = item.result.as_ref().and_then(|r| self.capability.records(r)) else {
                self.finished = true;
                break;
            };

            for record in records {
                let id = self.capability.record_id(record).ok_or_else(|| Error::MalformedResponse {
                    status: 200,
                    message: format!(
                        "{} record without `{}`",
                        self.method, self.capability.id_field
                    ),
                })?;
                match self.cursor.observe(id) {
                    Observation::Yield => self.buffer.push_back(record.clone()),
                    Observation::SkipDuplicate => {
                        debug!("fast list {}: skipping duplicate id {}", self.method, id)
                    }
                    Observation::Stop => {
                        debug!("fast list {}: cursor stopped at id {}", self.method, id);
                        self.finished = true;
                        return Ok(());
                    }
                }
            }

            if records.len() < self.page_size {
                self.finished = true;
                break;
            }
        }

        // A round that adds nothing cannot move the cursor
        if self.buffer.len() == before {
            self.finished = true;
        }
        Ok(())
    }
}

async fn next_record<'a>(mut state: FastList<'a>) -> Result<Option<(Value, FastList<'a>)>> {
    loop {
        if state.options.limit.is_some_and(|limit| state.yielded >= limit) {
            return Ok(None);
        }
        if let Some(record) = state.buffer.pop_front() {
            state.yielded += 1;
            return Ok(Some((record, state)));
        }
        if let Some(error) = state.failure.take() {
            return Err(error);
        }
        if state.finished {
            return Ok(None);
        }
        state.fetch().await?;
    }
}

impl PlatformClient {
    /// Stream every record of a registered list method in ID order.
    ///
    /// Parameters are checked before anything is sent; the stream then
    /// requests `batch_size` pages per round trip until a page comes back
    /// short, the platform signals the end of the data, or the cursor sees
    /// IDs repeat or go backwards. When a sub-call fails, the records of
    /// the sub-calls before it are yielded ahead of the error.
    pub fn fast_list<'a>(
        &'a self,
        credential: &'a mut Credential,
        method: &'a str,
        params: Params,
        options: FastListOptions,
    ) -> Result<impl Stream<Item = Result<Value>> + 'a> {
        let capability = self.registry().get(method)?.clone();
        check_caller_params(&capability, &params)?;

        let max = self.config().batch.max_chunk_size.min(constants::MAX_BATCH_SIZE);
        if options.batch_size < 1 || options.batch_size > max {
            return Err(Error::usage(format!(
                "batch_size must be within the range [1, {}]",
                max
            )));
        }

        let mut base = params;
        base.merge(capability.order_params(options.descending))
            .map_err(Error::Usage)?;
        base.insert(param_keys::START, -1);

        let state = FastList {
            client: self,
            credential,
            method,
            cursor: ListCursor::new(options.descending, self.config().fast_list.max_duplicates),
            page_size: self.config().batch.page_size,
            finished: options.limit == Some(0),
            capability,
            base,
            options,
            buffer: VecDeque::new(),
            failure: None,
            yielded: 0,
        };

        Ok(stream::try_unfold(state, |state| next_record(state)))
    }
}
