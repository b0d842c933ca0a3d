//! Methods that support cursor-pipelined listing
//!
//! Each entry describes how a list method sorts, how it filters by ID, where
//! the ID sits in a record and which key wraps the record list. Methods
//! missing from the registry cannot be fast-listed.

use crate::api::constants::method_wrapper;
use crate::api::error::{Error, Result};
use crate::api::params::{Param, Params};
use serde_json::Value;
use std::collections::HashMap;

/// Shape of the sort parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRule {
    /// `{order: {FIELD: ASC|DESC}}`
    Field(&'static str),
    /// `{order: ASC|DESC, sort: FIELD}`
    Flat(&'static str),
}

/// Per-method rules for cursor listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub order: OrderRule,
    /// Field name used in the `>ID` / `<ID` filter
    pub filter_field: &'static str,
    /// Field holding the ID in a returned record
    pub id_field: &'static str,
    /// Key wrapping the record list in `result`
    pub wrapper: Option<&'static str>,
}

fn direction(descending: bool) -> &'static str {
    if descending { "DESC" } else { "ASC" }
}

impl Capability {
    /// Most methods: `order[ID]`, `filter[>ID]`, `record["ID"]`
    pub const fn upper() -> Self {
        Self {
            order: OrderRule::Field("ID"),
            filter_field: "ID",
            id_field: "ID",
            wrapper: None,
        }
    }

    /// Newer methods with lowercase `id` everywhere
    pub const fn lower() -> Self {
        Self {
            order: OrderRule::Field("id"),
            filter_field: "id",
            id_field: "id",
            wrapper: None,
        }
    }

    pub fn wrapped(mut self, wrapper: Option<&'static str>) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn order_params(&self, descending: bool) -> Params {
        match self.order {
            OrderRule::Field(field) => {
                Params::new().with("order", Params::new().with(field, direction(descending)))
            }
            OrderRule::Flat(field) => Params::new()
                .with("order", direction(descending))
                .with("sort", field),
        }
    }

    /// Filter for sub-call `index` of a pipelined batch.
    ///
    /// Sub-call 0 filters on the last ID seen by the client (nothing on the
    /// very first batch). Every later sub-call filters on the last record of
    /// the previous sub-call, resolved by the platform.
    pub fn filter_params(
        &self,
        index: usize,
        last_id: Option<i64>,
        descending: bool,
        page_size: usize,
    ) -> Params {
        let key = format!("{}{}", if descending { "<" } else { ">" }, self.filter_field);
        if index == 0 {
            return match last_id {
                Some(id) => Params::new().with("filter", Params::new().with(key, id)),
                None => Params::new(),
            };
        }
        let mut path = format!("$result[req_{}]", index - 1);
        if let Some(wrapper) = self.wrapper {
            path.push_str(&format!("[{}]", wrapper));
        }
        let reference = format!("{}[{}][{}]", path, page_size.saturating_sub(1), self.id_field);
        Params::new().with("filter", Params::new().with(key, Param::raw(reference)))
    }

    /// Top-level keys this capability adds to a request
    pub fn engine_keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["order", "filter", "start"];
        if matches!(self.order, OrderRule::Flat(_)) {
            keys.push("sort");
        }
        keys
    }

    /// Records of one page
    pub fn records<'a>(&self, result: &'a Value) -> Option<&'a Vec<Value>> {
        match self.wrapper {
            Some(wrapper) => result.get(wrapper)?.as_array(),
            None => result.as_array(),
        }
    }

    /// Record ID; the platform sends IDs as strings or numbers
    pub fn record_id(&self, record: &Value) -> Option<i64> {
        match record.get(self.id_field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Map from method name to its [`Capability`]
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Capability>,
}

impl MethodRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every method known to support ID cursors
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for method in [
            "crm.deal.list",
            "crm.lead.list",
            "crm.contact.list",
            "crm.company.list",
            "crm.product.list",
            "crm.productrow.list",
            "crm.activity.list",
            "crm.requisite.list",
            "crm.quote.list",
            "crm.invoice.list",
            "crm.stagehistory.list",
            "lists.element.get",
            "user.get",
        ] {
            registry.register(method, Capability::upper().wrapped(method_wrapper(method)));
        }
        for method in [
            "crm.item.list",
            "catalog.product.list",
            "catalog.product.offer.list",
            "rpa.item.list",
        ] {
            registry.register(method, Capability::lower().wrapped(method_wrapper(method)));
        }
        // Tasks filter on `ID` but return `id`
        registry.register(
            "tasks.task.list",
            Capability {
                id_field: "id",
                ..Capability::upper()
            }
            .wrapped(method_wrapper("tasks.task.list")),
        );
        registry.register(
            "voximplant.statistic.get",
            Capability {
                order: OrderRule::Flat("ID"),
                ..Capability::upper()
            },
        );
        registry
    }

    pub fn register(&mut self, method: impl Into<String>, capability: Capability) {
        self.methods.insert(method.into(), capability);
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn get(&self, method: &str) -> Result<&Capability> {
        self.methods
            .get(method)
            .ok_or_else(|| Error::usage(format!("method {} does not support fast listing", method)))
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}
