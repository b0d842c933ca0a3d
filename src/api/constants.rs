//! API Constants and Configuration for the Bitrix24 REST API

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// REST path prefix on every portal
pub const REST_PATH: &str = "rest";

/// Synthetic method name of the batch endpoint
pub const BATCH_METHOD: &str = "batch";

/// Maximum number of sub-calls the batch endpoint accepts in one request
pub const MAX_BATCH_SIZE: usize = 50;

/// Fixed page size of list methods
pub const PAGE_SIZE: usize = 50;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// OAuth endpoint used to exchange a refresh token
pub const OAUTH_TOKEN_URL: &str = "https://oauth.bitrix.info/oauth/token/";

/// Platform-reported operating time above which a call is logged (and batches throttled)
pub const OPERATING_THRESHOLD: f64 = 300.0;

/// Operating time above which the log level is raised to warn
pub const OPERATING_WARN_THRESHOLD: f64 = 400.0;

/// List fetches that took longer than this (in milliseconds) are logged
pub const LIST_SLOW_THRESHOLD_MS: u128 = 2000;

/// Envelope keys
pub mod envelope {
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const ERROR_DESCRIPTION: &str = "error_description";
    pub const TIME: &str = "time";
    pub const OPERATING: &str = "operating";
    pub const NEXT: &str = "next";
    pub const TOTAL: &str = "total";

    pub const RESULT_ERROR: &str = "result_error";
    pub const RESULT_TIME: &str = "result_time";
    pub const RESULT_TOTAL: &str = "result_total";
    pub const RESULT_NEXT: &str = "result_next";

    /// Error code the platform uses for an expired access token
    pub const EXPIRED_TOKEN: &str = "expired_token";
}

/// Request parameter names injected by the client
pub mod params {
    pub const AUTH: &str = "auth";
    pub const CMD: &str = "cmd";
    pub const HALT: &str = "halt";
    pub const START: &str = "start";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// Methods that page with positional NAV_PARAMS instead of `start`
pub const WEIRD_PAGINATION_METHODS: &[&str] = &[
    "task.item.list",
    "task.items.getlist",
    "task.elapseditem.getlist",
];

/// Box-only method without pagination support
pub const UNSUPPORTED_LIST_METHOD: &str = "task.ctasks.getlist";

/// Most list methods return a plain array; these wrap it in an object key
pub static METHOD_WRAPPERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("tasks.task.list", "tasks"),
        ("tasks.task.history.list", "list"),
        ("tasks.task.getFields", "fields"),
        ("tasks.task.getaccess", "allowedActions"),
        ("sale.order.list", "orders"),
        ("sale.propertyvalue.list", "propertyValues"),
        ("sale.basketItem.list", "basketItems"),
        ("crm.stagehistory.list", "items"),
        ("crm.item.list", "items"),
        ("crm.type.list", "types"),
        ("crm.item.productrow.list", "productRows"),
        ("userfieldconfig.list", "fields"),
        ("catalog.catalog.list", "catalogs"),
        ("catalog.product.list", "products"),
        ("catalog.storeproduct.list", "storeProducts"),
        ("catalog.product.offer.list", "offers"),
        ("catalog.section.list", "sections"),
        ("catalog.productPropertyEnum.list", "productPropertyEnums"),
        ("rpa.item.list", "items"),
        ("rpa.stage.listForType", "stages"),
        ("socialnetwork.api.workgroup.list", "workgroups"),
        ("catalog.product.sku.list", "units"),
    ])
});

/// Wrapper key for a list method, if it has one
pub fn method_wrapper(method: &str) -> Option<&'static str> {
    METHOD_WRAPPERS.get(method).copied()
}

/// Build a REST endpoint URL.
///
/// Webhook credentials embed their secret as a path segment (`{user_id}/{key}/`).
pub fn method_endpoint(scheme: &str, domain: &str, hook_key: Option<&str>, method: &str) -> String {
    match hook_key {
        Some(hook) => format!("{}://{}/{}/{}/{}.json", scheme, domain, REST_PATH, hook, method),
        None => format!("{}://{}/{}/{}.json", scheme, domain, REST_PATH, method),
    }
}
