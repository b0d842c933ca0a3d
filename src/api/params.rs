//! Request parameter encoding
//!
//! The platform expects PHP-style form bodies: nested maps and lists are
//! flattened into bracketed keys (`filter[>ID]=5`, `select[0]=ID`). Map order
//! is preserved so the encoded string is deterministic, which matters for
//! positional methods and for batch commands that reference earlier results
//! (`$result[req_0][49][ID]`).

use serde_json::Value;
use std::fmt;

/// A single request parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Already encoded text, written to the wire without escaping
    Raw(String),
    List(Vec<Param>),
    Map(Params),
}

/// Insertion-ordered parameter map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, Param)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Param>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Param>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Param> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Param> {
        self.0.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Param> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    /// Remove and return the last entry
    pub fn pop(&mut self) -> Option<(String, Param)> {
        self.0.pop()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Param> {
        self.0.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `other` into `self`. Nested maps merge key by key, anything
    /// else is replaced. Merging a map over a scalar is an error.
    pub fn merge(&mut self, other: Params) -> Result<(), String> {
        for (key, value) in other {
            match value {
                Param::Map(inner) => {
                    match self.get(&key) {
                        Some(Param::Map(_)) => {}
                        Some(Param::Null) | None => {
                            self.insert(key.clone(), Param::Map(Params::new()))
                        }
                        Some(other) => {
                            return Err(format!("cannot merge map into {} at {}", other, key));
                        }
                    }
                    if let Some(Param::Map(existing)) = self.get_mut(&key) {
                        existing.merge(inner)?;
                    }
                }
                value => self.insert(key, value),
            }
        }
        Ok(())
    }

    /// Convert to a JSON object, for the JSON request shape
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Param>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl IntoIterator for Params {
    type Item = (String, Param);
    type IntoIter = std::vec::IntoIter<(String, Param)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Param {
    /// Tag text as already encoded
    pub fn raw(text: impl Into<String>) -> Self {
        Param::Raw(text.into())
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Param::List(_) | Param::Map(_))
    }

    pub fn as_map(&self) -> Option<&Params> {
        match self {
            Param::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Params> {
        match self {
            Param::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert to JSON. Raw text becomes a plain string.
    pub fn to_json(&self) -> Value {
        match self {
            Param::Null => Value::Null,
            Param::Bool(b) => Value::Bool(*b),
            Param::Int(i) => Value::from(*i),
            Param::Float(f) => Value::from(*f),
            Param::Str(s) | Param::Raw(s) => Value::String(s.clone()),
            Param::List(items) => Value::Array(items.iter().map(Param::to_json).collect()),
            Param::Map(map) => map.to_json(),
        }
    }

    /// Shape this value takes after an encode/decode round trip: scalars
    /// become strings, empty collections become empty lists and maps keyed
    /// `0..n` become lists.
    pub fn normalized(&self) -> Param {
        self.normalize(false)
    }

    fn normalize(&self, nested: bool) -> Param {
        match self {
            Param::List(items) if items.is_empty() && nested => Param::List(Vec::new()),
            Param::Map(map) if map.is_empty() && nested => Param::List(Vec::new()),
            Param::List(items) => Param::List(items.iter().map(|v| v.normalize(true)).collect()),
            Param::Map(map) => {
                let normalized: Params = map
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.normalize(true)))
                    .collect();
                listify(normalized)
            }
            scalar => Param::Str(scalar_text(scalar)),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::List(_) | Param::Map(_) => write!(f, "{}", self.to_json()),
            scalar => f.write_str(&scalar_text(scalar)),
        }
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Str(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Str(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value as i64)
    }
}

impl From<usize> for Param {
    fn from(value: usize) -> Self {
        Param::Int(value as i64)
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Float(value)
    }
}

impl From<Params> for Param {
    fn from(value: Params) -> Self {
        Param::Map(value)
    }
}

impl<T: Into<Param>> From<Vec<T>> for Param {
    fn from(value: Vec<T>) -> Self {
        Param::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Param::Null)
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Param::Null,
            Value::Bool(b) => Param::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Param::Int(i),
                None => Param::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Param::Str(s),
            Value::Array(items) => Param::List(items.into_iter().map(Param::from).collect()),
            Value::Object(map) => Param::Map(map.into_iter().collect()),
        }
    }
}

impl From<Value> for Params {
    /// Objects keep their key order; any other JSON value becomes an
    /// index-keyed map, the way positional parameters are sent.
    fn from(value: Value) -> Self {
        match Param::from(value) {
            Param::Map(map) => map,
            Param::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            Param::Null => Params::new(),
            scalar => Params::new().with("0", scalar),
        }
    }
}

/// Percent-encode `text`, leaving the characters in `safe` untouched.
pub fn quote(text: &str, safe: &str) -> String {
    let encoded = urlencoding::encode(text).into_owned();
    if safe.is_empty() {
        return encoded;
    }
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '%' && i + 3 <= encoded.len() {
            if let Ok(byte) = u8::from_str_radix(&encoded[i + 1..i + 3], 16) {
                let ch = byte as char;
                if byte.is_ascii() && safe.contains(ch) {
                    out.push(ch);
                    chars.next();
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn scalar_text(value: &Param) -> String {
    match value {
        Param::Null => String::new(),
        Param::Bool(true) => "1".to_string(),
        Param::Bool(false) => "0".to_string(),
        Param::Int(i) => i.to_string(),
        Param::Float(f) => f.to_string(),
        Param::Str(s) | Param::Raw(s) => s.clone(),
        Param::List(_) | Param::Map(_) => String::new(),
    }
}

fn encode_scalar(value: &Param) -> String {
    match value {
        Param::Raw(text) => text.clone(),
        other => quote(&scalar_text(other), "/"),
    }
}

/// Flatten a parameter tree into the bracketed form body.
///
/// ```
/// use b24_client::api::params::{encode, Param, Params};
///
/// let params = Params::new()
///     .with("auth", 123)
///     .with("FILTER", Params::new().with(">=PRICE", 15));
/// assert_eq!(encode(&Param::Map(params)), "auth=123&FILTER[%3E%3DPRICE]=15");
/// ```
pub fn encode(value: &Param) -> String {
    if !value.is_collection() {
        return encode_scalar(value);
    }
    let mut pairs = Vec::new();
    traverse(value, None, &mut pairs);
    pairs.join("&")
}

/// Encode a parameter map
pub fn encode_params(params: &Params) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params.iter() {
        traverse(value, Some(quote(key, "/")), &mut pairs);
    }
    pairs.join("&")
}

fn traverse(value: &Param, key: Option<String>, out: &mut Vec<String>) {
    let nest = |inner: String| match &key {
        // Only the inner part is quoted; the outer part already carries brackets
        Some(outer) => format!("{}[{}]", outer, inner),
        None => inner,
    };

    match value {
        Param::List(items) if items.is_empty() => {
            // Some endpoints require skipped positional params as empty arrays
            if let Some(key) = &key {
                out.push(format!("{}[]=", key));
            }
        }
        Param::Map(map) if map.is_empty() => {
            if let Some(key) = &key {
                out.push(format!("{}[]=", key));
            }
        }
        Param::List(items) => {
            for (index, item) in items.iter().enumerate() {
                traverse(item, Some(nest(index.to_string())), out);
            }
        }
        Param::Map(map) => {
            for (inner, item) in map.iter() {
                traverse(item, Some(nest(quote(inner, "/"))), out);
            }
        }
        scalar => out.push(format!(
            "{}={}",
            key.as_deref().unwrap_or_default(),
            encode_scalar(scalar)
        )),
    }
}

/// Parse a bracketed form body back into a parameter tree.
///
/// Values come back as strings, `key[]=` as an empty list and maps keyed
/// `0..n` as lists (see [`Param::normalized`]). `key[]=value` appends to the
/// list at `key`.
pub fn decode(body: &str) -> Param {
    let mut root = Params::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let (mut path, list_marker) = split_key(raw_key);
        let value = if list_marker && raw_value.is_empty() {
            Param::List(Vec::new())
        } else {
            if list_marker {
                path.push(next_index(&root, &path).to_string());
            }
            Param::Str(percent_decode(raw_value))
        };
        insert_path(&mut root, &path, value);
    }
    listify(root)
}

/// Next free position of the list at `path`
fn next_index(map: &Params, path: &[String]) -> usize {
    let Some((head, tail)) = path.split_first() else {
        return map.len();
    };
    match map.get(head) {
        Some(Param::Map(child)) => next_index(child, tail),
        _ => 0,
    }
}

fn percent_decode(text: &str) -> String {
    urlencoding::decode(text)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// Split `a[b][c]` into `["a", "b", "c"]`. A trailing `[]` marks a list.
fn split_key(raw: &str) -> (Vec<String>, bool) {
    let (base, mut rest) = match raw.find('[') {
        Some(pos) => (&raw[..pos], &raw[pos..]),
        None => (raw, ""),
    };
    let mut path = vec![percent_decode(base)];
    let mut empty_list = false;
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(end) = stripped.find(']') else {
            break;
        };
        let segment = &stripped[..end];
        if segment.is_empty() {
            empty_list = true;
        } else {
            path.push(percent_decode(segment));
        }
        rest = &stripped[end + 1..];
    }
    (path, empty_list)
}

fn insert_path(map: &mut Params, path: &[String], value: Param) {
    let Some((head, tail)) = path.split_first() else {
        return;
    };
    if tail.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    if !matches!(map.get(head), Some(Param::Map(_))) {
        map.insert(head.clone(), Param::Map(Params::new()));
    }
    if let Some(Param::Map(child)) = map.get_mut(head) {
        insert_path(child, tail, value);
    }
}

fn listify(map: Params) -> Param {
    let is_sequence = !map.is_empty()
        && map
            .keys()
            .enumerate()
            .all(|(index, key)| key == index.to_string());
    let map: Params = map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Param::Map(inner) => listify(inner),
                other => other,
            };
            (k, v)
        })
        .collect();
    if is_sequence {
        Param::List(map.into_iter().map(|(_, v)| v).collect())
    } else {
        Param::Map(map)
    }
}
