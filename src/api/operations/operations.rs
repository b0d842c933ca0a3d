//! Ordered collection of sub-calls for one batch operation

use super::operation::SubCall;
use crate::api::error::{Error, Result};
use crate::api::params::Params;
use std::collections::HashSet;

/// A collection of sub-calls executed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubCalls {
    calls: Vec<SubCall>,
}

impl SubCalls {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }

    /// Add a sub-call with a positional name
    pub fn add(mut self, method: impl Into<String>, params: Params) -> Self {
        self.calls.push(SubCall::new(method, params));
        self
    }

    /// Add a named sub-call
    pub fn named(mut self, name: impl Into<String>, method: impl Into<String>, params: Params) -> Self {
        self.calls.push(SubCall::named(name, method, params));
        self
    }

    pub fn push(&mut self, call: SubCall) {
        self.calls.push(call);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubCall> {
        self.calls.iter()
    }

    /// Assign positional names and reject duplicates.
    ///
    /// The positional counter advances for every sub-call, named or not, so
    /// the third unnamed call of `[a, -, -]` is `data_2`.
    pub fn normalize(self) -> Result<Vec<(String, SubCall)>> {
        let mut seen = HashSet::new();
        let mut named = Vec::with_capacity(self.calls.len());
        for (index, call) in self.calls.into_iter().enumerate() {
            let name = call
                .name
                .clone()
                .unwrap_or_else(|| format!("data_{}", index));
            if !seen.insert(name.clone()) {
                return Err(Error::usage(format!("duplicate key: {}", name)));
            }
            named.push((name, call));
        }
        Ok(named)
    }
}

impl From<Vec<SubCall>> for SubCalls {
    fn from(calls: Vec<SubCall>) -> Self {
        Self { calls }
    }
}

impl FromIterator<SubCall> for SubCalls {
    fn from_iter<I: IntoIterator<Item = SubCall>>(iter: I) -> Self {
        Self {
            calls: iter.into_iter().collect(),
        }
    }
}
