//! Progress of one cursor-pipelined fetch

use std::collections::HashSet;

/// What to do with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Yield,
    /// Already returned once; skip it
    SkipDuplicate,
    /// Too many duplicates, or the ID moved backwards
    Stop,
}

/// IDs seen so far by one fetch.
///
/// `seen_ids` only grows and `last_seen_id` only moves in the sort direction.
#[derive(Debug, Clone)]
pub struct ListCursor {
    last_seen_id: Option<i64>,
    seen_ids: HashSet<i64>,
    duplicate_count: usize,
    max_duplicates: usize,
    descending: bool,
}

impl ListCursor {
    pub fn new(descending: bool, max_duplicates: usize) -> Self {
        Self {
            last_seen_id: None,
            seen_ids: HashSet::new(),
            duplicate_count: 0,
            max_duplicates,
            descending,
        }
    }

    pub fn last_seen_id(&self) -> Option<i64> {
        self.last_seen_id
    }

    pub fn seen(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicate_count
    }

    /// Classify `id` and, if it is yielded, record it
    pub fn observe(&mut self, id: i64) -> Observation {
        if self.seen_ids.contains(&id) {
            if self.duplicate_count < self.max_duplicates {
                self.duplicate_count += 1;
                return Observation::SkipDuplicate;
            }
            return Observation::Stop;
        }

        if let Some(last) = self.last_seen_id {
            let backwards = if self.descending { id > last } else { id < last };
            if backwards {
                return Observation::Stop;
            }
        }

        self.seen_ids.insert(id);
        self.last_seen_id = Some(id);
        Observation::Yield
    }
}
