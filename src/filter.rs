// src/filter.rs
//
// Message filter table: rows of (ignore id, memo, enabled) that produce the
// set of identifiers suppressed from the received stream.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::composer::{convert_text, parse_number, ParseError, Radix};

/// Rows present on startup and after `clear`
pub const DEFAULT_FILTER_ROWS: usize = 6;

// ============================================================================
// Ignore Set
// ============================================================================

/// Identifiers suppressed from the received stream.
///
/// Cloned handles share one set: the application replaces it, the relay task
/// checks it for every inbound frame.
#[derive(Clone, Debug, Default)]
pub struct IgnoreIds(Arc<RwLock<HashSet<u32>>>);

impl IgnoreIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set in one step
    pub fn replace(&self, ids: HashSet<u32>) {
        let mut guard = match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = ids;
    }

    pub fn contains(&self, id: u32) -> bool {
        match self.0.read() {
            Ok(guard) => guard.contains(&id),
            Err(poisoned) => poisoned.into_inner().contains(&id),
        }
    }

    /// Sorted copy of the current set
    pub fn snapshot(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = match self.0.read() {
            Ok(guard) => guard.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        };
        ids.sort_unstable();
        ids
    }
}

// ============================================================================
// Filter Table
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterRow {
    pub id_text: String,
    pub memo: String,
    pub enabled: bool,
}

impl Default for FilterRow {
    fn default() -> Self {
        Self {
            id_text: String::new(),
            memo: String::new(),
            enabled: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FilterTable {
    rows: Vec<FilterRow>,
    radix: Radix,
}

impl FilterTable {
    pub fn new(radix: Radix) -> Self {
        Self {
            rows: vec![FilterRow::default(); DEFAULT_FILTER_ROWS],
            radix,
        }
    }

    pub fn rows(&self) -> &[FilterRow] {
        &self.rows
    }

    pub fn row_mut(&mut self, index: usize) -> Option<&mut FilterRow> {
        self.rows.get_mut(index)
    }

    /// Append a row, returning its index
    pub fn add_row(&mut self, id_text: &str, memo: &str) -> usize {
        self.rows.push(FilterRow {
            id_text: id_text.trim().to_string(),
            memo: memo.to_string(),
            enabled: true,
        });
        self.rows.len() - 1
    }

    /// Reset to the default empty rows
    pub fn clear(&mut self) {
        self.rows = vec![FilterRow::default(); DEFAULT_FILTER_ROWS];
    }

    /// Switch radix, re-rendering every id field
    pub fn set_radix(&mut self, radix: Radix) {
        if radix == self.radix {
            return;
        }
        for row in self.rows.iter_mut() {
            row.id_text = convert_text(&row.id_text, self.radix, radix);
        }
        self.radix = radix;
    }

    /// Identifiers of the enabled, non-empty rows.
    ///
    /// Rows whose text does not parse (or is negative) are returned as errors
    /// alongside the set so the caller can report them.
    pub fn ignore_ids(&self) -> (HashSet<u32>, Vec<(usize, ParseError)>) {
        let mut ids = HashSet::new();
        let mut errors = Vec::new();

        for (index, row) in self.rows.iter().enumerate() {
            if !row.enabled {
                continue;
            }
            match parse_number(&row.id_text, self.radix) {
                Ok(Some(value)) => match u32::try_from(value) {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(_) => errors.push((
                        index,
                        ParseError {
                            text: row.id_text.clone(),
                            radix: self.radix,
                        },
                    )),
                },
                Ok(None) => {}
                Err(e) => errors.push((index, e)),
            }
        }

        (ids, errors)
    }

    /// Table rendering for `filter list`
    pub fn describe(&self) -> Vec<String> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                format!(
                    "{:>2}  [{}]  {:<10}  {}",
                    i,
                    if row.enabled { "x" } else { " " },
                    if row.id_text.is_empty() { "-" } else { &row.id_text },
                    row.memo
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_ids_shared_between_clones() {
        let ids = IgnoreIds::new();
        let relay_view = ids.clone();
        assert!(!relay_view.contains(0x100));

        ids.replace(HashSet::from([0x100, 0x7FF]));
        assert!(relay_view.contains(0x100));
        assert_eq!(relay_view.snapshot(), vec![0x100, 0x7FF]);

        ids.replace(HashSet::new());
        assert!(!relay_view.contains(0x100));
    }

    #[test]
    fn test_table_starts_with_six_enabled_rows() {
        let table = FilterTable::new(Radix::Decimal);
        assert_eq!(table.rows().len(), DEFAULT_FILTER_ROWS);
        assert!(table.rows().iter().all(|r| r.enabled && r.id_text.is_empty()));
        assert!(table.ignore_ids().0.is_empty());
    }

    #[test]
    fn test_add_and_clear() {
        let mut table = FilterTable::new(Radix::Decimal);
        assert_eq!(table.add_row("256", "heartbeat"), 6);
        assert_eq!(table.rows().len(), 7);
        table.clear();
        assert_eq!(table.rows().len(), DEFAULT_FILTER_ROWS);
        assert!(table.rows().iter().all(|r| r.memo.is_empty()));
    }

    #[test]
    fn test_ignore_ids_skip_disabled_and_report_bad_rows() {
        let mut table = FilterTable::new(Radix::Hex);
        table.row_mut(0).unwrap().id_text = "7DF".to_string();
        table.row_mut(1).unwrap().id_text = "100".to_string();
        table.row_mut(1).unwrap().enabled = false;
        table.row_mut(2).unwrap().id_text = "xyz".to_string();

        let (ids, errors) = table.ignore_ids();
        assert_eq!(ids, HashSet::from([0x7DF]));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 2);
    }

    #[test]
    fn test_radix_switch_rerenders_ids_but_keeps_set() {
        let mut table = FilterTable::new(Radix::Decimal);
        table.add_row("2015", "");
        let before = table.ignore_ids().0;

        table.set_radix(Radix::Hex);
        assert_eq!(table.rows()[6].id_text, "7DF");
        assert_eq!(table.ignore_ids().0, before);
    }
}
