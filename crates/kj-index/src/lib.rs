#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use kj_types::NormalizedKey;

/// Ordered set of 0-based row line indices. Iteration is ascending, which
/// keeps every consumer deterministic.
pub type LineSet = BTreeSet<usize>;

static NO_LINES: LineSet = LineSet::new();

/// Lookup from one key list's [`NormalizedKey`] to the lines producing it.
///
/// Every indexed line sits under exactly one key, and the key of each line is
/// kept so a row can be probed against other indices without re-normalizing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIndex {
    entries: HashMap<NormalizedKey, LineSet>,
    line_keys: Vec<NormalizedKey>,
}

impl KeyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from per-row keys in file order.
    #[must_use]
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = NormalizedKey>,
    {
        let mut index = Self::new();
        for key in keys {
            index.push(key);
        }
        index
    }

    fn push(&mut self, key: NormalizedKey) {
        let line = self.line_keys.len();
        self.entries.entry(key.clone()).or_default().insert(line);
        self.line_keys.push(key);
    }

    /// Lines sharing `key`, or an empty set when no line produced it.
    #[must_use]
    pub fn lines_for(&self, key: &NormalizedKey) -> &LineSet {
        self.entries.get(key).unwrap_or(&NO_LINES)
    }

    #[must_use]
    pub fn key_of(&self, line: usize) -> Option<&NormalizedKey> {
        self.line_keys.get(line)
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_keys.len()
    }

    #[must_use]
    pub fn distinct_keys(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use kj_types::NormalizedKey;

    use super::{KeyIndex, LineSet};

    fn key(tokens: &[&str]) -> NormalizedKey {
        tokens.iter().copied().collect()
    }

    fn each_line_indexed_once(index: &KeyIndex) -> bool {
        let mut seen = vec![false; index.line_count()];
        for lines in index.entries.values() {
            for &line in lines {
                match seen.get_mut(line) {
                    Some(slot) if !*slot => *slot = true,
                    _ => return false,
                }
            }
        }
        seen.into_iter().all(|hit| hit)
    }

    #[test]
    fn duplicate_keys_collect_ascending_lines() {
        let index = KeyIndex::from_keys([key(&["1"]), key(&["2"]), key(&["1"])]);

        assert_eq!(index.lines_for(&key(&["1"])), &LineSet::from([0, 2]));
        assert_eq!(index.lines_for(&key(&["2"])), &LineSet::from([1]));
        assert_eq!(index.distinct_keys(), 2);
        assert_eq!(index.line_count(), 3);
        assert_eq!(index.key_of(2), Some(&key(&["1"])));
        assert!(each_line_indexed_once(&index));
    }

    #[test]
    fn unknown_key_yields_empty_set() {
        let index = KeyIndex::from_keys([key(&["a", "b"])]);
        assert!(index.lines_for(&key(&["a"])).is_empty());
        assert!(index.lines_for(&key(&["b", "a"])).is_empty());
    }

    #[test]
    fn empty_tokens_still_index_the_row() {
        let index = KeyIndex::from_keys([key(&[""]), key(&[""])]);
        assert_eq!(index.lines_for(&key(&[""])), &LineSet::from([0, 1]));
        assert!(each_line_indexed_once(&index));
    }
}
