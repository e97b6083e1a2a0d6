#![forbid(unsafe_code)]

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Unicode whitespace plus the information separators U+001C..U+001F.
static INTERNAL_WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\s\x1C-\x1F]{2,}").expect("static whitespace pattern compiles")
});

fn is_key_whitespace(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Turns raw field values into comparison tokens.
///
/// Both switches are independent and off by default. Normalization is total:
/// every input string yields a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNormalizer {
    pub ignore_case: bool,
    pub clean_whitespace: bool,
}

impl KeyNormalizer {
    #[must_use]
    pub fn new(ignore_case: bool, clean_whitespace: bool) -> Self {
        Self {
            ignore_case,
            clean_whitespace,
        }
    }

    /// Canonical token for one field.
    ///
    /// Whitespace cleaning trims both ends and collapses internal runs of two
    /// or more whitespace characters into one space; a single tab or newline
    /// inside the value is kept as is. The information separators U+001C to
    /// U+001F count as whitespace here. Lowercasing runs after cleaning.
    #[must_use]
    pub fn token(&self, raw: &str) -> String {
        let mut token = if self.clean_whitespace {
            INTERNAL_WHITESPACE_RUN
                .replace_all(raw.trim_matches(is_key_whitespace), " ")
                .into_owned()
        } else {
            raw.to_owned()
        };

        if self.ignore_case {
            token = token.to_lowercase();
        }

        token
    }

    #[must_use]
    pub fn normalize<'a, I>(&self, fields: I) -> NormalizedKey
    where
        I: IntoIterator<Item = &'a str>,
    {
        NormalizedKey::new(fields.into_iter().map(|field| self.token(field)).collect())
    }
}

/// Ordered tokens extracted from a row through one [`KeyList`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedKey {
    tokens: Vec<String>,
}

impl NormalizedKey {
    #[must_use]
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.tokens.len()
    }
}

impl<S: Into<String>> FromIterator<S> for NormalizedKey {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.tokens.join(", "))
    }
}

/// Column names used jointly as one composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyList {
    columns: Vec<String>,
}

impl KeyList {
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Splits a comma-separated column list. Names are taken verbatim, so
    /// `"a, b"` names the columns `a` and ` b`.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        Self::new(spec.split(',').map(str::to_owned).collect())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.columns.len()
    }
}

impl From<&str> for KeyList {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl fmt::Display for KeyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.columns.join(","))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("at least one key list is required")]
    NoKeyLists,
    #[error("key lists not equal length: file one has {first}, file two has {second}")]
    KeyListCountMismatch { first: usize, second: usize },
    #[error(
        "key pair {pair} not equal length: file one has {first} columns, file two has {second}"
    )]
    KeyPairArityMismatch {
        pair: usize,
        first: usize,
        second: usize,
    },
}

/// Validated, positionally paired key lists for both tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    first: Vec<KeyList>,
    second: Vec<KeyList>,
}

impl KeySpec {
    /// Pairs the key lists of both tables. An absent or empty `second`
    /// reuses `first`.
    pub fn new(first: Vec<KeyList>, second: Option<Vec<KeyList>>) -> Result<Self, KeyError> {
        let second = match second {
            Some(lists) if !lists.is_empty() => lists,
            _ => first.clone(),
        };

        if first.is_empty() {
            return Err(KeyError::NoKeyLists);
        }
        if first.len() != second.len() {
            return Err(KeyError::KeyListCountMismatch {
                first: first.len(),
                second: second.len(),
            });
        }
        for (pair, (left, right)) in first.iter().zip(&second).enumerate() {
            if left.arity() != right.arity() {
                return Err(KeyError::KeyPairArityMismatch {
                    pair,
                    first: left.arity(),
                    second: right.arity(),
                });
            }
        }

        Ok(Self { first, second })
    }

    pub fn parse<S: AsRef<str>>(first: &[S], second: &[S]) -> Result<Self, KeyError> {
        let parse_all = |specs: &[S]| -> Vec<KeyList> {
            specs.iter().map(|s| KeyList::parse(s.as_ref())).collect()
        };
        Self::new(parse_all(first), Some(parse_all(second)))
    }

    #[must_use]
    pub fn first(&self) -> &[KeyList] {
        &self.first
    }

    #[must_use]
    pub fn second(&self) -> &[KeyList] {
        &self.second
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{KeyError, KeyList, KeyNormalizer, KeySpec, NormalizedKey};

    #[test]
    fn default_normalizer_is_identity() {
        let normalizer = KeyNormalizer::default();
        assert_eq!(normalizer.token("  Bo  "), "  Bo  ");
        assert_eq!(normalizer.token("ANN"), "ANN");
    }

    #[test]
    fn whitespace_cleaning_trims_and_collapses_runs() {
        let normalizer = KeyNormalizer::new(false, true);
        assert_eq!(normalizer.token("  Bo  "), "Bo");
        assert_eq!(normalizer.token("van   der \t Berg"), "van der Berg");
        assert_eq!(normalizer.token("tab\tkept"), "tab\tkept");
        assert_eq!(normalizer.token("   "), "");
    }

    #[test]
    fn information_separators_count_as_whitespace() {
        let normalizer = KeyNormalizer::new(false, true);
        assert_eq!(normalizer.token("a\u{1c}\u{1c}b"), normalizer.token("a b"));
        assert_eq!(normalizer.token("\u{1f}Bo\u{1d}"), "Bo");
        assert_eq!(normalizer.token("a\u{1e}b"), "a\u{1e}b");
        assert_eq!(KeyNormalizer::default().token("a\u{1c}\u{1c}b"), "a\u{1c}\u{1c}b");
    }

    #[test]
    fn ignore_case_lowercases_after_cleaning() {
        let normalizer = KeyNormalizer::new(true, true);
        assert_eq!(normalizer.token("  ANN   Lee "), "ann lee");
        assert_eq!(
            KeyNormalizer::new(true, false).token("Ann"),
            KeyNormalizer::new(true, false).token("ann")
        );
    }

    #[test]
    fn normalize_builds_ordered_tuple() {
        let key = KeyNormalizer::new(true, false).normalize(["Smith", "JOHN"]);
        assert_eq!(key, ["smith", "john"].into_iter().collect::<NormalizedKey>());
        assert_eq!(key.arity(), 2);
        assert_eq!(key.to_string(), "(smith, john)");
    }

    #[test]
    fn key_list_parse_splits_verbatim() {
        let list = KeyList::parse("last, first");
        assert_eq!(list.columns(), &["last".to_owned(), " first".to_owned()]);
        assert_eq!(KeyList::parse("").columns(), &[String::new()]);
    }

    #[test]
    fn key_spec_reuses_first_lists_when_second_absent() {
        let spec = KeySpec::new(vec!["id".into()], None).expect("spec");
        assert_eq!(spec.first(), spec.second());
        let spec = KeySpec::new(vec!["id".into()], Some(Vec::new())).expect("spec");
        assert_eq!(spec.second(), &[KeyList::parse("id")]);
    }

    #[test]
    fn key_spec_rejects_count_and_arity_mismatches() {
        let err = KeySpec::parse(&["id", "last,first"], &["id"]).expect_err("count mismatch");
        assert_eq!(
            err,
            KeyError::KeyListCountMismatch {
                first: 2,
                second: 1
            }
        );

        let err = KeySpec::parse(&["id", "last,first"], &["key", "surname"])
            .expect_err("arity mismatch");
        assert_eq!(
            err.to_string(),
            "key pair 1 not equal length: file one has 2 columns, file two has 1"
        );

        let empty: [&str; 0] = [];
        assert_eq!(
            KeySpec::parse(&empty, &empty).expect_err("no lists"),
            KeyError::NoKeyLists
        );
    }

    #[test]
    fn normalizer_options_deserialize_from_json() {
        let normalizer: KeyNormalizer =
            serde_json::from_str(r#"{"ignore_case":true,"clean_whitespace":false}"#)
                .expect("json");
        assert!(normalizer.ignore_case);
        assert!(!normalizer.clean_whitespace);
    }

    proptest! {
        #[test]
        fn cleaned_tokens_have_no_edge_or_double_whitespace(raw in "\\PC*") {
            let token = KeyNormalizer::new(false, true).token(&raw);
            prop_assert_eq!(token.trim_matches(super::is_key_whitespace), token.as_str());
            let doubled = token
                .chars()
                .zip(token.chars().skip(1))
                .any(|(a, b)| super::is_key_whitespace(a) && super::is_key_whitespace(b));
            prop_assert!(!doubled);
        }

        #[test]
        fn normalization_is_idempotent(
            raw in "\\PC*",
            ignore_case in any::<bool>(),
            clean in any::<bool>(),
        ) {
            let normalizer = KeyNormalizer::new(ignore_case, clean);
            let once = normalizer.token(&raw);
            prop_assert_eq!(normalizer.token(&once), once.clone());
        }
    }
}
