#![forbid(unsafe_code)]

use std::borrow::Cow;

use kj_frame::{FrameError, KeyedTable, Table, merge_headers};
use kj_index::LineSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Switches controlling candidate narrowing and emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOptions {
    /// Intersect candidates across key lists instead of replacing them.
    pub cumulative: bool,
    /// Emit one row per candidate even when the match is ambiguous.
    pub all_combinations: bool,
    /// Skip the trailing rows of the second table that were never matched.
    pub left_only: bool,
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("line {line} of file one has no candidates in its own index")]
    EmptySelfCandidates { line: usize },
    #[error("key list count differs between tables: file one has {left}, file two has {right}")]
    KeyListCountMismatch { left: usize, right: usize },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Candidate set sizes after consulting one key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateStep {
    pub key_list: usize,
    pub left_len: usize,
    pub right_len: usize,
}

/// Final candidate sets for one first-table row.
///
/// A set stays borrowed from its index until an intersection forces a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates<'a> {
    pub left: Cow<'a, LineSet>,
    pub right: Cow<'a, LineSet>,
    pub steps: Vec<CandidateStep>,
}

/// Narrows the candidate partners of first-table row `line`.
///
/// Key lists are consulted in declaration order. Each step looks up the row's
/// key in both tables' index for that key list; the found sets replace the
/// running sets, or intersect them in cumulative mode. Consultation stops once
/// both sets are singletons, or in cumulative mode once the second-table set
/// is empty.
pub fn resolve_candidates<'a>(
    line: usize,
    left: &'a KeyedTable,
    right: &'a KeyedTable,
    cumulative: bool,
) -> Result<Candidates<'a>, JoinError> {
    let mut running_left: Option<Cow<'a, LineSet>> = None;
    let mut running_right: Option<Cow<'a, LineSet>> = None;
    let mut steps = Vec::with_capacity(left.indices().len());

    for (key_list, (left_index, right_index)) in
        left.indices().iter().zip(right.indices()).enumerate()
    {
        let Some(key) = left_index.key_of(line) else {
            return Err(JoinError::EmptySelfCandidates { line });
        };

        let found_left = left_index.lines_for(key);
        let found_right = right_index.lines_for(key);

        let next_left = narrow(running_left.take(), found_left, cumulative);
        let next_right = narrow(running_right.take(), found_right, cumulative);

        steps.push(CandidateStep {
            key_list,
            left_len: next_left.len(),
            right_len: next_right.len(),
        });

        let unique = next_left.len() == 1 && next_right.len() == 1;
        let exhausted = cumulative && next_right.is_empty();
        running_left = Some(next_left);
        running_right = Some(next_right);
        if unique || exhausted {
            break;
        }
    }

    let left_set = running_left.unwrap_or_default();
    if left_set.is_empty() {
        return Err(JoinError::EmptySelfCandidates { line });
    }

    Ok(Candidates {
        left: left_set,
        right: running_right.unwrap_or_default(),
        steps,
    })
}

fn narrow<'a>(
    running: Option<Cow<'a, LineSet>>,
    found: &'a LineSet,
    cumulative: bool,
) -> Cow<'a, LineSet> {
    match running {
        Some(previous) if cumulative => {
            Cow::Owned(previous.intersection(found).copied().collect())
        }
        _ => Cow::Borrowed(found),
    }
}

/// How one first-table row is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMatch {
    /// Exactly one partner.
    Unique(usize),
    /// Several partners, each emitted (all-combinations mode).
    Expanded(LineSet),
    /// More than one partner and no expansion; emitted unpaired.
    Ambiguous(usize),
    /// No partner at all.
    Unmatched,
}

impl RowMatch {
    #[must_use]
    pub fn decide(candidates: &LineSet, all_combinations: bool) -> Self {
        match candidates.len() {
            0 => Self::Unmatched,
            1 => candidates
                .first()
                .copied()
                .map_or(Self::Unmatched, Self::Unique),
            _ if all_combinations => Self::Expanded(candidates.clone()),
            count => Self::Ambiguous(count),
        }
    }

    /// Second-table lines this row consumes, ascending.
    #[must_use]
    pub fn partners(&self) -> Vec<usize> {
        match self {
            Self::Unique(line) => vec![*line],
            Self::Expanded(lines) => lines.iter().copied().collect(),
            Self::Ambiguous(_) | Self::Unmatched => Vec::new(),
        }
    }
}

/// One flag per second-table row, flipped once a first-table row consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedMarkers {
    used: Vec<bool>,
}

impl UsedMarkers {
    #[must_use]
    pub fn new(rows: usize) -> Self {
        Self {
            used: vec![false; rows],
        }
    }

    pub fn mark(&mut self, line: usize) {
        if let Some(slot) = self.used.get_mut(line) {
            *slot = true;
        }
    }

    /// Lines never marked, in file order.
    pub fn unused(&self) -> impl Iterator<Item = usize> + '_ {
        self.used
            .iter()
            .enumerate()
            .filter_map(|(line, used)| (!used).then_some(line))
    }
}

/// Row counts by emission kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSummary {
    pub left_rows: usize,
    pub right_rows: usize,
    pub unique_matches: usize,
    pub expanded_left_rows: usize,
    pub expanded_output_rows: usize,
    pub ambiguous_left_rows: usize,
    pub unmatched_left_rows: usize,
    pub unmatched_right_rows: usize,
    pub output_rows: usize,
}

/// Output header plus, per output row, the source line on each side.
///
/// `None` on a side means that side is emitted as empty fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    pub header: Vec<String>,
    pub left_positions: Vec<Option<usize>>,
    pub right_positions: Vec<Option<usize>>,
    pub summary: JoinSummary,
}

impl JoinPlan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.left_positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left_positions.is_empty()
    }

    /// Materializes output rows, each exactly `header.len()` fields wide.
    pub fn rows<'a>(
        &'a self,
        left: &'a Table,
        right: &'a Table,
    ) -> impl Iterator<Item = Vec<&'a str>> + 'a {
        self.left_positions
            .iter()
            .zip(&self.right_positions)
            .map(move |(left_pos, right_pos)| {
                let mut row = Vec::with_capacity(left.width() + right.width());
                push_side(&mut row, left, *left_pos);
                push_side(&mut row, right, *right_pos);
                row
            })
    }

    fn push(&mut self, left: Option<usize>, right: Option<usize>) {
        self.left_positions.push(left);
        self.right_positions.push(right);
    }
}

fn push_side<'a>(row: &mut Vec<&'a str>, table: &'a Table, line: Option<usize>) {
    match line.and_then(|line| table.row(line)) {
        Some(fields) => row.extend(fields.iter().map(String::as_str)),
        None => row.extend(std::iter::repeat_n("", table.width())),
    }
}

/// Joins two keyed tables into an output plan.
///
/// Every first-table row yields at least one output row, in file order. Then,
/// unless `left_only` is set, every second-table row no first-table row
/// consumed follows, in its own file order.
pub fn join_tables(
    left: &KeyedTable,
    right: &KeyedTable,
    options: &JoinOptions,
) -> Result<JoinPlan, JoinError> {
    if left.indices().len() != right.indices().len() {
        return Err(JoinError::KeyListCountMismatch {
            left: left.indices().len(),
            right: right.indices().len(),
        });
    }

    let header = merge_headers(left.table().header(), right.table().header())?;
    let mut plan = JoinPlan {
        header,
        left_positions: Vec::with_capacity(left.table().len()),
        right_positions: Vec::with_capacity(left.table().len()),
        summary: JoinSummary {
            left_rows: left.table().len(),
            right_rows: right.table().len(),
            ..JoinSummary::default()
        },
    };
    let mut used = UsedMarkers::new(right.table().len());

    for line in 0..left.table().len() {
        let candidates = resolve_candidates(line, left, right, options.cumulative)?;
        let decision = RowMatch::decide(&candidates.right, options.all_combinations);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            line,
            steps = candidates.steps.len(),
            left_candidates = candidates.left.len(),
            right_candidates = candidates.right.len(),
            decision = ?decision,
            "resolved row"
        );

        match &decision {
            RowMatch::Unique(_) => plan.summary.unique_matches += 1,
            RowMatch::Expanded(lines) => {
                plan.summary.expanded_left_rows += 1;
                plan.summary.expanded_output_rows += lines.len();
            }
            RowMatch::Ambiguous(_) => plan.summary.ambiguous_left_rows += 1,
            RowMatch::Unmatched => plan.summary.unmatched_left_rows += 1,
        }

        let partners = decision.partners();
        if partners.is_empty() {
            plan.push(Some(line), None);
        }
        for partner in partners {
            plan.push(Some(line), Some(partner));
            used.mark(partner);
        }
    }

    if !options.left_only {
        let unused = used.unused().collect::<Vec<_>>();
        plan.summary.unmatched_right_rows = unused.len();
        for line in unused {
            plan.push(None, Some(line));
        }
    }

    plan.summary.output_rows = plan.len();

    #[cfg(feature = "tracing")]
    tracing::debug!(summary = ?plan.summary, "join resolved");

    Ok(plan)
}
