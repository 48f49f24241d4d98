// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Label maps and node selectors.
//!
//! Selectors combine `matchLabels` equalities with `matchExpressions` over
//! `In` / `NotIn` / `Exists` / `DoesNotExist`. All terms are conjunctive.
//! `NotIn` and `DoesNotExist` are satisfied by an absent key; `In` and
//! `Exists` are not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String → string label map. BTreeMap so serialization is stable.
pub type Labels = BTreeMap<String, String>;

/// Operator for a selector requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single expression over one label key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    /// Candidate values for `In` / `NotIn`. Ignored by `Exists` / `DoesNotExist`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl SelectorRequirement {
    pub fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => match value {
                Some(v) => self.values.iter().any(|c| c == v),
                None => false,
            },
            SelectorOperator::NotIn => match value {
                Some(v) => !self.values.iter().any(|c| c == v),
                None => true,
            },
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// Node selector: conjunction of equalities and expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub match_labels: Labels,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    /// Selector with only equality terms.
    pub fn from_labels(labels: Labels) -> Self {
        Self { match_labels: labels, match_expressions: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// True when every term is satisfied by `labels`.
    /// An empty selector matches everything.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).map(|l| l == v).unwrap_or(false))
            && self.match_expressions.iter().all(|req| req.matches(labels))
    }
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod tests;
