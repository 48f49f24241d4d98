// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Taints and tolerations.
//!
//! A `NoSchedule` or `NoExecute` taint repels pods unless a toleration
//! matches it. `PreferNoSchedule` is soft: the node stays eligible but is
//! deprioritized among equally fit candidates.

use serde::{Deserialize, Serialize};

/// Effect of a taint on scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    /// Hard effects block placement without a matching toleration.
    pub fn is_hard(&self) -> bool {
        matches!(self, TaintEffect::NoSchedule | TaintEffect::NoExecute)
    }
}

/// A repulsion marker on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

/// Operator for matching a toleration against a taint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

/// A pod-side exemption from a taint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    /// Empty key with `Exists` tolerates every taint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// When set, only taints with this effect are tolerated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// True when this toleration matches `taint`.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => match &self.key {
                // Empty key acts as a wildcard.
                None => true,
                Some(k) if k.is_empty() => true,
                Some(k) => *k == taint.key,
            },
            TolerationOperator::Equal => {
                self.key.as_deref() == Some(taint.key.as_str()) && self.value == taint.value
            }
        }
    }
}

/// Hard taints on `taints` that no toleration in `tolerations` matches.
pub fn hard_untolerated<'a>(taints: &'a [Taint], tolerations: &[Toleration]) -> Vec<&'a Taint> {
    taints
        .iter()
        .filter(|t| t.effect.is_hard())
        .filter(|t| !tolerations.iter().any(|tol| tol.tolerates(t)))
        .collect()
}

/// Number of `PreferNoSchedule` taints, used by the scheduler tie-break.
pub fn prefer_no_schedule_count(taints: &[Taint]) -> usize {
    taints
        .iter()
        .filter(|t| t.effect == TaintEffect::PreferNoSchedule)
        .count()
}

#[cfg(test)]
#[path = "taint_tests.rs"]
mod tests;
