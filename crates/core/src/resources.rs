// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource vectors for node capacity accounting.
//!
//! Nodes advertise an `allocatable` vector; the scheduler tracks an
//! `allocated` vector against it. The invariant `allocated ≤ allocatable`
//! holds componentwise for every node.

use serde::{Deserialize, Serialize};

/// Resource vector: CPU in millicores, memory and storage in bytes, plus a
/// pod-count slot. All components are independent; comparisons are
/// componentwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    #[serde(rename = "cpu")]
    pub cpu_millis: u64,
    #[serde(rename = "memory")]
    pub memory_bytes: u64,
    pub pods: u64,
    #[serde(rename = "storage")]
    pub storage_bytes: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        cpu_millis: 0,
        memory_bytes: 0,
        pods: 0,
        storage_bytes: 0,
    };

    pub fn new(cpu_millis: u64, memory_bytes: u64, pods: u64, storage_bytes: u64) -> Self {
        Self { cpu_millis, memory_bytes, pods, storage_bytes }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// True when every component of `self` fits within `capacity`.
    pub fn fits_within(&self, capacity: &Resources) -> bool {
        self.cpu_millis <= capacity.cpu_millis
            && self.memory_bytes <= capacity.memory_bytes
            && self.pods <= capacity.pods
            && self.storage_bytes <= capacity.storage_bytes
    }

    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            pods: self.pods.saturating_add(other.pods),
            storage_bytes: self.storage_bytes.saturating_add(other.storage_bytes),
        }
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            pods: self.pods.saturating_sub(other.pods),
            storage_bytes: self.storage_bytes.saturating_sub(other.storage_bytes),
        }
    }

    /// Componentwise free capacity given this vector as the total.
    pub fn free(&self, allocated: &Resources) -> Resources {
        self.saturating_sub(allocated)
    }

    /// Componentwise minimum, used to clamp an allocation vector to the
    /// node's allocatable capacity.
    pub fn clamped_to(&self, cap: &Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.min(cap.cpu_millis),
            memory_bytes: self.memory_bytes.min(cap.memory_bytes),
            pods: self.pods.min(cap.pods),
            storage_bytes: self.storage_bytes.min(cap.storage_bytes),
        }
    }

    /// Smallest component of the vector, used as a scalar "headroom" score
    /// when ranking otherwise-equal scheduling candidates.
    pub fn min_component(&self) -> u64 {
        self.cpu_millis
            .min(self.memory_bytes)
            .min(self.pods)
            .min(self.storage_bytes)
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;
