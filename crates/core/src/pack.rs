// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pack: a versioned executable bundle.
//!
//! Packs are immutable once published. A pack id identifies the lineage;
//! each published version is its own record.

use crate::id::UserId;
use crate::node::RuntimeType;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Identifier for a pack lineage (shared by all versions).
    pub struct PackId("pack-");
}

/// Which node runtimes may execute the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeTag {
    #[serde(rename = "node-only")]
    NodeOnly,
    #[serde(rename = "browser-only")]
    BrowserOnly,
    #[serde(rename = "universal")]
    Universal,
}

impl RuntimeTag {
    /// The runtime a non-universal pack requires.
    pub fn required_runtime(&self) -> Option<RuntimeType> {
        match self {
            RuntimeTag::NodeOnly => Some(RuntimeType::Native),
            RuntimeTag::BrowserOnly => Some(RuntimeType::Browser),
            RuntimeTag::Universal => None,
        }
    }

    pub fn allows(&self, runtime: RuntimeType) -> bool {
        match self.required_runtime() {
            Some(required) => required == runtime,
            None => true,
        }
    }
}

impl std::fmt::Display for RuntimeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeTag::NodeOnly => "node-only",
            RuntimeTag::BrowserOnly => "browser-only",
            RuntimeTag::Universal => "universal",
        };
        write!(f, "{s}")
    }
}

/// Who may run the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackVisibility {
    Private,
    Public,
}

/// Executable payload: inline bytes (base64) or a content-addressed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bundle {
    Inline {
        bundle: String,
    },
    Path {
        #[serde(rename = "bundlePath")]
        bundle_path: String,
    },
}

/// Pack metadata. `min_runtime_version` gates scheduling; the rest is
/// opaque to the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_runtime_version: Option<semver::Version>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One published version of a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub id: PackId,
    pub name: String,
    pub version: semver::Version,
    pub runtime_tag: RuntimeTag,
    #[serde(flatten)]
    pub bundle: Bundle,
    #[serde(default)]
    pub metadata: PackMetadata,
    pub owner_id: UserId,
    pub visibility: PackVisibility,
}

impl Pack {
    /// Visibility check: public packs are open, private packs are limited
    /// to their owner.
    pub fn accessible_by(&self, user: &UserId) -> bool {
        match self.visibility {
            PackVisibility::Public => true,
            PackVisibility::Private => self.owner_id == *user,
        }
    }

    /// True when a node's reported runtime version satisfies the pack's
    /// minimum. Packs without a minimum accept any node; a node that did
    /// not report a version fails a pack that has one.
    pub fn runtime_version_ok(&self, node_version: Option<&semver::Version>) -> bool {
        match (&self.metadata.min_runtime_version, node_version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(min), Some(have)) => have >= min,
        }
    }
}

#[cfg(test)]
#[path = "pack_tests.rs"]
mod tests;
