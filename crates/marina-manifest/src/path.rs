// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource identification paths and the operation verbs carried by nodes.
//!
//! A [`ResourcePath`] is a tuple of optional coordinates. Nodes never point at
//! each other directly; every reference (parent, previous pipeline, clone
//! source) is a path resolved by name at dispatch time.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identification tuple for any node of an app manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// One coordinate of a [`ResourcePath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathField {
    App,
    Workflow,
    Pipeline,
    Environment,
    ConfigMap,
    Secret,
    Uid,
}

impl PathField {
    /// Every field, in declaration order.
    pub const ALL: [PathField; 7] = [
        PathField::App,
        PathField::Workflow,
        PathField::Pipeline,
        PathField::Environment,
        PathField::ConfigMap,
        PathField::Secret,
        PathField::Uid,
    ];
}

impl ResourcePath {
    /// Path naming a single app.
    pub fn app(name: impl Into<String>) -> Self {
        Self {
            app: Some(name.into()),
            ..Default::default()
        }
    }

    /// Builder-style setter used mostly by tests and request builders.
    pub fn with(mut self, field: PathField, value: impl Into<String>) -> Self {
        *self.slot_mut(field) = Some(value.into());
        self
    }

    /// Read a coordinate. Empty strings count as absent.
    pub fn get(&self, field: PathField) -> Option<&str> {
        let slot = match field {
            PathField::App => &self.app,
            PathField::Workflow => &self.workflow,
            PathField::Pipeline => &self.pipeline,
            PathField::Environment => &self.environment,
            PathField::ConfigMap => &self.config_map,
            PathField::Secret => &self.secret,
            PathField::Uid => &self.uid,
        };
        slot.as_deref().filter(|v| !v.is_empty())
    }

    /// True when the coordinate is present and non-empty.
    pub fn has(&self, field: PathField) -> bool {
        self.get(field).is_some()
    }

    /// True when no coordinate is set.
    pub fn is_empty(&self) -> bool {
        PathField::ALL.iter().all(|f| !self.has(*f))
    }

    fn slot_mut(&mut self, field: PathField) -> &mut Option<String> {
        match field {
            PathField::App => &mut self.app,
            PathField::Workflow => &mut self.workflow,
            PathField::Pipeline => &mut self.pipeline,
            PathField::Environment => &mut self.environment,
            PathField::ConfigMap => &mut self.config_map,
            PathField::Secret => &mut self.secret,
            PathField::Uid => &mut self.uid,
        }
    }

    /// Fill every absent coordinate from `parent`. Present coordinates are
    /// never overwritten.
    pub fn merge_from(&mut self, parent: &ResourcePath) {
        for field in PathField::ALL {
            if !self.has(field)
                && let Some(value) = parent.get(field)
            {
                *self.slot_mut(field) = Some(value.to_string());
            }
        }
    }

    /// Fields populated on both sides whose values differ.
    pub fn conflicts_with(&self, other: &ResourcePath) -> Vec<PathField> {
        PathField::ALL
            .into_iter()
            .filter(|f| match (self.get(*f), other.get(*f)) {
                (Some(a), Some(b)) => a != b,
                _ => false,
            })
            .collect()
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = PathField::ALL
            .iter()
            .filter_map(|field| self.get(*field).map(|v| format!("{:?}={}", field, v)))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Path equality: both absent, or both present with every coordinate equal.
pub fn equal(a: Option<&ResourcePath>, b: Option<&ResourcePath>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => PathField::ALL.iter().all(|f| a.get(*f) == b.get(*f)),
        _ => false,
    }
}

/// Fill the absent coordinates of `child` from `parent`.
///
/// An absent child path becomes a copy of the parent path. An absent parent
/// leaves the child untouched.
pub fn merge_inherited(child: &mut Option<ResourcePath>, parent: Option<&ResourcePath>) {
    let Some(parent) = parent else {
        return;
    };
    match child {
        Some(child) => child.merge_from(parent),
        None => *child = Some(parent.clone()),
    }
}

/// Operation verb of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Clone,
    Edit,
    Append,
    Delete,
    /// Any verb that is not recognised.
    #[serde(other)]
    Undefined,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Clone => "clone",
            Operation::Edit => "edit",
            Operation::Append => "append",
            Operation::Delete => "delete",
            Operation::Undefined => "undefined",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deserialize an operation where `""` and `null` mean "not set".
pub(crate) fn operation_or_unset<'de, D>(deserializer: D) -> Result<Option<Operation>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("create") => Some(Operation::Create),
        Some("clone") => Some(Operation::Clone),
        Some("edit") => Some(Operation::Edit),
        Some("append") => Some(Operation::Append),
        Some("delete") => Some(Operation::Delete),
        Some(_) => Some(Operation::Undefined),
    })
}

/// Trigger mode of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Automatic,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Automatic => "AUTOMATIC",
            Trigger::Manual => "MANUAL",
        }
    }
}

/// Props a container hands to each of its children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritedProps {
    pub source: Option<ResourcePath>,
    pub destination: Option<ResourcePath>,
    pub operation: Option<Operation>,
}
