// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pure transformations from manifest nodes to the shapes the build engine
//! and the release manager accept.

use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::model::{DeploymentStrategy, Stage, Task};

/// Version stamped on every rendered stage document.
pub const STAGE_DOCUMENT_VERSION: &str = "0.0.1";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransformError {
    #[error("{label} script doesnt have all unique index")]
    DuplicateStagePosition { label: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stringify docker build arguments. Strings are kept verbatim, every other
/// value uses its JSON text.
pub fn docker_arguments(args: &Map<String, Value>) -> BTreeMap<String, String> {
    args.iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// One script of a build task as the build engine expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageScript {
    pub index: u32,
    pub name: String,
    pub script: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
}

/// Position of a stage: explicit wins, else 1-based declaration index.
pub fn stage_position(stage: &Stage, index: usize) -> u32 {
    stage
        .position
        .unwrap_or_else(|| u32::try_from(index + 1).unwrap_or(u32::MAX))
}

/// Flatten a task into its ordered script list. `label` names the task in
/// the error (`preBuild`, `postBuild`, ...).
pub fn task_scripts(task: Option<&Task>, label: &str) -> Result<Vec<StageScript>, TransformError> {
    let Some(task) = task else {
        return Ok(Vec::new());
    };

    let mut seen = HashSet::new();
    let mut scripts = Vec::with_capacity(task.stages.len());
    for (i, stage) in task.stages.iter().enumerate() {
        let index = stage_position(stage, i);
        if !seen.insert(index) {
            return Err(TransformError::DuplicateStagePosition {
                label: label.to_string(),
            });
        }
        scripts.push(StageScript {
            index,
            name: stage.name.clone(),
            script: stage.script.clone().unwrap_or_default(),
            output_location: stage.output_location.clone(),
        });
    }
    Ok(scripts)
}

/// Which side of a deployment a stage document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSlot {
    Before,
    After,
}

impl StageSlot {
    fn key(&self) -> &'static str {
        match self {
            StageSlot::Before => "beforeStages",
            StageSlot::After => "afterStages",
        }
    }
}

/// Render a deployment pre/post task into its stage document. Stages with
/// no name or no script are left out. Returns `None` when there is no task.
pub fn stage_document(task: Option<&Task>, slot: StageSlot) -> Result<Option<String>, TransformError> {
    let Some(task) = task else {
        return Ok(None);
    };

    let stages: Vec<Value> = task
        .stages
        .iter()
        .filter(|s| {
            let keep = !s.name.trim().is_empty() && s.has_script();
            if !keep {
                debug!(stage = %s.name, slot = slot.key(), "Eliding stage without name or script");
            }
            keep
        })
        .map(|s| {
            let mut entry = json!({
                "name": s.name,
                "script": s.script,
            });
            if let Some(location) = s.output_location.as_deref().filter(|l| !l.is_empty()) {
                entry["outputLocation"] = Value::String(location.to_string());
            }
            entry
        })
        .collect();

    let mut conf = Map::new();
    conf.insert(slot.key().to_string(), Value::Array(stages));
    let document = json!({
        "version": STAGE_DOCUMENT_VERSION,
        "cdPipelineConf": [Value::Object(conf)],
    });
    Ok(Some(serde_json::to_string(&document)?))
}

/// One strategy as the release manager stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub deployment_template: String,
    pub config: String,
    pub default: bool,
}

/// One entry per declared variant, in canonical order.
pub fn strategies(strategy: &DeploymentStrategy) -> Result<Vec<StrategyConfig>, TransformError> {
    strategy
        .declared()
        .into_iter()
        .map(|(variant, body)| {
            let config = json!({
                "deployment": {"strategy": {variant.key(): body}}
            });
            Ok(StrategyConfig {
                deployment_template: variant.label().to_string(),
                config: serde_json::to_string(&config)?,
                default: strategy.default == variant.label(),
            })
        })
        .collect()
}
