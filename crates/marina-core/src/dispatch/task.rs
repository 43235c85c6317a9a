// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pre/post tasks. A task has no side effect of its own; its owner sends
//! the flattened scripts along with the pipeline.

use marina_manifest::transform::{StageScript, StageSlot, stage_document, task_scripts};
use marina_manifest::{InheritedProps, Task, inherit};

use super::Result;

/// Scripts of a build task, `label` naming it in errors.
pub fn build_scripts(
    task: Option<&mut Task>,
    props: &InheritedProps,
    label: &str,
) -> Result<Vec<StageScript>> {
    let task = inherited(task, props);
    Ok(task_scripts(task, label)?)
}

/// Stage document of a deployment task.
pub fn deployment_stage(
    task: Option<&mut Task>,
    props: &InheritedProps,
    slot: StageSlot,
) -> Result<Option<String>> {
    let task = inherited(task, props);
    Ok(stage_document(task, slot)?)
}

fn inherited<'a>(task: Option<&'a mut Task>, props: &InheritedProps) -> Option<&'a Task> {
    let task = task?;
    inherit(task, props);
    Some(&*task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marina_manifest::{Operation, Stage};

    fn stage(name: &str, position: Option<u32>) -> Stage {
        Stage {
            name: name.into(),
            script: Some("echo".into()),
            position,
            ..Default::default()
        }
    }

    #[test]
    fn test_position_defaulting() {
        let mut task = Task {
            stages: vec![stage("s1", None), stage("s2", Some(5)), stage("s3", None)],
            ..Default::default()
        };
        let props = InheritedProps {
            operation: Some(Operation::Create),
            ..Default::default()
        };
        let scripts = build_scripts(Some(&mut task), &props, "preBuild").unwrap();
        let positions: Vec<u32> = scripts.iter().map(|s| s.index).collect();
        assert_eq!(positions, vec![1, 5, 3]);
        assert_eq!(task.operation, Some(Operation::Create));
    }

    #[test]
    fn test_duplicate_positions_rejected() {
        let mut task = Task {
            stages: vec![stage("a", Some(2)), stage("b", Some(2))],
            ..Default::default()
        };
        let err = build_scripts(Some(&mut task), &InheritedProps::default(), "preBuild")
            .unwrap_err();
        assert_eq!(err.to_string(), "preBuild script doesnt have all unique index");
    }

    #[test]
    fn test_missing_task_is_empty() {
        assert!(
            build_scripts(None, &InheritedProps::default(), "postBuild")
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            deployment_stage(None, &InheritedProps::default(), StageSlot::Before).unwrap(),
            None
        );
    }
}
