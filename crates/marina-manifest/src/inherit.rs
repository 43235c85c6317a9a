// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Property inheritance between containers and their children.
//!
//! Every node kind exposes the same capability set through [`Inheritable`]:
//! read its operation, hand props to children, fill missing props from its
//! parent, and check that explicitly declared paths agree with the parent.
//! All path work delegates to [`crate::path::merge_inherited`].

use crate::model::{
    App, Build, DataHolder, Deployment, DeploymentTemplate, ResourceKind, Task, Workflow,
};
use crate::path::{InheritedProps, Operation, ResourcePath, merge_inherited};
use crate::validation::ValidationError;

/// Uniform inheritance capability of manifest nodes.
pub trait Inheritable {
    fn kind(&self) -> ResourceKind;
    fn operation(&self) -> Option<Operation>;
    fn operation_mut(&mut self) -> &mut Option<Operation>;
    fn source(&self) -> Option<&ResourcePath>;
    fn source_mut(&mut self) -> &mut Option<ResourcePath>;
    fn destination(&self) -> Option<&ResourcePath>;
    fn destination_mut(&mut self) -> &mut Option<ResourcePath>;

    /// Props this node hands to its children.
    fn inherited_props(&self) -> InheritedProps {
        InheritedProps {
            source: self.source().cloned(),
            destination: self.destination().cloned(),
            operation: self.operation(),
        }
    }
}

/// Fill the node's unset operation and missing path coordinates from `props`.
///
/// Monotone and idempotent: a set field is never replaced, and applying the
/// same props twice changes nothing the second time.
pub fn inherit<N: Inheritable + ?Sized>(node: &mut N, props: &InheritedProps) {
    if node.operation().is_none() {
        *node.operation_mut() = props.operation;
    }
    merge_inherited(node.source_mut(), props.source.as_ref());
    merge_inherited(node.destination_mut(), props.destination.as_ref());
}

/// Check the node's source against the parent's source.
pub fn compare_source<N: Inheritable + ?Sized>(
    node: &N,
    parent: Option<&ResourcePath>,
    parent_kind: ResourceKind,
) -> Result<(), ValidationError> {
    match (node.source(), parent) {
        (Some(own), Some(parent)) if !own.conflicts_with(parent).is_empty() => {
            Err(ValidationError::SourceNotSame {
                kind: node.kind(),
                parent: parent_kind,
            })
        }
        _ => Ok(()),
    }
}

/// Check the node's destination against the parent's destination.
pub fn compare_destination<N: Inheritable + ?Sized>(
    node: &N,
    parent: Option<&ResourcePath>,
    parent_kind: ResourceKind,
) -> Result<(), ValidationError> {
    match (node.destination(), parent) {
        (Some(own), Some(parent)) if !own.conflicts_with(parent).is_empty() => {
            Err(ValidationError::DestinationNotSame {
                kind: node.kind(),
                parent: parent_kind,
            })
        }
        _ => Ok(()),
    }
}

macro_rules! impl_inheritable {
    ($ty:ty, $kind:expr) => {
        impl Inheritable for $ty {
            fn kind(&self) -> ResourceKind {
                $kind
            }
            fn operation(&self) -> Option<Operation> {
                self.operation
            }
            fn operation_mut(&mut self) -> &mut Option<Operation> {
                &mut self.operation
            }
            fn source(&self) -> Option<&ResourcePath> {
                self.source.as_ref()
            }
            fn source_mut(&mut self) -> &mut Option<ResourcePath> {
                &mut self.source
            }
            fn destination(&self) -> Option<&ResourcePath> {
                self.destination.as_ref()
            }
            fn destination_mut(&mut self) -> &mut Option<ResourcePath> {
                &mut self.destination
            }
        }
    };
}

impl_inheritable!(App, ResourceKind::App);
impl_inheritable!(Workflow, ResourceKind::Workflow);
impl_inheritable!(Build, ResourceKind::Build);
impl_inheritable!(Deployment, ResourceKind::Deployment);
impl_inheritable!(DeploymentTemplate, ResourceKind::DeploymentTemplate);
impl_inheritable!(Task, ResourceKind::Task);

/// Data holders carry their kind separately since configmaps and secrets
/// share one record type.
pub struct Holder<'a> {
    pub kind: ResourceKind,
    pub node: &'a mut DataHolder,
}

impl Inheritable for Holder<'_> {
    fn kind(&self) -> ResourceKind {
        self.kind
    }
    fn operation(&self) -> Option<Operation> {
        self.node.operation
    }
    fn operation_mut(&mut self) -> &mut Option<Operation> {
        &mut self.node.operation
    }
    fn source(&self) -> Option<&ResourcePath> {
        self.node.source.as_ref()
    }
    fn source_mut(&mut self) -> &mut Option<ResourcePath> {
        &mut self.node.source
    }
    fn destination(&self) -> Option<&ResourcePath> {
        self.node.destination.as_ref()
    }
    fn destination_mut(&mut self) -> &mut Option<ResourcePath> {
        &mut self.node.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathField;

    fn props(op: Option<Operation>, dest: ResourcePath) -> InheritedProps {
        InheritedProps {
            source: None,
            destination: Some(dest),
            operation: op,
        }
    }

    #[test]
    fn test_inherit_fills_operation_and_destination() {
        let mut build = Build {
            destination: Some(ResourcePath {
                app: Some(String::new()),
                workflow: Some(String::new()),
                pipeline: Some("p".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let parent = ResourcePath::app("a").with(PathField::Workflow, "w");
        inherit(&mut build, &props(Some(Operation::Create), parent));

        assert_eq!(build.operation, Some(Operation::Create));
        let dest = build.destination.unwrap();
        assert_eq!(dest.app.as_deref(), Some("a"));
        assert_eq!(dest.workflow.as_deref(), Some("w"));
        assert_eq!(dest.pipeline.as_deref(), Some("p"));
    }

    #[test]
    fn test_inherit_is_idempotent() {
        let mut once = Workflow {
            destination: Some(ResourcePath::default().with(PathField::Workflow, "w")),
            ..Default::default()
        };
        let p = props(Some(Operation::Clone), ResourcePath::app("a"));
        inherit(&mut once, &p);
        let mut twice = once.clone();
        inherit(&mut twice, &p);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_inherit_never_overwrites_operation() {
        let mut task = Task {
            operation: Some(Operation::Delete),
            ..Default::default()
        };
        inherit(&mut task, &props(Some(Operation::Create), ResourcePath::app("a")));
        assert_eq!(task.operation, Some(Operation::Delete));
    }

    #[test]
    fn test_inherit_keeps_undefined_verb() {
        let mut task = Task {
            operation: Some(Operation::Undefined),
            ..Default::default()
        };
        inherit(&mut task, &props(Some(Operation::Create), ResourcePath::app("a")));
        assert_eq!(task.operation, Some(Operation::Undefined));
    }

    #[test]
    fn test_compare_destination_detects_conflict() {
        let deployment = Deployment {
            destination: Some(ResourcePath::app("other")),
            ..Default::default()
        };
        let parent = ResourcePath::app("a");
        let err = compare_destination(&deployment, Some(&parent), ResourceKind::Workflow)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "destination not same for deployment and workflow"
        );
    }

    #[test]
    fn test_compare_source_accepts_disjoint_fields() {
        let deployment = Deployment {
            source: Some(ResourcePath::default().with(PathField::Environment, "qa")),
            ..Default::default()
        };
        let parent = ResourcePath::app("a");
        assert!(compare_source(&deployment, Some(&parent), ResourceKind::Workflow).is_ok());
        assert!(compare_source(&deployment, None, ResourceKind::Workflow).is_ok());
    }

    #[test]
    fn test_holder_inherits_through_wrapper() {
        let mut cm = DataHolder::default();
        let mut holder = Holder {
            kind: ResourceKind::ConfigMap,
            node: &mut cm,
        };
        inherit(&mut holder, &props(Some(Operation::Create), ResourcePath::app("a")));
        assert_eq!(holder.kind(), ResourceKind::ConfigMap);
        assert_eq!(cm.operation, Some(Operation::Create));
        assert_eq!(cm.destination.unwrap().app.as_deref(), Some("a"));
    }
}
