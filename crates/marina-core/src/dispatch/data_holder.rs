// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configmap and secret executor.
//!
//! Both kinds share one record type and one handler set; the kind decides
//! which store is written and which path coordinate names the entry.

use serde_json::{Map, Value};
use tracing::{debug, info};

use marina_manifest::{
    DataHolder, Holder, InheritedProps, Operation, PathField, ResourceKind, ResourcePath,
    ValidationError, inherit,
};

use crate::collaborators::{AppRecord, ConfigDocument, ConfigEntry, ConfigKind};

use super::{ActionContext, ActionError, Result, resolve_err, unhandled};

pub async fn execute(
    holder: &mut DataHolder,
    kind: ResourceKind,
    props: &InheritedProps,
    ctx: &ActionContext,
) -> Result<()> {
    inherit(&mut Holder { kind, node: holder }, props);
    ctx.ensure_active()?;

    let store_kind = match kind {
        ResourceKind::ConfigMap => ConfigKind::ConfigMap,
        ResourceKind::Secret => ConfigKind::Secret,
        other => {
            return Err(ActionError::Resolution(format!(
                "{} is not a data holder",
                other
            )));
        }
    };
    let handler = DataHolderHandler {
        holder,
        kind,
        store_kind,
        ctx,
    };
    match holder.operation {
        Some(Operation::Clone) => handler.clone_entry().await,
        Some(Operation::Edit) | Some(Operation::Append) => handler.overlay_in_place().await,
        Some(Operation::Delete) => handler.delete().await,
        Some(Operation::Create) => handler.create().await,
        other => Err(unhandled(other, kind)),
    }
}

/// Apply `changes` to `data`; an empty string value removes the key.
pub fn overlay(data: &mut Map<String, Value>, changes: &Map<String, Value>) {
    for (key, value) in changes {
        match value {
            Value::String(s) if s.is_empty() => {
                data.remove(key);
            }
            other => {
                data.insert(key.clone(), other.clone());
            }
        }
    }
}

struct DataHolderHandler<'a> {
    holder: &'a DataHolder,
    kind: ResourceKind,
    store_kind: ConfigKind,
    ctx: &'a ActionContext,
}

impl DataHolderHandler<'_> {
    fn entry_name<'p>(&self, path: &'p ResourcePath) -> Option<&'p str> {
        let field = self.kind.name_field().unwrap_or(PathField::ConfigMap);
        path.get(field).filter(|n| !n.is_empty())
    }

    async fn app(&self, path: &ResourcePath) -> Result<AppRecord> {
        let name = path
            .app
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ActionError::Resolution(format!("app cannot be empty for {}", self.kind)))?;
        self.ctx
            .collaborators
            .apps
            .find_active_by_name(name)
            .await
            .map_err(resolve_err("app", name))
    }

    async fn environment_id(&self, path: &ResourcePath) -> Result<Option<i64>> {
        match path.environment.as_deref().filter(|e| !e.is_empty()) {
            None => Ok(None),
            Some(name) => {
                let environment = self
                    .ctx
                    .collaborators
                    .environments
                    .find_one(name)
                    .await
                    .map_err(resolve_err("environment", name))?;
                Ok(Some(environment.id))
            }
        }
    }

    async fn fetch(&self, app_id: i64, environment_id: Option<i64>) -> Result<ConfigDocument> {
        Ok(self
            .ctx
            .collaborators
            .config_maps
            .fetch(self.store_kind, app_id, environment_id)
            .await?)
    }

    async fn save(&self, document: ConfigDocument) -> Result<ConfigDocument> {
        Ok(self
            .ctx
            .collaborators
            .config_maps
            .add_update(self.store_kind, document)
            .await?)
    }

    /// Copy the source entry (or every entry when none is named) to the
    /// destination, overlaying the node's data.
    async fn clone_entry(&self) -> Result<()> {
        let destination = self
            .holder
            .destination
            .as_ref()
            .filter(|d| !d.is_empty())
            .ok_or(ValidationError::CloneDestinationMissing { kind: self.kind })?;
        let source = self
            .holder
            .source
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::CloneSourceMissing { kind: self.kind })?;

        let source_app = self.app(source).await?;
        let source_env = self.environment_id(source).await?;
        let source_doc = self.fetch(source_app.id, source_env).await?;

        let destination_app = self.app(destination).await?;
        let destination_env = self.environment_id(destination).await?;
        let existing = self.fetch(destination_app.id, destination_env).await?;

        let destination_name = self.entry_name(destination);
        let source_name = self.entry_name(source).or(destination_name);
        let entries: Vec<ConfigEntry> = match source_name {
            Some(name) => {
                let mut entry = source_doc.entry(name).cloned().ok_or_else(|| {
                    ActionError::Resolution(format!("source not found to clone {}", self.kind))
                })?;
                overlay(&mut entry.data, &self.holder.data);
                if let Some(target) = destination_name {
                    entry.name = target.to_string();
                }
                vec![entry]
            }
            None if source_doc.entries.is_empty() => {
                return Err(ActionError::Resolution(format!(
                    "source not found to clone {}",
                    self.kind
                )));
            }
            None => source_doc.entries,
        };

        let count = entries.len();
        self.save(ConfigDocument {
            id: existing.id,
            app_id: destination_app.id,
            environment_id: destination_env,
            entries: entries
                .into_iter()
                .map(|mut e| {
                    e.global = destination_env.is_none();
                    e
                })
                .collect(),
        })
        .await?;

        info!(
            kind = %self.kind,
            source = %source,
            destination = %destination,
            entries = count,
            "Cloned"
        );
        Ok(())
    }

    /// Edit or append: the destination is both source and target.
    async fn overlay_in_place(&self) -> Result<()> {
        let (app, environment_id, name) = self.identify().await?;
        let mut document = self.fetch(app.id, environment_id).await?;
        let mut entry = document.entry(name).cloned().ok_or_else(|| {
            ActionError::Resolution(format!("configdata missing for {}", self.kind))
        })?;
        overlay(&mut entry.data, &self.holder.data);
        document.entries = vec![entry];
        self.save(document).await?;

        info!(kind = %self.kind, app = %app.app_name, name = %name, "Updated in place");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let (app, environment_id, name) = self.identify().await?;

        if self.holder.data.is_empty() {
            return match self
                .ctx
                .collaborators
                .config_maps
                .delete(self.store_kind, app.id, environment_id, name)
                .await
            {
                Ok(()) => {
                    info!(kind = %self.kind, app = %app.app_name, name = %name, "Deleted");
                    Ok(())
                }
                Err(e) if e.is_not_found() => Err(ActionError::Resolution(format!(
                    "unable to delete {} named {}",
                    self.kind, name
                ))),
                Err(e) => Err(e.into()),
            };
        }

        // Keys-only delete.
        let mut document = self.fetch(app.id, environment_id).await?;
        let mut entry = document.entry(name).cloned().ok_or_else(|| {
            ActionError::Resolution(format!("configdata missing for {}", self.kind))
        })?;
        for key in self.holder.data.keys() {
            entry.data.remove(key);
        }
        document.entries = vec![entry];
        self.save(document).await?;

        debug!(kind = %self.kind, app = %app.app_name, name = %name, keys = self.holder.data.len(), "Keys deleted");
        Ok(())
    }

    async fn create(&self) -> Result<()> {
        let destination = self.holder.destination.as_ref().ok_or_else(|| {
            ActionError::Resolution(format!("destination cannot be empty for {}", self.kind))
        })?;
        let app = self.app(destination).await?;
        let name = self
            .entry_name(destination)
            .ok_or(ValidationError::NameEmpty { kind: self.kind })?;
        if !self.holder.external && self.holder.data.is_empty() {
            return Err(ValidationError::DataEmpty { kind: self.kind }.into());
        }
        let environment_id = self.environment_id(destination).await?;

        let entry = ConfigEntry {
            name: name.to_string(),
            kind: self.holder.kind.clone(),
            external: self.holder.external,
            mount_path: self.holder.mount_path.clone(),
            data: self.holder.data.clone(),
            default_data: None,
            default_mount_path: None,
            global: environment_id.is_none(),
            external_secret_type: self.holder.external_type.clone(),
        };

        // An existing document supplies the id, making create an upsert.
        let id = match self.fetch(app.id, environment_id).await {
            Ok(existing) => existing.id,
            Err(e) => {
                debug!(kind = %self.kind, error = %e, "No existing document");
                None
            }
        };
        self.save(ConfigDocument {
            id,
            app_id: app.id,
            environment_id,
            entries: vec![entry],
        })
        .await
        .map_err(|e| {
            ActionError::Resolution(format!(
                "error `{}` creating {} name {}",
                e, self.kind, name
            ))
        })?;

        info!(kind = %self.kind, app = %app.app_name, name = %name, global = environment_id.is_none(), "Created");
        Ok(())
    }

    /// App, environment and entry name of the destination.
    async fn identify(&self) -> Result<(AppRecord, Option<i64>, &str)> {
        let not_unique =
            || ActionError::Resolution(format!("{} not uniquely identifiable", self.kind));
        let destination = self.holder.destination.as_ref().ok_or_else(not_unique)?;
        let name = self.entry_name(destination).ok_or_else(not_unique)?;
        if destination.app.as_deref().is_none_or(str::is_empty) {
            return Err(not_unique());
        }
        let app = self.app(destination).await?;
        let environment_id = self.environment_id(destination).await?;
        Ok((app, environment_id, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlay_sets_and_removes() {
        let mut data = json!({"a": "1", "b": "2", "c": "3"})
            .as_object()
            .cloned()
            .unwrap();
        let changes = json!({"a": "10", "b": "", "d": 4}).as_object().cloned().unwrap();
        overlay(&mut data, &changes);
        assert_eq!(
            Value::Object(data),
            json!({"a": "10", "c": "3", "d": 4})
        );
    }

    #[test]
    fn test_overlay_is_idempotent() {
        let mut data = json!({"a": "1"}).as_object().cloned().unwrap();
        let changes = json!({"a": "", "b": "x"}).as_object().cloned().unwrap();
        overlay(&mut data, &changes);
        let once = data.clone();
        overlay(&mut data, &changes);
        assert_eq!(data, once);
    }
}
