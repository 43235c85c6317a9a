// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment history view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use super::{InstallService, Result};

/// One history row as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHistoryEntry {
    pub id: i64,
    pub installed_app_version_id: i64,
    pub status: String,
    pub git_hash: Option<String>,
    pub started_on: DateTime<Utc>,
    pub finished_on: Option<DateTime<Utc>>,
    /// Author email; deleted users still resolve.
    pub deployed_by: String,
}

impl InstallService {
    /// History of an installed app, newest first, with author emails.
    pub async fn deployment_history(&self, installed_app_id: i64) -> Result<Vec<DeploymentHistoryEntry>> {
        let rows = self
            .store
            .list_history_for_installed_app(installed_app_id)
            .await?;

        let mut emails: HashMap<i64, String> = HashMap::new();
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            let deployed_by = match emails.get(&row.created_by) {
                Some(email) => email.clone(),
                None => {
                    let email = match self
                        .collaborators
                        .users
                        .get_by_id_include_deleted(row.created_by)
                        .await
                    {
                        Ok(user) => user.email_id,
                        Err(e) => {
                            debug!(user_id = row.created_by, error = %e, "Author not resolved");
                            String::new()
                        }
                    };
                    emails.insert(row.created_by, email.clone());
                    email
                }
            };
            entries.push(DeploymentHistoryEntry {
                id: row.id,
                installed_app_version_id: row.installed_app_version_id,
                status: row.status,
                git_hash: row.git_hash,
                started_on: row.started_on,
                finished_on: row.finished_on,
                deployed_by,
            });
        }
        Ok(entries)
    }
}
