// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Marina Core - app lifecycle orchestration
//!
//! This crate turns declarative app manifests into calls on the platform's
//! services and drives app-store installs through a GitOps pipeline, with
//! every install step persisted so it can resume after a crash.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │   manifest (JSON)            │     │   install / bulk request     │
//! └──────────────────────────────┘     └──────────────────────────────┘
//!               │                                     │
//!               ▼                                     ▼
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │ marina-manifest              │     │ install::InstallService      │
//! │ parse, inherit, validate     │     │ DB phase (txn) ──▶ stream    │
//! └──────────────────────────────┘     │ GIT ──▶ ACD ──▶ DEPLOY       │
//!               │                      └──────────────────────────────┘
//!               ▼                          │                  │
//! ┌──────────────────────────────┐         ▼                  ▼
//! │ dispatch: per-kind executors │   ┌───────────┐   ┌─────────────────┐
//! └──────────────────────────────┘   │ SQL store │   │ git/argo/helm   │
//!               │                    └───────────┘   └─────────────────┘
//!               ▼
//! ┌──────────────────────────────┐
//! │ collaborators (apps, CI, CD, │
//! │ config maps, charts, ...)    │
//! └──────────────────────────────┘
//! ```
//!
//! # Install status
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `DEPLOY_INIT` | Rows written by the DB phase |
//! | `ENQUEUED` / `QUE_ERROR` | Bulk item published / publish failed |
//! | `GIT_SUCCESS` / `GIT_ERROR` | Chart committed to the gitops repo |
//! | `ACD_SUCCESS` / `ACD_ERROR` | Release-controller application synced |
//! | `DEPLOY_SUCCESS` | Terminal success |
//! | `HELM_ERROR` | Release manager install failed |
//! | `TRIGGER_ERROR` | Queued stage could not be started |
//!
//! Status writes are conditional on the stored predecessor status, so a
//! redelivered or retried stage never moves an install backwards.

/// Configuration loaded from environment variables.
pub mod config;

/// Contracts of the services marina drives, plus in-memory implementations.
pub mod collaborators;

/// Durable install state (PostgreSQL and SQLite).
pub mod persistence;

/// Embedded database migrations.
pub mod migrations;

/// GitOps install pipeline, upgrade, rollback, delete and history.
pub mod install;

/// Manifest action dispatcher.
pub mod dispatch;

/// Bulk chart-group installs over a durable message stream.
pub mod bulk;

/// Crate-level error type.
pub mod error;

pub use error::{Error, Result};
