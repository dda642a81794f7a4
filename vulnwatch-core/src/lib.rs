//! # Vulnwatch Core
//!
//! Reconciliation engine that keeps one vulnerability report per
//! (workload, container) in step with the image the container actually runs.
//!
//! ## Overview
//!
//! Two level-triggered control loops cooperate through the execution
//! substrate and the report store:
//!
//! - **Workload loop** ([`reconcile::WorkloadReconciler`]): inspects a live
//!   workload and makes sure every container has a current report or exactly
//!   one scan in flight.
//! - **Scan-job loop** ([`reconcile::ScanJobReconciler`]): turns finished scan
//!   jobs into reports, retries failed ones within a budget, and deletes jobs
//!   whose owner went away.
//!
//! The [`runtime::Operator`] owns both loops, feeds them from workload and
//! job observations, and retries failed reconciles with backoff.
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL-backed [`store::ReportStore`] (SQLx)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vulnwatch_core::{
//!     config::OperatorConfig,
//!     events::InProcEventBus,
//!     runtime::Operator,
//!     store::InMemoryReportStore,
//!     substrate::InMemorySubstrate,
//! };
//!
//! async fn run() -> vulnwatch_core::Result<()> {
//!     let mut config = OperatorConfig::default();
//!     config.scanner_trivy.enabled = true;
//!
//!     let operator = Operator::from_config(
//!         config,
//!         Arc::new(InMemorySubstrate::new()),
//!         Arc::new(InMemoryReportStore::new()),
//!         Arc::new(InProcEventBus::default()),
//!     )?;
//!     operator.start().await?;
//!     operator.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod inspect;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod runtime;
pub mod scanner;
pub mod store;
pub mod substrate;

pub use error::{CoreError, Result, ScanError};

/// Embedded migrations for the Postgres report store.
#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
