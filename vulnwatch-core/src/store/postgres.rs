//! Postgres-backed report store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::fmt;
use tracing::info;

use super::ReportStore;
use crate::{
    error::{CoreError, Result},
    model::{ImageHash, ImageReference, Report, ReportKey, WorkloadKey},
};

const SELECT_COLUMNS: &str = r#"
    namespace, workload, container, owner_uid, image, image_hash,
    scanner, findings, summary, operator, generated_at, revision
"#;

#[derive(Clone)]
pub struct PostgresReportStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresReportStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresReportStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresReportStore {
    /// Connects the store and verifies the database answers.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                CoreError::Store(format!(
                    "report store failed Postgres health check: {e}"
                ))
            })?;
        info!("Report store connected to Postgres");
        Ok(Self { pool })
    }

    /// Applies the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await.map_err(|e| {
            CoreError::Store(format!("report store migration failed: {e}"))
        })
    }

    fn decode(row: &PgRow) -> Result<Report> {
        let image: String = row.try_get("image")?;
        let image = ImageReference::parse(&image).map_err(|e| {
            CoreError::Store(format!("stored report has invalid image: {e}"))
        })?;
        let generated_at: DateTime<Utc> = row.try_get("generated_at")?;
        let revision: i64 = row.try_get("revision")?;

        Ok(Report {
            key: ReportKey {
                namespace: row.try_get("namespace")?,
                workload: row.try_get("workload")?,
                container: row.try_get("container")?,
            },
            owner_uid: row.try_get("owner_uid")?,
            image,
            image_hash: ImageHash::new(row.try_get::<String, _>("image_hash")?),
            scanner: serde_json::from_value(row.try_get("scanner")?)?,
            findings: serde_json::from_value(row.try_get("findings")?)?,
            summary: serde_json::from_value(row.try_get("summary")?)?,
            operator: serde_json::from_value(row.try_get("operator")?)?,
            generated_at,
            revision: u64::try_from(revision).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ReportStore for PostgresReportStore {
    async fn upsert(&self, report: Report) -> Result<u64> {
        let revision: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO vulnerability_reports (
                namespace, workload, container, owner_uid, image, image_hash,
                scanner, findings, summary, operator, generated_at, revision
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1)
            ON CONFLICT (namespace, workload, container) DO UPDATE SET
                owner_uid = EXCLUDED.owner_uid,
                image = EXCLUDED.image,
                image_hash = EXCLUDED.image_hash,
                scanner = EXCLUDED.scanner,
                findings = EXCLUDED.findings,
                summary = EXCLUDED.summary,
                operator = EXCLUDED.operator,
                generated_at = EXCLUDED.generated_at,
                revision = vulnerability_reports.revision + 1,
                updated_at = NOW()
            RETURNING revision
            "#,
        )
        .bind(&report.key.namespace)
        .bind(&report.key.workload)
        .bind(&report.key.container)
        .bind(&report.owner_uid)
        .bind(report.image.to_string())
        .bind(report.image_hash.as_str())
        .bind(serde_json::to_value(&report.scanner)?)
        .bind(serde_json::to_value(&report.findings)?)
        .bind(serde_json::to_value(report.summary)?)
        .bind(serde_json::to_value(&report.operator)?)
        .bind(report.generated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(revision).unwrap_or_default())
    }

    async fn get(&self, key: &ReportKey) -> Result<Option<Report>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM vulnerability_reports \
             WHERE namespace = $1 AND workload = $2 AND container = $3"
        );
        let row = sqlx::query(&query)
            .bind(&key.namespace)
            .bind(&key.workload)
            .bind(&key.container)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn exists(&self, key: &ReportKey, image_hash: &ImageHash) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM vulnerability_reports
                WHERE namespace = $1
                  AND workload = $2
                  AND container = $3
                  AND image_hash = $4
            )
            "#,
        )
        .bind(&key.namespace)
        .bind(&key.workload)
        .bind(&key.container)
        .bind(image_hash.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_for_workload(&self, workload: &WorkloadKey) -> Result<Vec<Report>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM vulnerability_reports \
             WHERE namespace = $1 AND workload = $2 ORDER BY container"
        );
        let rows = sqlx::query(&query)
            .bind(&workload.namespace)
            .bind(&workload.name)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::decode).collect()
    }

    async fn delete_for_workload(&self, workload: &WorkloadKey) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM vulnerability_reports WHERE namespace = $1 AND workload = $2",
        )
        .bind(&workload.namespace)
        .bind(&workload.name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }
}
