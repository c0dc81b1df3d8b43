use async_trait::async_trait;
use riberry_core::RiberryResult;
use riberry_domain::{
    ArtifactData, ArtifactRepository, ExternalTask, ExternalTaskRepository, ExternalTaskStatus,
    JobExecutionArtifact,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

/// PostgreSQL 执行产物仓储实现
///
/// 产物元数据、二进制内容与标签分表存储。
pub struct PostgresArtifactRepository {
    pool: PgPool,
}

impl PostgresArtifactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_data(&self, artifact_id: i64) -> RiberryResult<Vec<ArtifactData>> {
        let rows = sqlx::query(
            "SELECT title, description FROM job_execution_artifact_data WHERE artifact_id = $1 ORDER BY id",
        )
        .bind(artifact_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> RiberryResult<ArtifactData> {
                Ok(ArtifactData {
                    title: row.try_get("title")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ArtifactRepository for PostgresArtifactRepository {
    #[instrument(skip(self, artifact), fields(execution_id = %artifact.job_execution_id, filename = %artifact.filename))]
    async fn create(
        &self,
        artifact: &JobExecutionArtifact,
    ) -> RiberryResult<Option<JobExecutionArtifact>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO job_execution_artifacts (job_execution_id, stream_id, name, type, category, filename, size, created, source_event_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(artifact.job_execution_id)
        .bind(artifact.stream_id)
        .bind(&artifact.name)
        .bind(artifact.artifact_type)
        .bind(&artifact.category)
        .bind(&artifact.filename)
        .bind(artifact.size)
        .bind(artifact.created)
        .bind(artifact.source_event_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            debug!("来源事件 {:?} 的产物已存在，跳过", artifact.source_event_id);
            return Ok(None);
        };
        let id: i64 = row.try_get("id")?;

        sqlx::query("INSERT INTO job_execution_artifact_binaries (artifact_id, binary_data) VALUES ($1, $2)")
            .bind(id)
            .bind(&artifact.binary)
            .execute(&mut *tx)
            .await?;

        for tag in &artifact.data {
            sqlx::query(
                "INSERT INTO job_execution_artifact_data (artifact_id, title, description) VALUES ($1, $2, $3)",
            )
            .bind(id)
            .bind(&tag.title)
            .bind(&tag.description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(JobExecutionArtifact {
            id,
            ..artifact.clone()
        }))
    }

    async fn list_by_execution(
        &self,
        job_execution_id: i64,
    ) -> RiberryResult<Vec<JobExecutionArtifact>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.job_execution_id, a.stream_id, a.name, a.type, a.category, a.filename,
                   a.size, a.created, a.source_event_id, b.binary_data
            FROM job_execution_artifacts a
            LEFT JOIN job_execution_artifact_binaries b ON b.artifact_id = a.id
            WHERE a.job_execution_id = $1
            ORDER BY a.id
            "#,
        )
        .bind(job_execution_id)
        .fetch_all(&self.pool)
        .await?;

        let mut artifacts = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            artifacts.push(JobExecutionArtifact {
                id,
                job_execution_id: row.try_get("job_execution_id")?,
                stream_id: row.try_get("stream_id")?,
                name: row.try_get("name")?,
                artifact_type: row.try_get("type")?,
                category: row.try_get("category")?,
                filename: row.try_get("filename")?,
                size: row.try_get("size")?,
                created: row.try_get("created")?,
                binary: row.try_get("binary_data")?,
                data: self.load_data(id).await?,
                source_event_id: row.try_get("source_event_id")?,
            });
        }
        Ok(artifacts)
    }
}

const EXTERNAL_TASK_COLUMNS: &str =
    "id, job_execution_id, stream_id, name, type, external_task_id, status, input_data, output_data";

/// PostgreSQL 外部任务仓储实现
pub struct PostgresExternalTaskRepository {
    pool: PgPool,
}

impl PostgresExternalTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> RiberryResult<ExternalTask> {
        Ok(ExternalTask {
            id: row.try_get("id")?,
            job_execution_id: row.try_get("job_execution_id")?,
            stream_id: row.try_get("stream_id")?,
            name: row.try_get("name")?,
            task_type: row.try_get("type")?,
            external_task_id: row.try_get("external_task_id")?,
            status: row.try_get("status")?,
            input_data: row.try_get("input_data")?,
            output_data: row.try_get("output_data")?,
        })
    }
}

#[async_trait]
impl ExternalTaskRepository for PostgresExternalTaskRepository {
    #[instrument(skip(self, task), fields(external_task_id = %task.external_task_id))]
    async fn create(&self, task: &ExternalTask) -> RiberryResult<ExternalTask> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_execution_external_tasks (job_execution_id, stream_id, name, type, external_task_id, status, input_data, output_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(task.job_execution_id)
        .bind(task.stream_id)
        .bind(&task.name)
        .bind(&task.task_type)
        .bind(&task.external_task_id)
        .bind(task.status)
        .bind(&task.input_data)
        .bind(&task.output_data)
        .fetch_one(&self.pool)
        .await?;

        Ok(ExternalTask {
            id: row.try_get("id")?,
            ..task.clone()
        })
    }

    async fn find_by_external_id(&self, external_task_id: &str) -> RiberryResult<Option<ExternalTask>> {
        let row = sqlx::query(&format!(
            "SELECT {EXTERNAL_TASK_COLUMNS} FROM job_execution_external_tasks WHERE external_task_id = $1"
        ))
        .bind(external_task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update(&self, task: &ExternalTask) -> RiberryResult<()> {
        sqlx::query(
            r#"
            UPDATE job_execution_external_tasks
            SET status = $2, input_data = $3, output_data = $4
            WHERE external_task_id = $1
            "#,
        )
        .bind(&task.external_task_id)
        .bind(task.status)
        .bind(&task.input_data)
        .bind(&task.output_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, input_data, output_data))]
    async fn transition(
        &self,
        external_task_id: &str,
        from: ExternalTaskStatus,
        to: ExternalTaskStatus,
        input_data: Option<serde_json::Value>,
        output_data: Option<serde_json::Value>,
    ) -> RiberryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_execution_external_tasks
            SET status = $3,
                input_data = COALESCE($4, input_data),
                output_data = COALESCE($5, output_data)
            WHERE external_task_id = $1 AND status = $2
            "#,
        )
        .bind(external_task_id)
        .bind(from)
        .bind(to)
        .bind(input_data)
        .bind(output_data)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn has_ready_for_instance(&self, instance_id: i64) -> RiberryResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM job_execution_external_tasks t
                JOIN job_executions e ON e.id = t.job_execution_id
                JOIN jobs j ON j.id = e.job_id
                JOIN forms f ON f.id = j.form_id
                WHERE f.instance_id = $1 AND e.status = 'ACTIVE' AND t.status = 'READY'
            ) AS ready
            "#,
        )
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("ready")?)
    }
}
