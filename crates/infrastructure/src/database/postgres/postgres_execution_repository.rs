use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riberry_core::RiberryResult;
use riberry_domain::{
    ExecutionRepository, ExecutionStatus, JobExecution, JobExecutionStream,
    JobExecutionStreamStep, StreamRepository,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

const EXECUTION_COLUMNS: &str =
    "e.id, e.job_id, e.creator_id, e.task_id, e.status, e.priority, e.created, e.started, e.completed, e.updated";

fn status_names(statuses: &[ExecutionStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

/// PostgreSQL 作业执行仓储实现
///
/// 状态迁移以带前置状态条件的单条 UPDATE 完成。
pub struct PostgresExecutionRepository {
    pool: PgPool,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::postgres::PgRow) -> RiberryResult<JobExecution> {
        Ok(JobExecution {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            creator_id: row.try_get("creator_id")?,
            task_id: row.try_get("task_id")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            created: row.try_get("created")?,
            started: row.try_get("started")?,
            completed: row.try_get("completed")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    #[instrument(skip(self, execution), fields(job_id = %execution.job_id))]
    async fn create(&self, execution: &JobExecution) -> RiberryResult<JobExecution> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_executions (job_id, creator_id, task_id, status, priority, created, started, completed, updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(execution.job_id)
        .bind(execution.creator_id)
        .bind(&execution.task_id)
        .bind(execution.status)
        .bind(execution.priority)
        .bind(execution.created)
        .bind(execution.started)
        .bind(execution.completed)
        .bind(execution.updated)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!("创建作业执行成功: ID {}", id);
        Ok(JobExecution {
            id,
            ..execution.clone()
        })
    }

    #[instrument(skip(self), fields(execution_id = %id))]
    async fn find_by_id(&self, id: i64) -> RiberryResult<Option<JobExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions e WHERE e.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_task_id(&self, task_id: &str) -> RiberryResult<Option<JobExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions e WHERE e.task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn find_by_instance_and_status(
        &self,
        instance_id: i64,
        statuses: &[ExecutionStatus],
    ) -> RiberryResult<Vec<JobExecution>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM job_executions e
            JOIN jobs j ON j.id = e.job_id
            JOIN forms f ON f.id = j.form_id
            WHERE f.instance_id = $1 AND e.status = ANY($2)
            ORDER BY e.priority DESC, e.created ASC, e.id ASC
            "#
        ))
        .bind(instance_id)
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn count_by_instance_and_status(
        &self,
        instance_id: i64,
        statuses: &[ExecutionStatus],
    ) -> RiberryResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM job_executions e
            JOIN jobs j ON j.id = e.job_id
            JOIN forms f ON f.id = j.form_id
            WHERE f.instance_id = $1 AND e.status = ANY($2)
            "#,
        )
        .bind(instance_id)
        .bind(status_names(statuses))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("count")?)
    }

    #[instrument(skip(self, now), fields(execution_id = %id, root_id = %task_id))]
    async fn mark_ready(&self, id: i64, task_id: &str, now: DateTime<Utc>) -> RiberryResult<bool> {
        let result = sqlx::query(
            "UPDATE job_executions SET status = 'READY', task_id = $2, updated = $3 WHERE id = $1 AND status = 'RECEIVED'",
        )
        .bind(id)
        .bind(task_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, now), fields(execution_id = %id))]
    async fn mark_active(&self, id: i64, now: DateTime<Utc>) -> RiberryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'ACTIVE', started = COALESCE(started, $2), updated = $2
            WHERE id = $1 AND status IN ('RECEIVED', 'READY')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, now), fields(execution_id = %id, status = %status))]
    async fn mark_complete(
        &self,
        id: i64,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = $2, completed = $3, started = COALESCE(started, $3), updated = $3
            WHERE id = $1 AND status NOT IN ('SUCCESS', 'FAILURE')
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

const STREAM_COLUMNS: &str =
    "id, job_execution_id, name, task_id, status, created, started, completed, updated";
const STEP_COLUMNS: &str = "id, stream_id, name, task_id, status, created, started, completed, updated";

/// PostgreSQL 执行流与步骤仓储实现
pub struct PostgresStreamRepository {
    pool: PgPool,
}

impl PostgresStreamRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_stream(row: &sqlx::postgres::PgRow) -> RiberryResult<JobExecutionStream> {
        Ok(JobExecutionStream {
            id: row.try_get("id")?,
            job_execution_id: row.try_get("job_execution_id")?,
            name: row.try_get("name")?,
            task_id: row.try_get("task_id")?,
            status: row.try_get("status")?,
            created: row.try_get("created")?,
            started: row.try_get("started")?,
            completed: row.try_get("completed")?,
            updated: row.try_get("updated")?,
        })
    }

    fn row_to_step(row: &sqlx::postgres::PgRow) -> RiberryResult<JobExecutionStreamStep> {
        Ok(JobExecutionStreamStep {
            id: row.try_get("id")?,
            stream_id: row.try_get("stream_id")?,
            name: row.try_get("name")?,
            task_id: row.try_get("task_id")?,
            status: row.try_get("status")?,
            created: row.try_get("created")?,
            started: row.try_get("started")?,
            completed: row.try_get("completed")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl StreamRepository for PostgresStreamRepository {
    async fn find_stream(
        &self,
        job_execution_id: i64,
        name: &str,
    ) -> RiberryResult<Option<JobExecutionStream>> {
        let row = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM job_execution_streams WHERE job_execution_id = $1 AND name = $2"
        ))
        .bind(job_execution_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_stream).transpose()
    }

    async fn find_stream_by_task_id(&self, task_id: &str) -> RiberryResult<Option<JobExecutionStream>> {
        let row = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM job_execution_streams WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_stream).transpose()
    }

    async fn list_streams(&self, job_execution_id: i64) -> RiberryResult<Vec<JobExecutionStream>> {
        let rows = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM job_execution_streams WHERE job_execution_id = $1 ORDER BY id"
        ))
        .bind(job_execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_stream).collect()
    }

    #[instrument(skip(self, stream), fields(stream = %stream.name, task_id = %stream.task_id))]
    async fn create_stream(&self, stream: &JobExecutionStream) -> RiberryResult<JobExecutionStream> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_execution_streams (job_execution_id, name, task_id, status, created, started, completed, updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(stream.job_execution_id)
        .bind(&stream.name)
        .bind(&stream.task_id)
        .bind(stream.status)
        .bind(stream.created)
        .bind(stream.started)
        .bind(stream.completed)
        .bind(stream.updated)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobExecutionStream {
            id: row.try_get("id")?,
            ..stream.clone()
        })
    }

    async fn update_stream(&self, stream: &JobExecutionStream) -> RiberryResult<()> {
        sqlx::query(
            r#"
            UPDATE job_execution_streams
            SET status = $2, created = $3, started = $4, completed = $5, updated = $6
            WHERE id = $1
            "#,
        )
        .bind(stream.id)
        .bind(stream.status)
        .bind(stream.created)
        .bind(stream.started)
        .bind(stream.completed)
        .bind(stream.updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_step(
        &self,
        stream_id: i64,
        task_id: &str,
    ) -> RiberryResult<Option<JobExecutionStreamStep>> {
        let row = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM job_execution_stream_steps WHERE stream_id = $1 AND task_id = $2"
        ))
        .bind(stream_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_step).transpose()
    }

    async fn list_steps(&self, stream_id: i64) -> RiberryResult<Vec<JobExecutionStreamStep>> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM job_execution_stream_steps WHERE stream_id = $1 ORDER BY id"
        ))
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_step).collect()
    }

    async fn create_step(&self, step: &JobExecutionStreamStep) -> RiberryResult<JobExecutionStreamStep> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_execution_stream_steps (stream_id, name, task_id, status, created, started, completed, updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(step.stream_id)
        .bind(&step.name)
        .bind(&step.task_id)
        .bind(step.status)
        .bind(step.created)
        .bind(step.started)
        .bind(step.completed)
        .bind(step.updated)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobExecutionStreamStep {
            id: row.try_get("id")?,
            ..step.clone()
        })
    }

    async fn update_step(&self, step: &JobExecutionStreamStep) -> RiberryResult<()> {
        sqlx::query(
            r#"
            UPDATE job_execution_stream_steps
            SET name = $2, status = $3, created = $4, started = $5, completed = $6, updated = $7
            WHERE id = $1
            "#,
        )
        .bind(step.id)
        .bind(&step.name)
        .bind(step.status)
        .bind(step.created)
        .bind(step.started)
        .bind(step.completed)
        .bind(step.updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
