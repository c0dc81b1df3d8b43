use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riberry_core::RiberryResult;
use riberry_domain::{Application, ApplicationInstance, InstanceRepository, Schedule, ScheduleRepository};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

const INSTANCE_COLUMNS: &str = "i.id, i.application_id, i.name, i.internal_name, h.updated AS heartbeat";

/// PostgreSQL 应用实例仓储实现
pub struct PostgresInstanceRepository {
    pool: PgPool,
}

impl PostgresInstanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_instance(row: &sqlx::postgres::PgRow) -> RiberryResult<ApplicationInstance> {
        Ok(ApplicationInstance {
            id: row.try_get("id")?,
            application_id: row.try_get("application_id")?,
            name: row.try_get("name")?,
            internal_name: row.try_get("internal_name")?,
            heartbeat: row.try_get("heartbeat")?,
        })
    }
}

#[async_trait]
impl InstanceRepository for PostgresInstanceRepository {
    async fn create_application(&self, application: &Application) -> RiberryResult<Application> {
        let row = sqlx::query(
            "INSERT INTO applications (name, internal_name, enabled) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&application.name)
        .bind(&application.internal_name)
        .bind(application.enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(Application {
            id: row.try_get("id")?,
            ..application.clone()
        })
    }

    #[instrument(skip(self, instance), fields(internal_name = %instance.internal_name))]
    async fn create_instance(
        &self,
        instance: &ApplicationInstance,
    ) -> RiberryResult<ApplicationInstance> {
        let row = sqlx::query(
            "INSERT INTO application_instances (application_id, name, internal_name) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(instance.application_id)
        .bind(&instance.name)
        .bind(&instance.internal_name)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!("创建应用实例成功: {} (ID: {})", instance.internal_name, id);
        Ok(ApplicationInstance {
            id,
            heartbeat: None,
            ..instance.clone()
        })
    }

    async fn find_by_id(&self, id: i64) -> RiberryResult<Option<ApplicationInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM application_instances i LEFT JOIN heartbeats h ON h.instance_id = i.id WHERE i.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_instance).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_internal_name(&self, name: &str) -> RiberryResult<Option<ApplicationInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM application_instances i LEFT JOIN heartbeats h ON h.instance_id = i.id WHERE i.internal_name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_instance).transpose()
    }

    #[instrument(skip(self), fields(instance_id = %instance_id))]
    async fn echo(&self, instance_id: i64, now: DateTime<Utc>) -> RiberryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (instance_id, created, updated)
            VALUES ($1, $2, $2)
            ON CONFLICT (instance_id) DO UPDATE SET updated = EXCLUDED.updated
            "#,
        )
        .bind(instance_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_with_parameter(&self, parameter: &str) -> RiberryResult<Vec<ApplicationInstance>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM application_instances i
            LEFT JOIN heartbeats h ON h.instance_id = i.id
            WHERE EXISTS (SELECT 1 FROM schedules s WHERE s.instance_id = i.id AND s.parameter = $1)
            ORDER BY i.internal_name
            "#
        ))
        .bind(parameter)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_instance).collect()
    }
}

/// PostgreSQL 调度仓储实现
pub struct PostgresScheduleRepository {
    pool: PgPool,
}

impl PostgresScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &sqlx::postgres::PgRow) -> RiberryResult<Schedule> {
        Ok(Schedule {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            parameter: row.try_get("parameter")?,
            value: row.try_get("value")?,
            days: row.try_get("days")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            timezone: row.try_get("timezone")?,
            priority: row.try_get("priority")?,
        })
    }

    async fn insert<'e, E>(executor: E, schedule: &Schedule) -> RiberryResult<i64>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let row = sqlx::query(
            r#"
            INSERT INTO schedules (instance_id, parameter, value, days, start_time, end_time, timezone, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(schedule.instance_id)
        .bind(&schedule.parameter)
        .bind(&schedule.value)
        .bind(&schedule.days)
        .bind(schedule.start_time)
        .bind(schedule.end_time)
        .bind(&schedule.timezone)
        .bind(schedule.priority)
        .fetch_one(executor)
        .await?;
        Ok(row.try_get("id")?)
    }
}

#[async_trait]
impl ScheduleRepository for PostgresScheduleRepository {
    async fn create(&self, schedule: &Schedule) -> RiberryResult<Schedule> {
        let id = Self::insert(&self.pool, schedule).await?;
        Ok(Schedule {
            id,
            ..schedule.clone()
        })
    }

    async fn find_by_instance(&self, instance_id: i64) -> RiberryResult<Vec<Schedule>> {
        let rows = sqlx::query(
            "SELECT id, instance_id, parameter, value, days, start_time, end_time, timezone, priority FROM schedules WHERE instance_id = $1 ORDER BY id",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self, schedules), fields(instance_id = %instance_id, count = schedules.len()))]
    async fn replace_parameters(
        &self,
        instance_id: i64,
        parameters: &[String],
        schedules: &[Schedule],
    ) -> RiberryResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM schedules WHERE instance_id = $1 AND parameter = ANY($2)")
            .bind(instance_id)
            .bind(parameters)
            .execute(&mut *tx)
            .await?;

        for schedule in schedules {
            Self::insert(&mut *tx, schedule).await?;
        }

        tx.commit().await?;
        debug!("替换实例 {} 的调度参数 {:?}", instance_id, parameters);
        Ok(())
    }
}
