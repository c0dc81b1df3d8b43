use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riberry_core::RiberryResult;
use riberry_domain::{
    CapacityConfiguration, CapacityProducer, CapacityRepository, Event, EventRepository, NewEvent,
    ResourceData, ResourceDataRepository,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

/// PostgreSQL 事件日志仓储实现
pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> RiberryResult<Event> {
        Ok(Event {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            time: row.try_get("time")?,
            root_id: row.try_get("root_id")?,
            task_id: row.try_get("task_id")?,
            data: row.try_get("data")?,
            binary: row.try_get("binary_data")?,
        })
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    #[instrument(skip(self, event), fields(name = %event.name, root_id = %event.root_id))]
    async fn append(&self, event: &NewEvent) -> RiberryResult<Event> {
        let row = sqlx::query(
            r#"
            INSERT INTO events (name, time, root_id, task_id, data, binary_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&event.name)
        .bind(event.time)
        .bind(&event.root_id)
        .bind(&event.task_id)
        .bind(&event.data)
        .bind(&event.binary)
        .fetch_one(&self.pool)
        .await?;

        Ok(Event {
            id: row.try_get("id")?,
            name: event.name.clone(),
            time: event.time,
            root_id: event.root_id.clone(),
            task_id: event.task_id.clone(),
            data: event.data.clone(),
            binary: event.binary.clone(),
        })
    }

    async fn fetch_batch(&self, limit: Option<u32>) -> RiberryResult<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, time, root_id, task_id, data, binary_data
            FROM events
            ORDER BY time, id
            LIMIT $1
            "#,
        )
        .bind(limit.map(i64::from))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn delete(&self, ids: &[i64]) -> RiberryResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM events WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

const RESOURCE_DATA_COLUMNS: &str =
    "id, resource_id, name, value, lock, expiry, marked_for_refresh";

/// PostgreSQL 共享数据仓储实现
///
/// 锁字段与数据同行存储，所有加锁与写入都是带条件的单语句。
pub struct PostgresResourceDataRepository {
    pool: PgPool,
}

impl PostgresResourceDataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_data(row: &sqlx::postgres::PgRow) -> RiberryResult<ResourceData> {
        Ok(ResourceData {
            id: row.try_get("id")?,
            resource_id: row.try_get("resource_id")?,
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            lock: row.try_get("lock")?,
            expiry: row.try_get("expiry")?,
            marked_for_refresh: row.try_get("marked_for_refresh")?,
        })
    }
}

#[async_trait]
impl ResourceDataRepository for PostgresResourceDataRepository {
    async fn find(&self, resource_id: i64, name: &str) -> RiberryResult<Option<ResourceData>> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_DATA_COLUMNS} FROM resource_data WHERE resource_id = $1 AND name = $2"
        ))
        .bind(resource_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_data).transpose()
    }

    async fn get_or_create(&self, resource_id: i64, name: &str) -> RiberryResult<ResourceData> {
        sqlx::query(
            "INSERT INTO resource_data (resource_id, name) VALUES ($1, $2) ON CONFLICT (resource_id, name) DO NOTHING",
        )
        .bind(resource_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_DATA_COLUMNS} FROM resource_data WHERE resource_id = $1 AND name = $2"
        ))
        .bind(resource_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_data(&row)
    }

    async fn list_names(&self, resource_id: i64) -> RiberryResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM resource_data WHERE resource_id = $1 ORDER BY name")
            .bind(resource_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> RiberryResult<String> { Ok(row.try_get("name")?) })
            .collect()
    }

    #[instrument(skip(self))]
    async fn try_lock(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO resource_data (resource_id, name, lock, expiry)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (resource_id, name) DO UPDATE
            SET lock = EXCLUDED.lock, expiry = EXCLUDED.expiry
            WHERE resource_data.lock IS NULL
               OR resource_data.lock = EXCLUDED.lock
               OR resource_data.expiry IS NULL
               OR resource_data.expiry <= $5
            RETURNING id
            "#,
        )
        .bind(resource_id)
        .bind(name)
        .bind(holder)
        .bind(expiry)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn unlock(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        dirty: bool,
    ) -> RiberryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resource_data
            SET lock = NULL, expiry = NULL, marked_for_refresh = marked_for_refresh OR $4
            WHERE resource_id = $1 AND name = $2 AND lock = $3
            "#,
        )
        .bind(resource_id)
        .bind(name)
        .bind(holder)
        .bind(dirty)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn write_locked(
        &self,
        resource_id: i64,
        name: &str,
        holder: &str,
        value: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> RiberryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resource_data
            SET value = $4
            WHERE resource_id = $1 AND name = $2 AND lock = $3 AND expiry > $5
            "#,
        )
        .bind(resource_id)
        .bind(name)
        .bind(holder)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_marked_for_refresh(
        &self,
        resource_id: Option<i64>,
    ) -> RiberryResult<Vec<ResourceData>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESOURCE_DATA_COLUMNS}
            FROM resource_data
            WHERE marked_for_refresh AND ($1::BIGINT IS NULL OR resource_id = $1)
            ORDER BY id
            "#
        ))
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_data).collect()
    }

    async fn clear_refresh_mark(&self, id: i64) -> RiberryResult<()> {
        sqlx::query("UPDATE resource_data SET marked_for_refresh = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// PostgreSQL 容量配置仓储实现
pub struct PostgresCapacityRepository {
    pool: PgPool,
}

impl PostgresCapacityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CapacityRepository for PostgresCapacityRepository {
    #[instrument(skip(self, configuration), fields(weight_parameter = %configuration.weight_parameter))]
    async fn create(
        &self,
        configuration: &CapacityConfiguration,
    ) -> RiberryResult<CapacityConfiguration> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO capacity_configurations (weight_parameter, capacity_parameter, producer_parameter, distribution_strategy)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&configuration.weight_parameter)
        .bind(&configuration.capacity_parameter)
        .bind(&configuration.producer_parameter)
        .bind(configuration.distribution_strategy)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;

        let mut producers = Vec::with_capacity(configuration.producers.len());
        for producer in &configuration.producers {
            let row = sqlx::query(
                r#"
                INSERT INTO capacity_producers (configuration_id, name, internal_name, capacity)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(&producer.name)
            .bind(&producer.internal_name)
            .bind(producer.capacity)
            .fetch_one(&mut *tx)
            .await?;

            producers.push(CapacityProducer {
                id: row.try_get("id")?,
                configuration_id: id,
                ..producer.clone()
            });
        }

        tx.commit().await?;
        debug!("创建容量配置成功: {} (ID: {})", configuration.weight_parameter, id);
        Ok(CapacityConfiguration {
            id,
            producers,
            ..configuration.clone()
        })
    }

    async fn list(&self) -> RiberryResult<Vec<CapacityConfiguration>> {
        let producer_rows = sqlx::query(
            "SELECT id, configuration_id, name, internal_name, capacity FROM capacity_producers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut producers: HashMap<i64, Vec<CapacityProducer>> = HashMap::new();
        for row in &producer_rows {
            let producer = CapacityProducer {
                id: row.try_get("id")?,
                configuration_id: row.try_get("configuration_id")?,
                name: row.try_get("name")?,
                internal_name: row.try_get("internal_name")?,
                capacity: row.try_get("capacity")?,
            };
            producers
                .entry(producer.configuration_id)
                .or_default()
                .push(producer);
        }

        let rows = sqlx::query(
            r#"
            SELECT id, weight_parameter, capacity_parameter, producer_parameter, distribution_strategy
            FROM capacity_configurations
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> RiberryResult<CapacityConfiguration> {
                let id: i64 = row.try_get("id")?;
                Ok(CapacityConfiguration {
                    id,
                    weight_parameter: row.try_get("weight_parameter")?,
                    capacity_parameter: row.try_get("capacity_parameter")?,
                    producer_parameter: row.try_get("producer_parameter")?,
                    distribution_strategy: row.try_get("distribution_strategy")?,
                    producers: producers.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }
}
