use async_trait::async_trait;
use riberry_core::RiberryResult;
use riberry_domain::{Form, Job, JobRepository, Notification, NotificationRepository, User};
use sqlx::{PgPool, Row};
use tracing::debug;

/// PostgreSQL 表单、作业与用户仓储实现
pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_form(row: &sqlx::postgres::PgRow) -> RiberryResult<Form> {
        Ok(Form {
            id: row.try_get("id")?,
            application_id: row.try_get("application_id")?,
            instance_id: row.try_get("instance_id")?,
            name: row.try_get("name")?,
            internal_name: row.try_get("internal_name")?,
            entry_point: row.try_get("entry_point")?,
        })
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> RiberryResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            form_id: row.try_get("form_id")?,
            name: row.try_get("name")?,
            creator_id: row.try_get("creator_id")?,
            inputs: row.try_get("inputs")?,
            created: row.try_get("created")?,
        })
    }
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn create_user(&self, user: &User) -> RiberryResult<User> {
        let row = sqlx::query("INSERT INTO users (username, email) VALUES ($1, $2) RETURNING id")
            .bind(&user.username)
            .bind(&user.email)
            .fetch_one(&self.pool)
            .await?;

        Ok(User {
            id: row.try_get("id")?,
            ..user.clone()
        })
    }

    async fn find_user(&self, id: i64) -> RiberryResult<Option<User>> {
        let row = sqlx::query("SELECT id, username, email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                email: row.try_get("email")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_form(&self, form: &Form) -> RiberryResult<Form> {
        let row = sqlx::query(
            r#"
            INSERT INTO forms (application_id, instance_id, name, internal_name, entry_point)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(form.application_id)
        .bind(form.instance_id)
        .bind(&form.name)
        .bind(&form.internal_name)
        .bind(&form.entry_point)
        .fetch_one(&self.pool)
        .await?;

        Ok(Form {
            id: row.try_get("id")?,
            ..form.clone()
        })
    }

    async fn find_form(&self, id: i64) -> RiberryResult<Option<Form>> {
        let row = sqlx::query(
            "SELECT id, application_id, instance_id, name, internal_name, entry_point FROM forms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_form).transpose()
    }

    async fn create_job(&self, job: &Job) -> RiberryResult<Job> {
        let row = sqlx::query(
            "INSERT INTO jobs (form_id, name, creator_id, inputs, created) VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(job.form_id)
        .bind(&job.name)
        .bind(job.creator_id)
        .bind(&job.inputs)
        .bind(job.created)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!("创建作业成功: {} (ID: {})", job.name, id);
        Ok(Job { id, ..job.clone() })
    }

    async fn find_job(&self, id: i64) -> RiberryResult<Option<Job>> {
        let row = sqlx::query("SELECT id, form_id, name, creator_id, inputs, created FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }
}

/// PostgreSQL 通知仓储实现
pub struct PostgresNotificationRepository {
    pool: PgPool,
}

impl PostgresNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    async fn create(&self, notification: &Notification) -> RiberryResult<Notification> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, type, message, job_execution_id, created, read)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(notification.user_id)
        .bind(notification.notification_type)
        .bind(&notification.message)
        .bind(notification.job_execution_id)
        .bind(notification.created)
        .bind(notification.read)
        .fetch_one(&self.pool)
        .await?;

        Ok(Notification {
            id: row.try_get("id")?,
            ..notification.clone()
        })
    }

    async fn list_for_user(&self, user_id: i64) -> RiberryResult<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, user_id, type, message, job_execution_id, created, read FROM notifications WHERE user_id = $1 ORDER BY created, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> RiberryResult<Notification> {
                Ok(Notification {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    notification_type: row.try_get("type")?,
                    message: row.try_get("message")?,
                    job_execution_id: row.try_get("job_execution_id")?,
                    created: row.try_get("created")?,
                    read: row.try_get("read")?,
                })
            })
            .collect()
    }
}
