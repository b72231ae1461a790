use futures::Stream;
use surrealdb::Notification;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(QueueTask, "queue_task", {
    dedup_key: String,
    task_type: String,
    payload: serde_json::Value,
    priority: i64,
    claimed_by: Option<String>,
    #[serde(
        serialize_with = "serialize_surreal_datetime_opt",
        deserialize_with = "deserialize_surreal_datetime_opt",
        default
    )]
    lease_expires_at: Option<chrono::DateTime<chrono::Utc>>
});

/// How long a claim holds before the task becomes claimable again.
pub const DEFAULT_LEASE_SECS: u64 = 300;

impl QueueTask {
    pub fn new(
        dedup_key: &str,
        task_type: &str,
        payload: serde_json::Value,
        priority: i64,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            dedup_key: dedup_key.to_string(),
            task_type: task_type.to_string(),
            payload,
            priority,
            claimed_by: None,
            lease_expires_at: None,
        }
    }

    /// Enqueue a task. A row with the same dedup key already on the queue wins
    /// and its id is returned; the boolean reports whether a row was created.
    pub async fn enqueue(
        db: &SurrealDbClient,
        dedup_key: &str,
        task_type: &str,
        payload: serde_json::Value,
        priority: i64,
    ) -> Result<(Self, bool), AppError> {
        if let Some(existing) = Self::get_by_dedup_key(db, dedup_key).await? {
            return Ok((existing, false));
        }

        let task = Self::new(dedup_key, task_type, payload, priority);
        match db.store_item(task.clone()).await {
            Ok(_) => Ok((task, true)),
            // Two producers can race on the unique dedup_key index; the row
            // that won is the queue entry either way.
            Err(err) => match Self::get_by_dedup_key(db, dedup_key).await? {
                Some(existing) => Ok((existing, false)),
                None => Err(AppError::Database(err)),
            },
        }
    }

    pub async fn get_by_dedup_key(
        db: &SurrealDbClient,
        dedup_key: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE dedup_key = $dedup_key LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("dedup_key", dedup_key.to_string()))
            .await?;
        let tasks: Vec<Self> = response.take(0)?;

        Ok(tasks.into_iter().next())
    }

    /// Claim the next ready task: highest priority first, oldest first within
    /// a priority. The claim itself is an optimistic conditional update per
    /// candidate row, so concurrent workers skip rows another worker already
    /// locked instead of blocking on them. Expired leases are claimable again,
    /// which is what makes delivery at-least-once.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease: std::time::Duration,
    ) -> Result<Option<Self>, AppError> {
        let now_dt = surrealdb::sql::Datetime::from(now);
        let until_dt = surrealdb::sql::Datetime::from(
            now + chrono::Duration::seconds(lease.as_secs().min(i64::MAX as u64) as i64),
        );

        let mut response = db
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE lease_expires_at = NONE OR lease_expires_at = NULL \
                 OR lease_expires_at < $now \
                 ORDER BY priority DESC, created_at ASC LIMIT 8",
            )
            .bind(("table", Self::table_name()))
            .bind(("now", now_dt.clone()))
            .await?;
        let candidates: Vec<Self> = response.take(0)?;

        for candidate in candidates {
            let mut claim = db
                .query(
                    "UPDATE type::thing($table, $id) \
                     SET claimed_by = $worker, lease_expires_at = $until, updated_at = time::now() \
                     WHERE lease_expires_at = NONE OR lease_expires_at = NULL \
                     OR lease_expires_at < $now \
                     RETURN AFTER",
                )
                .bind(("table", Self::table_name()))
                .bind(("id", candidate.id.clone()))
                .bind(("worker", worker_id.to_string()))
                .bind(("until", until_dt.clone()))
                .bind(("now", now_dt.clone()))
                .await?;
            let claimed: Vec<Self> = claim.take(0)?;

            if let Some(task) = claimed.into_iter().next() {
                return Ok(Some(task));
            }
        }

        Ok(None)
    }

    /// A finished task leaves the queue entirely; history lives on its status
    /// row. Removing the row is also what frees the dedup key for a rescan.
    pub async fn complete(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.delete_item::<Self>(id).await?;
        Ok(())
    }

    pub async fn fail(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.delete_item::<Self>(id).await?;
        Ok(())
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(id).await?)
    }

    pub async fn list(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) ORDER BY priority DESC, created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .await?;
        let tasks: Vec<Self> = response.take(0)?;

        Ok(tasks)
    }

    /// Live stream of queue changes; workers use it to wake on new rows
    /// without waiting out the poll interval.
    pub async fn listen_for_tasks(
        db: &SurrealDbClient,
    ) -> Result<impl Stream<Item = Result<Notification<Self>, surrealdb::Error>>, surrealdb::Error>
    {
        db.listen::<Self>().await
    }
}
