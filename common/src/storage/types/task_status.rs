use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Started,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl TaskState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

stored_object!(TaskStatus, "task_status", {
    operation: String,
    trackable_id: Option<String>,
    trackable_type: Option<String>,
    parent: Option<String>,
    state: TaskState,
    message: Option<String>,
    error: Option<String>,
    total: u64,
    current: u64
});

impl TaskStatus {
    /// Status ids are shaped `<scope>-<entity_id>-<operation>`; the parent
    /// link is a plain string id, so the hierarchy cannot form cycles.
    pub fn compose_id(scope: &str, entity_id: &str, operation: &str) -> String {
        format!("{scope}-{entity_id}-{operation}")
    }

    pub fn new(
        id: String,
        operation: &str,
        trackable: Option<(&str, &str)>,
        parent: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            operation: operation.to_string(),
            trackable_id: trackable.map(|(_, id)| id.to_string()),
            trackable_type: trackable.map(|(kind, _)| kind.to_string()),
            parent,
            state: TaskState::Pending,
            message: None,
            error: None,
            total: 0,
            current: 0,
        }
    }

    /// Create or reset a status row to pending. A rescan starts a new
    /// lifecycle for the same id, which is why this is an upsert rather than
    /// a transition.
    pub async fn create_pending(db: &SurrealDbClient, status: Self) -> Result<Self, AppError> {
        db.upsert_item(status.clone()).await?;
        Ok(status)
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(id).await?)
    }

    pub async fn require(db: &SurrealDbClient, id: &str) -> Result<Self, AppError> {
        Self::get(db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task status {id}")))
    }

    /// Move a status forward. Terminal rows reject every further transition.
    pub async fn transition(
        db: &SurrealDbClient,
        id: &str,
        state: TaskState,
        message: Option<String>,
        error: Option<String>,
    ) -> Result<(), AppError> {
        let current = Self::require(db, id).await?;
        if current.state.is_terminal() {
            return Err(AppError::Validation(format!(
                "task status {id} is already {} and cannot become {}",
                current.state.as_str(),
                state.as_str()
            )));
        }

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/state", state))
            .patch(PatchOp::replace("/message", message))
            .patch(PatchOp::replace("/error", error))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    /// Update the `current/total` progress counters used by UI polling.
    pub async fn set_progress(
        db: &SurrealDbClient,
        id: &str,
        current: u64,
        total: u64,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/current", current))
            .patch(PatchOp::replace("/total", total))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    pub async fn list_for_trackable(
        db: &SurrealDbClient,
        trackable_type: &str,
        trackable_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE trackable_type = $trackable_type \
                 AND trackable_id = $trackable_id ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("trackable_type", trackable_type.to_string()))
            .bind(("trackable_id", trackable_id.to_string()))
            .await?;
        let statuses: Vec<Self> = response.take(0)?;

        Ok(statuses)
    }

    pub async fn children(db: &SurrealDbClient, parent_id: &str) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE parent = $parent \
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("parent", parent_id.to_string()))
            .await?;
        let statuses: Vec<Self> = response.take(0)?;

        Ok(statuses)
    }

    /// Parent state is derived from children on read, never stored:
    /// failed if any child failed, completed when every child is terminal and
    /// at least one completed, running otherwise.
    pub fn aggregate_state(children: &[Self]) -> TaskState {
        if children.iter().any(|child| child.state == TaskState::Failed) {
            return TaskState::Failed;
        }

        let all_terminal = children.iter().all(|child| child.state.is_terminal());
        let any_completed = children
            .iter()
            .any(|child| child.state == TaskState::Completed);
        if !children.is_empty() && all_terminal && any_completed {
            return TaskState::Completed;
        }

        TaskState::Running
    }

    /// Per-state row counts for the status summary endpoint.
    pub async fn summary_for_trackable(
        db: &SurrealDbClient,
        trackable_type: &str,
        trackable_id: &str,
    ) -> Result<BTreeMap<String, u64>, AppError> {
        let statuses = Self::list_for_trackable(db, trackable_type, trackable_id).await?;

        let mut summary = BTreeMap::new();
        for status in statuses {
            *summary.entry(status.state.as_str().to_string()).or_insert(0) += 1;
        }

        Ok(summary)
    }

    pub async fn delete_for_trackable(
        db: &SurrealDbClient,
        trackable_type: &str,
        trackable_id: &str,
    ) -> Result<(), AppError> {
        db.query(
            "DELETE type::table($table) WHERE trackable_type = $trackable_type \
             AND trackable_id = $trackable_id",
        )
        .bind(("table", Self::table_name()))
        .bind(("trackable_type", trackable_type.to_string()))
        .bind(("trackable_id", trackable_id.to_string()))
        .await?
        .check()?;

        Ok(())
    }
}
