use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, types::Json};
use ts_rs::TS;

use super::task::Task;

/// Per-user document: profile fields plus the whole task list.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    pub uid: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

#[derive(FromRow)]
struct UserRow {
    uid: String,
    email: String,
    name: String,
    created_at: DateTime<Utc>,
    tasks: Json<Vec<Task>>,
}

impl From<UserRow> for UserDocument {
    fn from(row: UserRow) -> Self {
        Self {
            uid: row.uid,
            email: row.email,
            name: row.name,
            created_at: row.created_at,
            tasks: row.tasks.0,
        }
    }
}

impl UserDocument {
    pub async fn create(
        pool: &SqlitePool,
        uid: &str,
        email: &str,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"INSERT INTO users (uid, email, name, tasks, created_at)
               VALUES ($1, $2, $3, '[]', $4)
               RETURNING uid, email, name, created_at, tasks"#,
        )
        .bind(uid)
        .bind(email)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
        Ok(row.into())
    }

    /// Creates the document on first sight of `uid`; an existing one is returned untouched.
    pub async fn find_or_create(
        pool: &SqlitePool,
        uid: &str,
        email: &str,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO users (uid, email, name, tasks, created_at)
               VALUES ($1, $2, $3, '[]', $4)
               ON CONFLICT(uid) DO NOTHING"#,
        )
        .bind(uid)
        .bind(email)
        .bind(name)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Self::find_by_uid(pool, uid)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_uid(pool: &SqlitePool, uid: &str) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"SELECT uid, email, name, created_at, tasks
               FROM users
               WHERE uid = $1"#,
        )
        .bind(uid)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// `None` when the user document does not exist.
    pub async fn find_tasks(pool: &SqlitePool, uid: &str) -> Result<Option<Vec<Task>>, sqlx::Error> {
        let tasks = sqlx::query_scalar::<_, Json<Vec<Task>>>("SELECT tasks FROM users WHERE uid = $1")
            .bind(uid)
            .fetch_optional(pool)
            .await?;
        Ok(tasks.map(|json| json.0))
    }

    /// Rewrites the whole task array. Returns rows affected (0 if the document is missing).
    pub async fn replace_tasks(
        pool: &SqlitePool,
        uid: &str,
        tasks: &[Task],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE users
               SET tasks = $2,
                   updated_at = datetime('now', 'subsec')
               WHERE uid = $1"#,
        )
        .bind(uid)
        .bind(Json(tasks))
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
