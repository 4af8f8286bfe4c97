//! Webhook subscription and log persistence — the storage half of C8.
//! Limits (per-project cap 50, global cap 200) and URL/secret validation are
//! the dispatcher's job (`crate::webhook`); this module only persists.

use chrono::Utc;
use sqlx::Row;

use super::Store;
use crate::error::{CoreError, Result};
use crate::models::{WebhookLogRow, WebhookSubscription};

pub struct NewSubscription {
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
    pub description: Option<String>,
}

impl Store {
    pub async fn webhook_count_total(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM webhook_subscriptions WHERE active = 1")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn webhook_count_for_project(&self, project: &str) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_subscriptions WHERE active = 1 AND project = ?",
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn create_subscription(&self, sub: NewSubscription) -> Result<WebhookSubscription> {
        let _guard = self.write_lock().lock_owned().await;
        let now = Utc::now().timestamp();
        let event_types_json = serde_json::to_string(&sub.event_types).unwrap_or_else(|_| "[]".into());

        let row = sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions (url, secret, event_types, project, active, description, created_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&sub.url)
        .bind(&sub.secret)
        .bind(&event_types_json)
        .bind(&sub.project)
        .bind(&sub.description)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(WebhookSubscription {
            id: row.get("id"),
            url: sub.url,
            secret: sub.secret,
            event_types: sub.event_types,
            project: sub.project,
            active: true,
            description: sub.description,
            created_at: now,
        })
    }

    pub async fn get_subscription(&self, id: i64) -> Result<WebhookSubscription> {
        let row = sqlx::query(
            "SELECT id, url, secret, event_types, project, active, description, created_at \
             FROM webhook_subscriptions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("subscription {id} not found")))?;

        Ok(row_to_subscription(row))
    }

    /// Subscriptions matching `event_type` (exact or `*`) and `project`
    /// (NULL subscriptions match every project).
    pub async fn matching_subscriptions(
        &self,
        event_type: &str,
        project: Option<&str>,
    ) -> Result<Vec<WebhookSubscription>> {
        let rows = sqlx::query(
            "SELECT id, url, secret, event_types, project, active, description, created_at \
             FROM webhook_subscriptions WHERE active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(row_to_subscription)
            .filter(|s| s.event_types.iter().any(|e| e == event_type || e == "*"))
            .filter(|s| match (&s.project, project) {
                (None, _) => true,
                (Some(sp), Some(p)) => sp == p,
                (Some(_), None) => false,
            })
            .collect())
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<WebhookSubscription>> {
        let rows = sqlx::query(
            "SELECT id, url, secret, event_types, project, active, description, created_at \
             FROM webhook_subscriptions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_subscription).collect())
    }

    pub async fn deactivate_subscription(&self, id: i64) -> Result<()> {
        let _guard = self.write_lock().lock_owned().await;
        let result = sqlx::query("UPDATE webhook_subscriptions SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("subscription {id} not found")));
        }
        Ok(())
    }

    pub async fn append_webhook_log(
        &self,
        subscription_id: i64,
        event_type: &str,
        event_id: &str,
        payload: &str,
        status_code: Option<i64>,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<()> {
        let _guard = self.write_lock().lock_owned().await;
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO webhook_logs
                (subscription_id, event_type, event_id, payload, status_code, success, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(subscription_id)
        .bind(event_type)
        .bind(event_id)
        .bind(payload)
        .bind(status_code)
        .bind(success)
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_webhook_logs(&self, subscription_id: i64) -> Result<Vec<WebhookLogRow>> {
        Ok(sqlx::query_as::<_, WebhookLogRow>(
            "SELECT id, subscription_id, event_type, event_id, payload, status_code, success, \
             error_message, created_at FROM webhook_logs WHERE subscription_id = ? ORDER BY created_at DESC",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

fn row_to_subscription(row: sqlx::sqlite::SqliteRow) -> WebhookSubscription {
    let event_types: String = row.get("event_types");
    WebhookSubscription {
        id: row.get("id"),
        url: row.get("url"),
        secret: row.get("secret"),
        event_types: serde_json::from_str(&event_types).unwrap_or_default(),
        project: row.get("project"),
        active: row.get("active"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}
