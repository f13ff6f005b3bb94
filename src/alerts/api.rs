use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::models::{AlertReport, Notification, TargetRole};
use super::service::{alert_service, ALERTS_GUARD};

pub async fn list_notifications(
    Extension(pool): Extension<PgPool>,
    Query(filter): Query<NotificationFilter>,
) -> AppResult<Json<Vec<Notification>>> {
    let sql = format!(
        r#"
        SELECT {} FROM notifications
        WHERE ($1::text IS NULL OR target_role = $1)
          AND ($2::boolean IS NULL OR read = NOT $2)
        ORDER BY created_at DESC
        LIMIT 100
        "#,
        Notification::COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(filter.role.map(|role| role.as_str()))
        .bind(filter.unread_only)
        .fetch_all(&pool)
        .await?;
    let notifications = rows
        .iter()
        .map(Notification::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    Extension(pool): Extension<PgPool>,
    Path(notification_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1")
        .bind(notification_id)
        .execute(&pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_alerts(Extension(pool): Extension<PgPool>) -> AppResult<Json<AlertReport>> {
    let Some(_permit) = ALERTS_GUARD.try_acquire() else {
        return Err(AppError::Conflict {
            code: "RUN_IN_PROGRESS",
            message: "alert checks are already running".into(),
        });
    };
    Ok(Json(alert_service(&pool).run_all_checks(Utc::now()).await))
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub role: Option<TargetRole>,
    #[serde(default)]
    pub unread_only: Option<bool>,
}
