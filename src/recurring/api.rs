use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::orders::store::client_exists;

use super::automation::{automation, BatchReport, RECURRING_GUARD};
use super::models::{MaterializedSale, RecurringService, RecurringServiceLog};
use super::recurrence::Recurrence;
use super::store::{PgRecurringStore, RecurringStore};

const RECENT_LOGS: i64 = 10;

/// key: recurring-api -> recurring service endpoints
pub async fn list_services(
    Extension(pool): Extension<PgPool>,
    Query(filter): Query<ServiceFilter>,
) -> AppResult<Json<Vec<RecurringService>>> {
    let sql = format!(
        r#"
        SELECT {} FROM recurring_services s
        LEFT JOIN clients c ON c.id = s.client_id
        WHERE ($1::uuid IS NULL OR s.client_id = $1)
          AND ($2::boolean IS NULL OR s.active = $2)
        ORDER BY s.next_execution ASC
        "#,
        RecurringService::COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(filter.client_id)
        .bind(filter.active)
        .fetch_all(&pool)
        .await?;
    let services = rows
        .iter()
        .map(RecurringService::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(services))
}

pub async fn get_service(
    Extension(pool): Extension<PgPool>,
    Path(service_id): Path<Uuid>,
) -> AppResult<Json<ServiceDetail>> {
    let service = automation_store(&pool)
        .find_service(service_id)
        .await?
        .ok_or(AppError::NotFound("recurring service"))?;
    let logs = fetch_logs(&pool, service_id, Some(RECENT_LOGS)).await?;
    Ok(Json(ServiceDetail { service, logs }))
}

pub async fn create_service(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<CreateServiceRequest>,
) -> AppResult<(StatusCode, Json<RecurringService>)> {
    payload.validate()?;
    let mut conn = pool.acquire().await?;
    if !client_exists(&mut conn, payload.client_id).await? {
        return Err(AppError::NotFound("client"));
    }

    let start_date = payload.start_date.unwrap_or_else(Utc::now);
    let next_execution = payload
        .next_execution
        .unwrap_or_else(|| payload.recurrence.next_after(start_date));
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO recurring_services (
            id, client_id, name, value, recurrence, is_automatic, has_commission,
            auto_billing, active, start_date, next_execution
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $10)
        "#,
    )
    .bind(id)
    .bind(payload.client_id)
    .bind(payload.name.trim())
    .bind(payload.value)
    .bind(payload.recurrence.as_str())
    .bind(payload.is_automatic.unwrap_or(true))
    .bind(payload.has_commission.unwrap_or(false))
    .bind(payload.auto_billing.unwrap_or(false))
    .bind(start_date)
    .bind(next_execution)
    .execute(&mut conn)
    .await?;

    let service = automation_store(&pool)
        .find_service(id)
        .await?
        .ok_or(AppError::NotFound("recurring service"))?;
    info!(service_id = %id, next_execution = %next_execution, "recurring service created");
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn update_service(
    Extension(pool): Extension<PgPool>,
    Path(service_id): Path<Uuid>,
    Json(payload): Json<UpdateServiceRequest>,
) -> AppResult<Json<RecurringService>> {
    payload.validate()?;
    let store = automation_store(&pool);
    let existing = store
        .find_service(service_id)
        .await?
        .ok_or(AppError::NotFound("recurring service"))?;

    let next_execution = match (payload.next_execution, payload.recurrence) {
        (Some(next), _) => Some(next),
        (None, Some(recurrence)) if recurrence != existing.recurrence => Some(
            recurrence.next_after(existing.last_execution.unwrap_or(existing.start_date)),
        ),
        _ => None,
    };

    sqlx::query(
        r#"
        UPDATE recurring_services SET
            name = COALESCE($2, name),
            value = COALESCE($3, value),
            recurrence = COALESCE($4, recurrence),
            is_automatic = COALESCE($5, is_automatic),
            has_commission = COALESCE($6, has_commission),
            auto_billing = COALESCE($7, auto_billing),
            active = COALESCE($8, active),
            start_date = COALESCE($9, start_date),
            next_execution = COALESCE($10, next_execution),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(service_id)
    .bind(payload.name.as_deref().map(str::trim))
    .bind(payload.value)
    .bind(payload.recurrence.map(|recurrence| recurrence.as_str()))
    .bind(payload.is_automatic)
    .bind(payload.has_commission)
    .bind(payload.auto_billing)
    .bind(payload.active)
    .bind(payload.start_date)
    .bind(next_execution)
    .execute(&pool)
    .await?;

    let updated = store
        .find_service(service_id)
        .await?
        .ok_or(AppError::NotFound("recurring service"))?;
    Ok(Json(updated))
}

pub async fn list_logs(
    Extension(pool): Extension<PgPool>,
    Path(service_id): Path<Uuid>,
) -> AppResult<Json<Vec<RecurringServiceLog>>> {
    Ok(Json(fetch_logs(&pool, service_id, None).await?))
}

pub async fn execute_service(
    Extension(pool): Extension<PgPool>,
    Path(service_id): Path<Uuid>,
) -> AppResult<Json<MaterializedSale>> {
    let automation = automation(&pool);
    let service = automation_store(&pool)
        .find_service(service_id)
        .await?
        .ok_or(AppError::NotFound("recurring service"))?;
    let sale = automation
        .execute_service(&service, Utc::now())
        .await
        .map_err(|err| AppError::Message(format!("{err:#}")))?;
    Ok(Json(sale))
}

pub async fn toggle_service(
    Extension(pool): Extension<PgPool>,
    Path(service_id): Path<Uuid>,
    Json(payload): Json<ToggleRequest>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query(
        "UPDATE recurring_services SET active = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(service_id)
    .bind(payload.active)
    .execute(&pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("recurring service"));
    }
    Ok(Json(json!({ "id": service_id, "active": payload.active })))
}

/// Removes the service and its logs. Orders it generated are kept.
pub async fn delete_service(
    Extension(pool): Extension<PgPool>,
    Path(service_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM recurring_service_logs WHERE service_id = $1")
        .bind(service_id)
        .execute(&mut tx)
        .await?;
    let result = sqlx::query("DELETE FROM recurring_services WHERE id = $1")
        .bind(service_id)
        .execute(&mut tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("recurring service"));
    }
    tx.commit().await?;
    info!(service_id = %service_id, "recurring service deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_log(
    Extension(pool): Extension<PgPool>,
    Path(log_id): Path<Uuid>,
    Query(query): Query<DeleteLogQuery>,
) -> AppResult<StatusCode> {
    let mut tx = pool.begin().await?;
    let generated: Option<Option<Uuid>> = sqlx::query_scalar(
        "SELECT generated_order_id FROM recurring_service_logs WHERE id = $1",
    )
    .bind(log_id)
    .fetch_optional(&mut tx)
    .await?;
    let generated = generated.ok_or(AppError::NotFound("execution log"))?;

    sqlx::query("DELETE FROM recurring_service_logs WHERE id = $1")
        .bind(log_id)
        .execute(&mut tx)
        .await?;

    let order_id = generated.filter(|_| query.delete_order.unwrap_or(false));
    if let Some(order_id) = order_id {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut tx)
            .await?;
    }
    tx.commit().await?;
    info!(log_id = %log_id, order_id = ?order_id, "execution log deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Manual trigger for the daily batch. Skipped while the scheduled run is in progress.
pub async fn run_due(Extension(pool): Extension<PgPool>) -> AppResult<(StatusCode, Json<BatchReport>)> {
    let Some(_permit) = RECURRING_GUARD.try_acquire() else {
        return Err(AppError::Conflict {
            code: "RUN_IN_PROGRESS",
            message: "recurring services are already being processed".into(),
        });
    };
    let report = automation(&pool)
        .process_due(Utc::now())
        .await
        .map_err(|err| AppError::Message(format!("{err:#}")))?;
    Ok((StatusCode::OK, Json(report)))
}

fn automation_store(pool: &PgPool) -> PgRecurringStore {
    PgRecurringStore::new(pool.clone())
}

async fn fetch_logs(
    pool: &PgPool,
    service_id: Uuid,
    limit: Option<i64>,
) -> Result<Vec<RecurringServiceLog>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, service_id, execution_date, status, message, generated_order_id
        FROM recurring_service_logs
        WHERE service_id = $1
        ORDER BY execution_date DESC
        LIMIT $2
        "#,
    )
    .bind(service_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(RecurringServiceLog::from_row).collect()
}

#[derive(Debug, Serialize)]
pub struct ServiceDetail {
    #[serde(flatten)]
    pub service: RecurringService,
    pub logs: Vec<RecurringServiceLog>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceFilter {
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub client_id: Uuid,
    pub name: String,
    pub value: Decimal,
    pub recurrence: Recurrence,
    #[serde(default)]
    pub is_automatic: Option<bool>,
    #[serde(default)]
    pub has_commission: Option<bool>,
    #[serde(default)]
    pub auto_billing: Option<bool>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_execution: Option<DateTime<Utc>>,
}

impl CreateServiceRequest {
    fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::bad_request("name is required"));
        }
        if self.value <= Decimal::ZERO {
            return Err(AppError::bad_request("value must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateServiceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub is_automatic: Option<bool>,
    #[serde(default)]
    pub has_commission: Option<bool>,
    #[serde(default)]
    pub auto_billing: Option<bool>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_execution: Option<DateTime<Utc>>,
}

impl UpdateServiceRequest {
    fn validate(&self) -> AppResult<()> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(AppError::bad_request("name cannot be blank"));
        }
        if matches!(self.value, Some(value) if value <= Decimal::ZERO) {
            return Err(AppError::bad_request("value must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteLogQuery {
    #[serde(default)]
    pub delete_order: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_requires_name_and_positive_value() {
        let request: CreateServiceRequest = serde_json::from_value(json!({
            "client_id": Uuid::new_v4(),
            "name": "  ",
            "value": "150.00",
            "recurrence": "MONTHLY"
        }))
        .unwrap();
        assert!(request.validate().is_err());

        let request: CreateServiceRequest = serde_json::from_value(json!({
            "client_id": Uuid::new_v4(),
            "name": "Spot semanal",
            "value": 0,
            "recurrence": "WEEKLY"
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn update_request_accepts_partial_payloads() {
        let request: UpdateServiceRequest =
            serde_json::from_value(json!({ "recurrence": "QUARTERLY" })).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.recurrence, Some(Recurrence::Quarterly));
        assert!(request.name.is_none());
    }
}
