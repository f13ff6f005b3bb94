use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::orders::store::{client_exists, insert_order, next_sale_number};
use crate::orders::{NewOrder, OrderKind, OrderStatus};

use super::models::{ClientPackage, PackageType};
use super::policy::bills_anything;
use super::service::{PackageService, ResyncSummary, SyncReport};
use super::store::{PackageStore, PgPackageStore};

pub fn package_service(pool: &PgPool) -> PackageService<PgPackageStore> {
    PackageService::new(Arc::new(PgPackageStore::new(pool.clone())))
}

/// key: packages-api -> rest endpoints
pub async fn list_active_packages(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<Vec<ClientPackage>>> {
    let sql = format!(
        "SELECT {} FROM client_packages WHERE active = TRUE ORDER BY created_at DESC",
        ClientPackage::COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&pool).await?;
    let packages = rows
        .iter()
        .map(ClientPackage::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(packages))
}

pub async fn list_client_packages(
    Extension(pool): Extension<PgPool>,
    Path(client_id): Path<Uuid>,
) -> AppResult<Json<Vec<ClientPackage>>> {
    let sql = format!(
        "SELECT {} FROM client_packages WHERE client_id = $1 ORDER BY created_at DESC",
        ClientPackage::COLUMNS
    );
    let rows = sqlx::query(&sql).bind(client_id).fetch_all(&pool).await?;
    let packages = rows
        .iter()
        .map(ClientPackage::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(packages))
}

pub async fn active_client_package(
    Extension(pool): Extension<PgPool>,
    Path(client_id): Path<Uuid>,
) -> AppResult<Json<Option<ClientPackage>>> {
    let sql = format!(
        r#"
        SELECT {} FROM client_packages
        WHERE client_id = $1 AND active = TRUE AND start_date <= NOW() AND end_date >= NOW()
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        ClientPackage::COLUMNS
    );
    let row = sqlx::query(&sql).bind(client_id).fetch_optional(&pool).await?;
    Ok(Json(row.as_ref().map(ClientPackage::from_row).transpose()?))
}

pub async fn create_package(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<CreatePackageRequest>,
) -> AppResult<(StatusCode, Json<ClientPackage>)> {
    payload.validate()?;

    let mut tx = pool.begin().await?;
    if !client_exists(&mut tx, payload.client_id).await? {
        return Err(AppError::NotFound("client"));
    }

    // One active package per client.
    sqlx::query(
        "UPDATE client_packages SET active = FALSE, updated_at = NOW() WHERE client_id = $1 AND active = TRUE",
    )
    .bind(payload.client_id)
    .execute(&mut tx)
    .await?;

    let sql = format!(
        r#"
        INSERT INTO client_packages (
            id, client_id, name, client_code, type, fixed_fee, extra_audio_fee, audio_limit,
            used_audios, start_date, end_date, active, auto_renewal
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, TRUE, $11)
        RETURNING {}
        "#,
        ClientPackage::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(payload.client_id)
        .bind(payload.name.trim())
        .bind(normalize_code(payload.client_code.as_deref()))
        .bind(payload.package_type.as_str())
        .bind(payload.fixed_fee)
        .bind(payload.extra_audio_fee.unwrap_or(Decimal::ZERO))
        .bind(payload.audio_limit.unwrap_or(0))
        .bind(payload.start_date)
        .bind(payload.end_date)
        .bind(payload.auto_renewal.unwrap_or(false))
        .fetch_one(&mut tx)
        .await?;
    let package = ClientPackage::from_row(&row)?;

    if bills_anything(&package.terms()) {
        open_billing_order(&mut tx, &package).await?;
    }
    tx.commit().await?;

    let service = package_service(&pool);
    service.sync_package(package.id).await?;
    let package = reload(&service_store(&pool), package.id).await?;
    Ok((StatusCode::CREATED, Json(package)))
}

pub async fn update_package(
    Extension(pool): Extension<PgPool>,
    Path(package_id): Path<Uuid>,
    Json(payload): Json<UpdatePackageRequest>,
) -> AppResult<Json<ClientPackage>> {
    payload.validate()?;
    let store = service_store(&pool);
    let current = store
        .load_package(package_id)
        .await?
        .ok_or(AppError::NotFound("package"))?;

    let invoiced = current
        .billing_order
        .as_ref()
        .map(|order| order.faturado)
        .unwrap_or(false);
    let force = payload.force_update.unwrap_or(false);
    if invoiced && !force {
        return Err(AppError::Conflict {
            code: "BILLING_ALREADY_INVOICED",
            message: "The billing order of this package was already invoiced. Resend with force_update to continue.".into(),
        });
    }

    let mut tx = pool.begin().await?;
    let sql = format!(
        r#"
        UPDATE client_packages SET
            name = COALESCE($2, name),
            client_code = CASE WHEN $3 THEN $4 ELSE client_code END,
            type = COALESCE($5, type),
            fixed_fee = COALESCE($6, fixed_fee),
            extra_audio_fee = COALESCE($7, extra_audio_fee),
            audio_limit = COALESCE($8, audio_limit),
            start_date = COALESCE($9, start_date),
            end_date = COALESCE($10, end_date),
            active = COALESCE($11, active),
            auto_renewal = COALESCE($12, auto_renewal),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        ClientPackage::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(package_id)
        .bind(payload.name.as_deref().map(str::trim))
        .bind(payload.client_code.is_some())
        .bind(normalize_code(payload.client_code.as_deref()))
        .bind(payload.package_type.map(|value| value.as_str()))
        .bind(payload.fixed_fee)
        .bind(payload.extra_audio_fee)
        .bind(payload.audio_limit)
        .bind(payload.start_date)
        .bind(payload.end_date)
        .bind(payload.active)
        .bind(payload.auto_renewal)
        .fetch_one(&mut tx)
        .await?;
    let updated = ClientPackage::from_row(&row)?;

    match current.billing_order {
        Some(billing_order) => {
            sqlx::query(
                r#"
                UPDATE orders SET
                    title = $2,
                    date = $3,
                    faturado = CASE WHEN $4 THEN FALSE ELSE faturado END,
                    was_reopened = CASE WHEN $4 THEN TRUE ELSE was_reopened END,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(billing_order.id)
            .bind(&updated.name)
            .bind(updated.start_date)
            .bind(force && billing_order.faturado)
            .execute(&mut tx)
            .await?;
        }
        None if bills_anything(&updated.terms()) => {
            // Packages that start billing after creation get their billing order here, and
            // the sync below prices every credit already consumed.
            open_billing_order(&mut tx, &updated).await?;
        }
        None => {}
    }
    tx.commit().await?;

    package_service(&pool).sync_package(package_id).await?;
    Ok(Json(reload(&store, package_id).await?))
}

pub async fn delete_package(
    Extension(pool): Extension<PgPool>,
    Path(package_id): Path<Uuid>,
    Query(query): Query<DeletePackageQuery>,
) -> AppResult<StatusCode> {
    let store = service_store(&pool);
    let current = store
        .load_package(package_id)
        .await?
        .ok_or(AppError::NotFound("package"))?;

    let invoiced = current
        .billing_order
        .as_ref()
        .map(|order| order.faturado)
        .unwrap_or(false);
    if invoiced && !query.force_delete.unwrap_or(false) {
        return Err(AppError::Conflict {
            code: "BILLING_ALREADY_INVOICED",
            message: "The billing order of this package was already invoiced. Resend with force_delete to continue.".into(),
        });
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM client_packages WHERE id = $1")
        .bind(package_id)
        .execute(&mut tx)
        .await?;
    if let Some(billing_order_id) = current.package.billing_order_id {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(billing_order_id)
            .execute(&mut tx)
            .await?;
    }
    tx.commit().await?;

    info!(%package_id, "package deleted with its billing order");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn sync_package(
    Extension(pool): Extension<PgPool>,
    Path(package_id): Path<Uuid>,
) -> AppResult<Json<SyncReport>> {
    package_service(&pool)
        .sync_package(package_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("package"))
}

pub async fn resync_packages(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<ResyncSummary>> {
    Ok(Json(package_service(&pool).resync_all().await?))
}

/// Creates the billing order of a package and links it.
async fn open_billing_order(conn: &mut PgConnection, package: &ClientPackage) -> AppResult<Uuid> {
    let numero_venda = next_sale_number(&mut *conn).await?;
    let order = insert_order(
        &mut *conn,
        &NewOrder {
            client_id: package.client_id,
            title: package.name.clone(),
            kind: OrderKind::BillingCharge,
            status: OrderStatus::Venda,
            package_id: None,
            credits_consumed: None,
            is_bonus: false,
            venda_valor: package.fixed_fee.max(Decimal::ZERO),
            cache_valor: Decimal::ZERO,
            numero_venda: Some(numero_venda),
            comentarios: Some(format!("Automatic entry for package: {}", package.name)),
            service_type: Some("PLANO MENSAL".to_string()),
            faturado: false,
            data_faturar: Some(package.end_date + Duration::days(1)),
            date: package.start_date,
        },
    )
    .await?;

    sqlx::query("UPDATE client_packages SET billing_order_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(order.id)
        .bind(package.id)
        .execute(&mut *conn)
        .await?;
    info!(package_id = %package.id, billing_order = %order.id, numero_venda, "opened package billing order");
    Ok(order.id)
}

fn service_store(pool: &PgPool) -> PgPackageStore {
    PgPackageStore::new(pool.clone())
}

async fn reload(store: &PgPackageStore, package_id: Uuid) -> AppResult<ClientPackage> {
    store
        .load_package(package_id)
        .await?
        .map(|loaded| loaded.package)
        .ok_or(AppError::NotFound("package"))
}

fn normalize_code(code: Option<&str>) -> Option<String> {
    code.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn validate_money(field: &str, value: Option<Decimal>) -> AppResult<()> {
    match value {
        Some(amount) if amount < Decimal::ZERO => {
            Err(AppError::bad_request(format!("{field} must be non-negative")))
        }
        _ => Ok(()),
    }
}

fn validate_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> AppResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Err(AppError::bad_request("end_date must not precede start_date"))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePackageRequest {
    pub client_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub fixed_fee: Decimal,
    #[serde(default)]
    pub extra_audio_fee: Option<Decimal>,
    #[serde(default)]
    pub audio_limit: Option<i32>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub client_code: Option<String>,
    #[serde(default)]
    pub auto_renewal: Option<bool>,
}

impl CreatePackageRequest {
    fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::bad_request("name is required"));
        }
        if self.audio_limit.unwrap_or(0) < 0 {
            return Err(AppError::bad_request("audio_limit must be non-negative"));
        }
        validate_money("fixed_fee", Some(self.fixed_fee))?;
        validate_money("extra_audio_fee", self.extra_audio_fee)?;
        validate_window(Some(self.start_date), Some(self.end_date))
    }

    #[cfg(test)]
    fn terms(&self) -> super::models::BillingTerms {
        super::models::BillingTerms {
            package_type: self.package_type,
            fixed_fee: self.fixed_fee,
            extra_audio_fee: self.extra_audio_fee.unwrap_or(Decimal::ZERO),
            audio_limit: self.audio_limit.unwrap_or(0),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePackageRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub package_type: Option<PackageType>,
    #[serde(default)]
    pub fixed_fee: Option<Decimal>,
    #[serde(default)]
    pub extra_audio_fee: Option<Decimal>,
    #[serde(default)]
    pub audio_limit: Option<i32>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_code: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub auto_renewal: Option<bool>,
    #[serde(default)]
    pub force_update: Option<bool>,
}

impl UpdatePackageRequest {
    fn validate(&self) -> AppResult<()> {
        if matches!(self.name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(AppError::bad_request("name must not be empty"));
        }
        if self.audio_limit.unwrap_or(0) < 0 {
            return Err(AppError::bad_request("audio_limit must be non-negative"));
        }
        validate_money("fixed_fee", self.fixed_fee)?;
        validate_money("extra_audio_fee", self.extra_audio_fee)?;
        validate_window(self.start_date, self.end_date)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeletePackageQuery {
    #[serde(default)]
    pub force_delete: Option<bool>,
}
