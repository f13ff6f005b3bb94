use std::collections::{BTreeSet, HashMap};

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::packages::api::package_service;
use crate::packages::ClientPackage;

use super::models::{NewOrder, Order, OrderKind, OrderStatus};
use super::rules::{classify_order, HeldCredits, OrderDraft};
use super::store::{client_exists, delete_order as remove_order, fetch_order, insert_order, next_sale_number};

/// key: orders-api -> order endpoints that keep package usage in sync
pub async fn list_orders(
    Extension(pool): Extension<PgPool>,
    Query(filter): Query<OrderFilter>,
) -> AppResult<Json<Vec<Order>>> {
    let sql = format!(
        r#"
        SELECT {} FROM orders
        WHERE ($1::uuid IS NULL OR package_id = $1)
          AND ($2::uuid IS NULL OR client_id = $2)
        ORDER BY date DESC, created_at DESC
        LIMIT 500
        "#,
        Order::COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(filter.package_id)
        .bind(filter.client_id)
        .fetch_all(&pool)
        .await?;
    let orders = rows
        .iter()
        .map(Order::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(orders))
}

pub async fn create_order(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let mut tx = pool.begin().await?;
    let mut pending = HashMap::new();
    let order = create_one(&mut tx, &payload, &mut pending, Utc::now()).await?;
    tx.commit().await?;

    if let Some(package_id) = order.package_id {
        package_service(&pool).sync_package(package_id).await?;
    }
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn create_orders_batch(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<Vec<CreateOrderRequest>>,
) -> AppResult<(StatusCode, Json<Vec<Order>>)> {
    if payload.is_empty() {
        return Err(AppError::bad_request("batch must contain at least one order"));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut pending = HashMap::new();
    let mut created = Vec::with_capacity(payload.len());
    for request in &payload {
        created.push(create_one(&mut tx, request, &mut pending, now).await?);
    }
    tx.commit().await?;

    let touched: BTreeSet<Uuid> = created.iter().filter_map(|order| order.package_id).collect();
    let service = package_service(&pool);
    for package_id in touched {
        service.sync_package(package_id).await?;
    }
    info!(count = created.len(), "batch orders created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_order(
    Extension(pool): Extension<PgPool>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateOrderRequest>,
) -> AppResult<Json<Order>> {
    let mut tx = pool.begin().await?;
    let existing = fetch_order(&mut tx, order_id)
        .await?
        .ok_or(AppError::NotFound("order"))?;

    if existing.kind == OrderKind::BillingCharge && payload.touches_pricing() {
        return Err(AppError::bad_request(
            "billing orders are priced by their package; edit the package instead",
        ));
    }

    let status = payload.status.unwrap_or(existing.status);
    let classification = if existing.kind == OrderKind::BillingCharge {
        None
    } else {
        let draft = payload.draft(&existing);
        let package = match draft.package_id {
            Some(package_id) => fetch_package(&mut tx, package_id).await?,
            None => None,
        };
        let committed = match (&package, draft.held) {
            (Some(package), Some(held)) if held.package_id == package.id => {
                package.used_audios - held.credits
            }
            (Some(package), _) => package.used_audios,
            (None, _) => 0,
        };
        Some(classify_order(&draft, package.as_ref(), committed, Utc::now())?)
    };

    let (kind, package_id, venda_valor, credits) = match &classification {
        Some(c) => (c.kind, c.package_id, c.venda_valor, c.credits_consumed),
        None => (
            existing.kind,
            existing.package_id,
            existing.venda_valor,
            existing.credits_consumed,
        ),
    };

    let sql = format!(
        r#"
        UPDATE orders SET
            title = $2,
            kind = $3,
            status = $4,
            package_id = $5,
            credits_consumed = $6,
            is_bonus = $7,
            venda_valor = $8,
            comentarios = $9,
            faturado = $10,
            data_faturar = $11,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        Order::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(order_id)
        .bind(payload.title.as_deref().unwrap_or(&existing.title))
        .bind(kind.as_str())
        .bind(status.as_str())
        .bind(package_id)
        .bind(credits)
        .bind(payload.is_bonus.unwrap_or(existing.is_bonus))
        .bind(venda_valor)
        .bind(payload.comentarios.clone().or_else(|| existing.comentarios.clone()))
        .bind(payload.faturado.unwrap_or(existing.faturado))
        .bind(payload.data_faturar.or(existing.data_faturar))
        .fetch_one(&mut tx)
        .await?;
    let updated = Order::from_row(&row)?;
    tx.commit().await?;

    let touched: BTreeSet<Uuid> = [existing.package_id, updated.package_id]
        .into_iter()
        .flatten()
        .collect();
    let service = package_service(&pool);
    for package_id in touched {
        service.sync_package(package_id).await?;
    }
    Ok(Json(updated))
}

pub async fn delete_order(
    Extension(pool): Extension<PgPool>,
    Path(order_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut tx = pool.begin().await?;
    let existing = fetch_order(&mut tx, order_id)
        .await?
        .ok_or(AppError::NotFound("order"))?;

    if existing.kind == OrderKind::BillingCharge {
        let linked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM client_packages WHERE billing_order_id = $1")
                .bind(order_id)
                .fetch_optional(&mut tx)
                .await?;
        if let Some(package_id) = linked {
            return Err(AppError::Conflict {
                code: "BILLING_ORDER_LINKED",
                message: format!("order is the billing order of package {package_id}; delete the package instead"),
            });
        }
    }

    remove_order(&mut tx, order_id).await?;
    tx.commit().await?;

    if let Some(package_id) = existing.package_id {
        package_service(&pool).sync_package(package_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate_order(
    Extension(pool): Extension<PgPool>,
    Path(order_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let mut tx = pool.begin().await?;
    let source = fetch_order(&mut tx, order_id)
        .await?
        .ok_or(AppError::NotFound("order"))?;
    if source.kind == OrderKind::BillingCharge {
        return Err(AppError::bad_request("billing orders cannot be duplicated"));
    }

    let numero_venda = match source.numero_venda {
        Some(_) => Some(next_sale_number(&mut tx).await?),
        None => None,
    };
    let copy = insert_order(
        &mut tx,
        &NewOrder {
            client_id: source.client_id,
            title: source.title.clone(),
            kind: source.kind,
            status: source.status,
            package_id: source.package_id,
            credits_consumed: source.credits_consumed,
            is_bonus: source.is_bonus,
            venda_valor: source.venda_valor,
            cache_valor: source.cache_valor,
            numero_venda,
            comentarios: source.comentarios.clone(),
            service_type: source.service_type.clone(),
            faturado: false,
            data_faturar: source.data_faturar,
            date: Utc::now(),
        },
    )
    .await?;
    tx.commit().await?;

    if let Some(package_id) = copy.package_id {
        package_service(&pool).sync_package(package_id).await?;
    }
    info!(source = %order_id, copy = %copy.id, "order duplicated");
    Ok((StatusCode::CREATED, Json(copy)))
}

/// Classifies and inserts one order. `pending` tracks credits added earlier in the same
/// transaction so batch limits see them.
async fn create_one(
    conn: &mut PgConnection,
    request: &CreateOrderRequest,
    pending: &mut HashMap<Uuid, i32>,
    now: DateTime<Utc>,
) -> AppResult<Order> {
    request.validate()?;
    if !client_exists(&mut *conn, request.client_id).await? {
        return Err(AppError::NotFound("client"));
    }

    let package = match request.package_id {
        Some(package_id) => fetch_package(&mut *conn, package_id).await?,
        None => None,
    };
    let committed = package
        .as_ref()
        .map(|package| package.used_audios + pending.get(&package.id).copied().unwrap_or(0))
        .unwrap_or(0);
    let draft = request.draft();
    let classification = classify_order(&draft, package.as_ref(), committed, now)?;

    if let (Some(package_id), Some(credits), false) = (
        classification.package_id,
        classification.credits_consumed,
        draft.cancelled,
    ) {
        *pending.entry(package_id).or_insert(0) += credits;
    }

    let status = request.status.unwrap_or(OrderStatus::Pedido);
    let numero_venda = match request.numero_venda {
        Some(number) => {
            let taken: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE numero_venda = $1)")
                    .bind(number)
                    .fetch_one(&mut *conn)
                    .await?;
            if taken {
                return Err(AppError::BadRequest {
                    code: "SALE_NUMBER_TAKEN",
                    message: format!("sale number {number} is already in use"),
                });
            }
            Some(number)
        }
        None if status == OrderStatus::Venda => Some(next_sale_number(&mut *conn).await?),
        None => None,
    };

    let order = insert_order(
        &mut *conn,
        &NewOrder {
            client_id: request.client_id,
            title: request.title.trim().to_string(),
            kind: classification.kind,
            status,
            package_id: classification.package_id,
            credits_consumed: classification.credits_consumed,
            is_bonus: request.is_bonus.unwrap_or(false),
            venda_valor: classification.venda_valor,
            cache_valor: request.cache_valor.unwrap_or(Decimal::ZERO).max(Decimal::ZERO),
            numero_venda,
            comentarios: request.comentarios.clone(),
            service_type: request.service_type.clone(),
            faturado: request.faturado.unwrap_or(false),
            data_faturar: request.data_faturar,
            date: request.date.unwrap_or(now),
        },
    )
    .await?;

    if request.package_id.is_some() && order.package_id.is_none() {
        warn!(order = %order.id, "order stored as a direct sale instead of package consumption");
    }
    Ok(order)
}

async fn fetch_package(
    conn: &mut PgConnection,
    package_id: Uuid,
) -> Result<Option<ClientPackage>, sqlx::Error> {
    let sql = format!("SELECT {} FROM client_packages WHERE id = $1", ClientPackage::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(package_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(ClientPackage::from_row).transpose()
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub package_id: Option<Uuid>,
    #[serde(default)]
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub client_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub package_id: Option<Uuid>,
    #[serde(default)]
    pub credits_consumed: Option<i32>,
    #[serde(default)]
    pub is_bonus: Option<bool>,
    #[serde(default)]
    pub venda_valor: Option<Decimal>,
    #[serde(default)]
    pub cache_valor: Option<Decimal>,
    #[serde(default)]
    pub numero_venda: Option<i64>,
    #[serde(default)]
    pub comentarios: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub faturado: Option<bool>,
    #[serde(default)]
    pub data_faturar: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allow_overage: Option<bool>,
}

impl CreateOrderRequest {
    fn validate(&self) -> AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::bad_request("title is required"));
        }
        if matches!(self.credits_consumed, Some(credits) if credits < 0) {
            return Err(AppError::bad_request("credits_consumed must be non-negative"));
        }
        if matches!(self.venda_valor, Some(value) if value < Decimal::ZERO) {
            return Err(AppError::bad_request("venda_valor must be non-negative"));
        }
        Ok(())
    }

    fn draft(&self) -> OrderDraft {
        OrderDraft {
            package_id: self.package_id,
            credits_consumed: self.credits_consumed,
            is_bonus: self.is_bonus.unwrap_or(false),
            venda_valor: self.venda_valor.unwrap_or(Decimal::ZERO),
            allow_overage: self.allow_overage.unwrap_or(false),
            held: None,
            cancelled: self.status == Some(OrderStatus::Cancelado),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub package_id: Option<Uuid>,
    #[serde(default)]
    pub detach_package: Option<bool>,
    #[serde(default)]
    pub credits_consumed: Option<i32>,
    #[serde(default)]
    pub is_bonus: Option<bool>,
    #[serde(default)]
    pub venda_valor: Option<Decimal>,
    #[serde(default)]
    pub comentarios: Option<String>,
    #[serde(default)]
    pub faturado: Option<bool>,
    #[serde(default)]
    pub data_faturar: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allow_overage: Option<bool>,
}

impl UpdateOrderRequest {
    fn touches_pricing(&self) -> bool {
        self.package_id.is_some()
            || self.detach_package.is_some()
            || self.credits_consumed.is_some()
            || self.is_bonus.is_some()
            || self.venda_valor.is_some()
    }

    /// The edited order as the package rules see it. Credits the existing order already
    /// debits are carried as held so editing it does not re-run the entry checks.
    fn draft(&self, existing: &Order) -> OrderDraft {
        let package_id = if self.detach_package.unwrap_or(false) {
            None
        } else {
            self.package_id.or(existing.package_id)
        };
        let held = match existing.package_id {
            Some(package_id)
                if existing.kind == OrderKind::PackageConsumption
                    && existing.status != OrderStatus::Cancelado =>
            {
                Some(HeldCredits {
                    package_id,
                    credits: existing.credits_consumed.unwrap_or(1).max(1),
                })
            }
            _ => None,
        };
        OrderDraft {
            package_id,
            credits_consumed: self.credits_consumed.or(existing.credits_consumed),
            is_bonus: self.is_bonus.unwrap_or(existing.is_bonus),
            venda_valor: self.venda_valor.unwrap_or(existing.venda_valor),
            allow_overage: self.allow_overage.unwrap_or(false),
            held,
            cancelled: self.status.unwrap_or(existing.status) == OrderStatus::Cancelado,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_draft_uses_defaults() {
        let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "client_id": Uuid::nil(),
            "title": "Spot 30s",
            "package_id": Uuid::nil(),
        }))
        .unwrap();
        assert!(request.validate().is_ok());
        let draft = request.draft();
        assert!(!draft.is_bonus);
        assert_eq!(draft.venda_valor, Decimal::ZERO);
        assert_eq!(draft.credits_consumed, None);
    }

    #[test]
    fn create_request_requires_title() {
        let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "client_id": Uuid::nil(),
            "title": "  ",
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn status_only_updates_do_not_touch_pricing() {
        let request: UpdateOrderRequest =
            serde_json::from_value(serde_json::json!({ "status": "ENTREGUE" })).unwrap();
        assert!(!request.touches_pricing());
        let request: UpdateOrderRequest =
            serde_json::from_value(serde_json::json!({ "credits_consumed": 2 })).unwrap();
        assert!(request.touches_pricing());
    }

    fn consumption_order(package_id: Uuid, credits: i32) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            title: "Spot 30s".into(),
            kind: OrderKind::PackageConsumption,
            status: OrderStatus::Venda,
            package_id: Some(package_id),
            credits_consumed: Some(credits),
            is_bonus: false,
            venda_valor: Decimal::ZERO,
            cache_valor: Decimal::ZERO,
            numero_venda: None,
            comentarios: None,
            service_type: None,
            faturado: false,
            was_reopened: false,
            data_faturar: None,
            date: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn limited_package(limit: i32, used: i32) -> ClientPackage {
        let now = Utc::now();
        ClientPackage {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            name: "Plano Rádio".into(),
            client_code: None,
            package_type: crate::packages::PackageType::FixedWithLimit,
            fixed_fee: Decimal::new(300, 0),
            extra_audio_fee: Decimal::new(8, 0),
            audio_limit: limit,
            used_audios: used,
            start_date: now - chrono::Duration::days(30),
            end_date: now + chrono::Duration::days(1),
            active: true,
            auto_renewal: false,
            billing_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_change_on_expired_package_is_accepted() {
        let mut package = limited_package(20, 5);
        package.end_date = Utc::now() - chrono::Duration::days(1);
        let existing = consumption_order(package.id, 5);
        let request: UpdateOrderRequest =
            serde_json::from_value(serde_json::json!({ "status": "ENTREGUE" })).unwrap();

        let draft = request.draft(&existing);
        assert_eq!(draft.held.map(|held| held.credits), Some(5));
        let outcome = classify_order(&draft, Some(&package), 0, Utc::now()).unwrap();
        assert_eq!(outcome.kind, OrderKind::PackageConsumption);
        assert_eq!(outcome.package_id, Some(package.id));
    }

    #[test]
    fn cancelling_an_order_over_the_limit_is_accepted() {
        // 23 of 20 after an allowed overage.
        let package = limited_package(20, 23);
        let existing = consumption_order(package.id, 5);
        let request: UpdateOrderRequest =
            serde_json::from_value(serde_json::json!({ "status": "CANCELADO" })).unwrap();

        let draft = request.draft(&existing);
        assert!(draft.cancelled);
        assert!(classify_order(&draft, Some(&package), 18, Utc::now()).is_ok());

        let edit: UpdateOrderRequest =
            serde_json::from_value(serde_json::json!({ "title": "Spot 45s" })).unwrap();
        assert!(classify_order(&edit.draft(&existing), Some(&package), 18, Utc::now()).is_ok());
    }

    #[test]
    fn reactivating_a_cancelled_order_is_checked_again() {
        let package = limited_package(20, 20);
        let mut existing = consumption_order(package.id, 5);
        existing.status = OrderStatus::Cancelado;
        let request: UpdateOrderRequest =
            serde_json::from_value(serde_json::json!({ "status": "VENDA" })).unwrap();

        let draft = request.draft(&existing);
        assert!(draft.held.is_none());
        let err = classify_order(&draft, Some(&package), 20, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest { code: "PACKAGE_LIMIT_REACHED", .. }));
    }
}
