use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

/// What an order represents financially. Stored as text in `orders.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Sold on its own; the sale value is the money.
    DirectSale,
    /// Debits credits from a package; carries no sale value.
    PackageConsumption,
    /// The periodic invoice line of a package.
    BillingCharge,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::DirectSale => "DIRECT_SALE",
            OrderKind::PackageConsumption => "PACKAGE_CONSUMPTION",
            OrderKind::BillingCharge => "BILLING_CHARGE",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PACKAGE_CONSUMPTION" => OrderKind::PackageConsumption,
            "BILLING_CHARGE" => OrderKind::BillingCharge,
            _ => OrderKind::DirectSale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pedido,
    Venda,
    Entregue,
    Pendente,
    Cancelado,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pedido => "PEDIDO",
            OrderStatus::Venda => "VENDA",
            OrderStatus::Entregue => "ENTREGUE",
            OrderStatus::Pendente => "PENDENTE",
            OrderStatus::Cancelado => "CANCELADO",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PEDIDO" => OrderStatus::Pedido,
            "ENTREGUE" => OrderStatus::Entregue,
            "PENDENTE" => OrderStatus::Pendente,
            "CANCELADO" => OrderStatus::Cancelado,
            _ => OrderStatus::Venda,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub package_id: Option<Uuid>,
    pub credits_consumed: Option<i32>,
    pub is_bonus: bool,
    pub venda_valor: Decimal,
    pub cache_valor: Decimal,
    pub numero_venda: Option<i64>,
    pub comentarios: Option<String>,
    pub service_type: Option<String>,
    pub faturado: bool,
    pub was_reopened: bool,
    pub data_faturar: Option<DateTime<Utc>>,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub const COLUMNS: &'static str = "id, client_id, title, kind, status, package_id, \
        credits_consumed, is_bonus, COALESCE(venda_valor, 0) AS venda_valor, \
        COALESCE(cache_valor, 0) AS cache_valor, numero_venda, comentarios, service_type, \
        faturado, was_reopened, data_faturar, date, created_at, updated_at";

    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            title: row.try_get("title")?,
            kind: OrderKind::from_string(&kind),
            status: OrderStatus::from_string(&status),
            package_id: row.try_get("package_id")?,
            credits_consumed: row.try_get("credits_consumed")?,
            is_bonus: row.try_get("is_bonus")?,
            venda_valor: row.try_get("venda_valor")?,
            cache_valor: row.try_get("cache_valor")?,
            numero_venda: row.try_get("numero_venda")?,
            comentarios: row.try_get("comentarios")?,
            service_type: row.try_get("service_type")?,
            faturado: row.try_get("faturado")?,
            was_reopened: row.try_get("was_reopened")?,
            data_faturar: row.try_get("data_faturar")?,
            date: row.try_get("date")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Insert payload shared by the order routes, the package billing flow and the recurring
/// automation.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub client_id: Uuid,
    pub title: String,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub package_id: Option<Uuid>,
    pub credits_consumed: Option<i32>,
    pub is_bonus: bool,
    pub venda_valor: Decimal,
    pub cache_valor: Decimal,
    pub numero_venda: Option<i64>,
    pub comentarios: Option<String>,
    pub service_type: Option<String>,
    pub faturado: bool,
    pub data_faturar: Option<DateTime<Utc>>,
    pub date: DateTime<Utc>,
}
