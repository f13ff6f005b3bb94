use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use super::recurrence::Recurrence;

/// key: recurring-model -> client subscription that periodically becomes a sale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringService {
    pub id: Uuid,
    pub client_id: Uuid,
    pub client_name: Option<String>,
    pub name: String,
    pub value: Decimal,
    pub recurrence: Recurrence,
    pub is_automatic: bool,
    pub has_commission: bool,
    pub auto_billing: bool,
    pub active: bool,
    pub start_date: DateTime<Utc>,
    pub next_execution: DateTime<Utc>,
    pub last_execution: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringService {
    /// Columns of `recurring_services s` joined with `clients c`.
    pub const COLUMNS: &'static str = "s.id, s.client_id, c.name AS client_name, s.name, \
        COALESCE(s.value, 0) AS value, s.recurrence, s.is_automatic, s.has_commission, \
        s.auto_billing, s.active, s.start_date, s.next_execution, s.last_execution, \
        s.created_at, s.updated_at";

    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let recurrence: String = row.try_get("recurrence")?;
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            client_name: row.try_get("client_name")?,
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            recurrence: Recurrence::from_string(&recurrence),
            is_automatic: row.try_get("is_automatic")?,
            has_commission: row.try_get("has_commission")?,
            auto_billing: row.try_get("auto_billing")?,
            active: row.try_get("active")?,
            start_date: row.try_get("start_date")?,
            next_execution: row.try_get("next_execution")?,
            last_execution: row.try_get("last_execution")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.is_automatic && self.next_execution <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "SUCCESS" => ExecutionStatus::Success,
            _ => ExecutionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringServiceLog {
    pub id: Uuid,
    pub service_id: Uuid,
    pub execution_date: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub message: String,
    pub generated_order_id: Option<Uuid>,
}

impl RecurringServiceLog {
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            service_id: row.try_get("service_id")?,
            execution_date: row.try_get("execution_date")?,
            status: ExecutionStatus::from_string(&status),
            message: row.try_get("message")?,
            generated_order_id: row.try_get("generated_order_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecutionLog {
    pub service_id: Uuid,
    pub status: ExecutionStatus,
    pub message: String,
    pub generated_order_id: Option<Uuid>,
}

impl NewExecutionLog {
    pub fn success(service_id: Uuid, sale: &MaterializedSale) -> Self {
        Self {
            service_id,
            status: ExecutionStatus::Success,
            message: format!("Order #{} generated", sale.numero_venda),
            generated_order_id: Some(sale.order_id),
        }
    }

    pub fn failed(service_id: Uuid, error: &anyhow::Error) -> Self {
        Self {
            service_id,
            status: ExecutionStatus::Failed,
            message: format!("Execution failed: {error:#}"),
            generated_order_id: None,
        }
    }
}

/// The order a recurring service turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringSale {
    pub client_id: Uuid,
    pub title: String,
    pub venda_valor: Decimal,
    pub faturado: bool,
    pub comentarios: String,
    pub date: DateTime<Utc>,
}

impl RecurringSale {
    pub fn for_service(service: &RecurringService, now: DateTime<Utc>) -> Self {
        Self {
            client_id: service.client_id,
            title: service.name.clone(),
            venda_valor: service.value,
            faturado: service.auto_billing,
            comentarios: format!(
                "Automatic entry for recurring service: {} ({})",
                service.name,
                service.recurrence.as_str()
            ),
            date: now,
        }
    }
}

/// A sale order materialized from a recurring service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedSale {
    pub order_id: Uuid,
    pub numero_venda: i64,
}
