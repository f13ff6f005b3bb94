use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::orders::store::{insert_order, next_sale_number};
use crate::orders::{NewOrder, OrderKind, OrderStatus};

use super::models::{MaterializedSale, NewExecutionLog, RecurringSale, RecurringService};

pub const RECURRING_SERVICE_TYPE: &str = "SERVIÇO RECORRENTE";

/// key: recurring-store -> storage seam for the automation
#[async_trait]
pub trait RecurringStore: Send + Sync {
    /// Active, automatic services whose next execution is at or before `now`.
    async fn due_services(&self, now: DateTime<Utc>) -> Result<Vec<RecurringService>, sqlx::Error>;

    async fn find_service(&self, service_id: Uuid) -> Result<Option<RecurringService>, sqlx::Error>;

    /// Creates the sale order, moves the schedule to `next_execution` and writes the SUCCESS
    /// log as one unit. Nothing is kept when any of the writes fails.
    async fn record_execution(
        &self,
        service_id: Uuid,
        sale: &RecurringSale,
        next_execution: DateTime<Utc>,
    ) -> Result<MaterializedSale, sqlx::Error>;

    async fn record_log(&self, log: &NewExecutionLog) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgRecurringStore {
    pool: PgPool,
}

impl PgRecurringStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecurringStore for PgRecurringStore {
    async fn due_services(&self, now: DateTime<Utc>) -> Result<Vec<RecurringService>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM recurring_services s
            LEFT JOIN clients c ON c.id = s.client_id
            WHERE s.active = TRUE AND s.is_automatic = TRUE AND s.next_execution <= $1
            ORDER BY s.next_execution ASC
            "#,
            RecurringService::COLUMNS
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.iter().map(RecurringService::from_row).collect()
    }

    async fn find_service(&self, service_id: Uuid) -> Result<Option<RecurringService>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM recurring_services s
            LEFT JOIN clients c ON c.id = s.client_id
            WHERE s.id = $1
            "#,
            RecurringService::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(RecurringService::from_row).transpose()
    }

    async fn record_execution(
        &self,
        service_id: Uuid,
        sale: &RecurringSale,
        next_execution: DateTime<Utc>,
    ) -> Result<MaterializedSale, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let numero_venda = next_sale_number(&mut tx).await?;
        let order = insert_order(
            &mut tx,
            &NewOrder {
                client_id: sale.client_id,
                title: sale.title.clone(),
                kind: OrderKind::DirectSale,
                status: OrderStatus::Venda,
                package_id: None,
                credits_consumed: None,
                is_bonus: false,
                venda_valor: sale.venda_valor,
                cache_valor: Decimal::ZERO,
                numero_venda: Some(numero_venda),
                comentarios: Some(sale.comentarios.clone()),
                service_type: Some(RECURRING_SERVICE_TYPE.to_string()),
                faturado: sale.faturado,
                data_faturar: None,
                date: sale.date,
            },
        )
        .await?;
        let created = MaterializedSale {
            order_id: order.id,
            numero_venda,
        };

        sqlx::query(
            r#"
            UPDATE recurring_services
            SET last_execution = $2, next_execution = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(service_id)
        .bind(sale.date)
        .bind(next_execution)
        .execute(&mut tx)
        .await?;

        insert_log(&mut tx, &NewExecutionLog::success(service_id, &created)).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn record_log(&self, log: &NewExecutionLog) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_log(&mut conn, log).await
    }
}

async fn insert_log(conn: &mut PgConnection, log: &NewExecutionLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO recurring_service_logs (id, service_id, status, message, generated_order_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(log.service_id)
    .bind(log.status.as_str())
    .bind(&log.message)
    .bind(log.generated_order_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
