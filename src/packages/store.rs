use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::orders::{OrderKind, OrderStatus};

use super::models::{BillingOrderSnapshot, ClientPackage, LedgerEntry, PackageWithBilling};

/// key: package-store -> storage seam for the sync orchestrator
#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn load_package(&self, package_id: Uuid) -> Result<Option<PackageWithBilling>, sqlx::Error>;

    /// Every order linked to the package; the ledger decides which ones count.
    async fn ledger_entries(&self, package_id: Uuid) -> Result<Vec<LedgerEntry>, sqlx::Error>;

    async fn set_used_audios(&self, package_id: Uuid, used_audios: i32) -> Result<(), sqlx::Error>;

    async fn update_billing_order(
        &self,
        order_id: Uuid,
        venda_valor: Decimal,
        comentarios: &str,
    ) -> Result<(), sqlx::Error>;

    async fn package_ids(&self) -> Result<Vec<Uuid>, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgPackageStore {
    pool: PgPool,
}

impl PgPackageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackageStore for PgPackageStore {
    async fn load_package(&self, package_id: Uuid) -> Result<Option<PackageWithBilling>, sqlx::Error> {
        let sql = format!("SELECT {} FROM client_packages WHERE id = $1", ClientPackage::COLUMNS);
        let Some(row) = sqlx::query(&sql)
            .bind(package_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let package = ClientPackage::from_row(&row)?;

        let billing_order = match package.billing_order_id {
            Some(order_id) => sqlx::query(
                r#"
                SELECT id, COALESCE(venda_valor, 0) AS venda_valor, comentarios, faturado
                FROM orders
                WHERE id = $1
                "#,
            )
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| -> Result<BillingOrderSnapshot, sqlx::Error> {
                Ok(BillingOrderSnapshot {
                    id: row.try_get("id")?,
                    venda_valor: row.try_get("venda_valor")?,
                    comentarios: row.try_get("comentarios")?,
                    faturado: row.try_get("faturado")?,
                })
            })
            .transpose()?,
            None => None,
        };

        Ok(Some(PackageWithBilling {
            package,
            billing_order,
        }))
    }

    async fn ledger_entries(&self, package_id: Uuid) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT kind, status, is_bonus, credits_consumed
            FROM orders
            WHERE package_id = $1
              AND status <> 'CANCELADO'
              AND is_bonus = FALSE
            "#,
        )
        .bind(package_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                let status: String = row.try_get("status")?;
                Ok(LedgerEntry {
                    kind: OrderKind::from_string(&kind),
                    status: OrderStatus::from_string(&status),
                    is_bonus: row.try_get("is_bonus")?,
                    credits_consumed: row.try_get("credits_consumed")?,
                })
            })
            .collect()
    }

    async fn set_used_audios(&self, package_id: Uuid, used_audios: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE client_packages SET used_audios = $1, updated_at = NOW() WHERE id = $2")
            .bind(used_audios)
            .bind(package_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_billing_order(
        &self,
        order_id: Uuid,
        venda_valor: Decimal,
        comentarios: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE orders SET venda_valor = $1, comentarios = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(venda_valor)
        .bind(comentarios)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn package_ids(&self) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM client_packages ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
    }
}
