use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::packages::PackageType;

use super::models::{AlertOrder, NewNotification, NotificationKind, RenewalCandidate, TargetRole};

/// key: alert-store -> reads the rules need plus notification writes
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn renewal_candidates(&self) -> Result<Vec<RenewalCandidate>, sqlx::Error>;

    /// `PEDIDO` orders created at or before `created_before`.
    async fn stagnant_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<AlertOrder>, sqlx::Error>;

    /// Uninvoiced orders whose billing date falls in `[from, to)`.
    async fn count_billings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error>;

    /// Uninvoiced `VENDA`/`ENTREGUE` orders with a billing date before `billing_before`.
    async fn overdue_billings(&self, billing_before: DateTime<Utc>) -> Result<Vec<AlertOrder>, sqlx::Error>;

    async fn has_unread(
        &self,
        kind: NotificationKind,
        role: TargetRole,
        link: &str,
    ) -> Result<bool, sqlx::Error>;

    async fn has_unread_since(
        &self,
        kind: NotificationKind,
        role: TargetRole,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>;

    async fn create_notification(&self, notification: &NewNotification) -> Result<Uuid, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn alert_order(row: &sqlx::postgres::PgRow) -> Result<AlertOrder, sqlx::Error> {
    Ok(AlertOrder {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        client_name: row
            .try_get::<Option<String>, _>("client_name")?
            .unwrap_or_default(),
        numero_venda: row.try_get("numero_venda")?,
        data_faturar: row.try_get("data_faturar")?,
    })
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn renewal_candidates(&self) -> Result<Vec<RenewalCandidate>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.name, c.name AS client_name, p.type,
                   COALESCE(p.audio_limit, 0) AS audio_limit,
                   COALESCE(p.used_audios, 0) AS used_audios,
                   p.end_date
            FROM client_packages p
            LEFT JOIN clients c ON c.id = p.client_id
            WHERE p.active = TRUE AND p.auto_renewal = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let package_type: String = row.try_get("type")?;
                Ok(RenewalCandidate {
                    package_id: row.try_get("id")?,
                    package_name: row.try_get("name")?,
                    client_name: row
                        .try_get::<Option<String>, _>("client_name")?
                        .unwrap_or_default(),
                    package_type: PackageType::from_string(&package_type),
                    audio_limit: row.try_get("audio_limit")?,
                    used_audios: row.try_get("used_audios")?,
                    end_date: row.try_get("end_date")?,
                })
            })
            .collect()
    }

    async fn stagnant_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<AlertOrder>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.title, c.name AS client_name, o.numero_venda, o.data_faturar
            FROM orders o
            LEFT JOIN clients c ON c.id = o.client_id
            WHERE o.status = 'PEDIDO' AND o.created_at <= $1
            ORDER BY o.created_at ASC
            "#,
        )
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_order).collect()
    }

    async fn count_billings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM orders
            WHERE faturado = FALSE AND data_faturar >= $1 AND data_faturar < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
    }

    async fn overdue_billings(&self, billing_before: DateTime<Utc>) -> Result<Vec<AlertOrder>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.title, c.name AS client_name, o.numero_venda, o.data_faturar
            FROM orders o
            LEFT JOIN clients c ON c.id = o.client_id
            WHERE o.faturado = FALSE
              AND o.status IN ('VENDA', 'ENTREGUE')
              AND o.data_faturar < $1
            ORDER BY o.data_faturar ASC
            "#,
        )
        .bind(billing_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_order).collect()
    }

    async fn has_unread(
        &self,
        kind: NotificationKind,
        role: TargetRole,
        link: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM notifications
                WHERE kind = $1 AND target_role = $2 AND link = $3 AND read = FALSE
            )
            "#,
        )
        .bind(kind.as_str())
        .bind(role.as_str())
        .bind(link)
        .fetch_one(&self.pool)
        .await
    }

    async fn has_unread_since(
        &self,
        kind: NotificationKind,
        role: TargetRole,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM notifications
                WHERE kind = $1 AND target_role = $2 AND created_at >= $3 AND read = FALSE
            )
            "#,
        )
        .bind(kind.as_str())
        .bind(role.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
    }

    async fn create_notification(&self, notification: &NewNotification) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, kind, target_role, title, message, link)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(notification.kind.as_str())
        .bind(notification.target_role.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.link)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}
