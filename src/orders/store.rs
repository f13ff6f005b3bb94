use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::config;

use super::models::{NewOrder, Order};

/// key: sale-numbering -> next sequential `numero_venda`
pub async fn next_sale_number(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    let last: Option<i64> = sqlx::query_scalar("SELECT MAX(numero_venda) FROM orders")
        .fetch_one(&mut *conn)
        .await?;
    Ok(sale_number_after(last))
}

pub(crate) fn sale_number_after(last: Option<i64>) -> i64 {
    last.filter(|value| *value > 0)
        .unwrap_or(*config::SALE_NUMBER_BASE)
        + 1
}

pub async fn insert_order(conn: &mut PgConnection, order: &NewOrder) -> Result<Order, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO orders (
            id, client_id, title, kind, status, package_id, credits_consumed, is_bonus,
            venda_valor, cache_valor, numero_venda, comentarios, service_type, faturado,
            data_faturar, date
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING {}
        "#,
        Order::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(order.client_id)
        .bind(&order.title)
        .bind(order.kind.as_str())
        .bind(order.status.as_str())
        .bind(order.package_id)
        .bind(order.credits_consumed)
        .bind(order.is_bonus)
        .bind(order.venda_valor)
        .bind(order.cache_valor)
        .bind(order.numero_venda)
        .bind(&order.comentarios)
        .bind(&order.service_type)
        .bind(order.faturado)
        .bind(order.data_faturar)
        .bind(order.date)
        .fetch_one(&mut *conn)
        .await?;
    Order::from_row(&row)
}

pub async fn fetch_order(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1", Order::COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(Order::from_row).transpose()
}

pub async fn delete_order(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM orders WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn client_exists(conn: &mut PgConnection, client_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM clients WHERE id = $1) AS present")
        .bind(client_id)
        .fetch_one(&mut *conn)
        .await?;
    row.try_get("present")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sale_numbers_continue_from_the_highest_existing_one() {
        assert_eq!(sale_number_after(Some(50_000)), 50_001);
        assert_eq!(sale_number_after(None), *config::SALE_NUMBER_BASE + 1);
        assert_eq!(sale_number_after(Some(0)), *config::SALE_NUMBER_BASE + 1);
    }
}
