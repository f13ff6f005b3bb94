use crate::orders::{OrderKind, OrderStatus};

use super::models::LedgerEntry;

/// Whether an order debits credits from its package.
pub fn counts_toward_usage(entry: &LedgerEntry) -> bool {
    entry.kind == OrderKind::PackageConsumption
        && entry.status != OrderStatus::Cancelado
        && !entry.is_bonus
}

/// Credits debited by a single order. A credit-bearing order always consumes at least one.
pub fn credits_of(entry: &LedgerEntry) -> i32 {
    match entry.credits_consumed {
        Some(credits) if credits > 0 => credits,
        _ => 1,
    }
}

/// key: credit-ledger -> total consumed credits of a package
pub fn compute_usage<'a, I>(entries: I) -> i32
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    entries
        .into_iter()
        .filter(|entry| counts_toward_usage(entry))
        .map(credits_of)
        .fold(0i32, |total, credits| total.saturating_add(credits))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: OrderKind, status: OrderStatus, bonus: bool, credits: Option<i32>) -> LedgerEntry {
        LedgerEntry {
            kind,
            status,
            is_bonus: bonus,
            credits_consumed: credits,
        }
    }

    #[test]
    fn empty_ledger_is_zero() {
        assert_eq!(compute_usage(&[]), 0);
    }

    #[test]
    fn missing_credits_count_as_one() {
        let entries = vec![
            entry(OrderKind::PackageConsumption, OrderStatus::Venda, false, None),
            entry(OrderKind::PackageConsumption, OrderStatus::Pedido, false, Some(0)),
            entry(OrderKind::PackageConsumption, OrderStatus::Entregue, false, Some(4)),
        ];
        assert_eq!(compute_usage(&entries), 6);
    }

    #[test]
    fn cancelled_bonus_and_non_consumption_orders_are_ignored() {
        let entries = vec![
            entry(OrderKind::PackageConsumption, OrderStatus::Cancelado, false, Some(50)),
            entry(OrderKind::PackageConsumption, OrderStatus::Venda, true, Some(50)),
            entry(OrderKind::DirectSale, OrderStatus::Venda, false, Some(50)),
            entry(OrderKind::BillingCharge, OrderStatus::Venda, false, Some(50)),
            entry(OrderKind::PackageConsumption, OrderStatus::Venda, false, Some(2)),
        ];
        assert_eq!(compute_usage(&entries), 2);
    }
}
