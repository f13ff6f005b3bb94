use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use super::models::{BillingTerms, PackageType};

/// Amount owed for the current cycle of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingEvaluation {
    pub amount_owed: Decimal,
    pub extra_units: i64,
}

/// key: billing-policy -> amount owed for a cycle given total usage
pub fn evaluate(terms: &BillingTerms, total_usage: i64) -> BillingEvaluation {
    let usage = total_usage.max(0);
    let fixed_fee = non_negative(terms.fixed_fee);
    let extra_fee = non_negative(terms.extra_audio_fee);
    let limit = i64::from(terms.audio_limit.max(0));

    let (amount, extra_units) = match terms.package_type {
        PackageType::FixedWithLimit if usage > limit => {
            let extra = usage - limit;
            (fixed_fee + Decimal::from(extra) * extra_fee, extra)
        }
        PackageType::FixedOnDemand => (fixed_fee + Decimal::from(usage) * extra_fee, usage),
        PackageType::PayPerUse => (Decimal::from(usage) * extra_fee, usage),
        PackageType::FixedUnlimited | PackageType::FixedWithLimit | PackageType::Other => {
            (fixed_fee, 0)
        }
    };

    BillingEvaluation {
        amount_owed: to_cents(amount),
        extra_units,
    }
}

/// Description written on the billing order.
pub fn billing_description(package_name: &str, extra_units: i64) -> String {
    if extra_units > 0 {
        format!("Consolidated billing: {package_name}. Extra audios: {extra_units}.")
    } else {
        format!("Consolidated billing: {package_name}.")
    }
}

/// Whether a package with these terms produces anything to invoice.
pub fn bills_anything(terms: &BillingTerms) -> bool {
    match terms.package_type {
        PackageType::PayPerUse => terms.extra_audio_fee > Decimal::ZERO,
        PackageType::FixedOnDemand => {
            terms.fixed_fee > Decimal::ZERO || terms.extra_audio_fee > Decimal::ZERO
        }
        _ => terms.fixed_fee > Decimal::ZERO,
    }
}

fn non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    fn terms(package_type: PackageType, fixed: &str, extra: &str, limit: i32) -> BillingTerms {
        BillingTerms {
            package_type,
            fixed_fee: money(fixed),
            extra_audio_fee: money(extra),
            audio_limit: limit,
        }
    }

    #[test]
    fn policy_table() {
        let cases = [
            (terms(PackageType::FixedWithLimit, "100", "5", 10), 8, "100", 0),
            (terms(PackageType::FixedWithLimit, "100", "5", 10), 10, "100", 0),
            (terms(PackageType::FixedWithLimit, "100", "5", 10), 13, "115", 3),
            (terms(PackageType::FixedOnDemand, "50", "10", 0), 0, "50", 0),
            (terms(PackageType::FixedOnDemand, "50", "10", 5), 3, "80", 3),
            (terms(PackageType::PayPerUse, "0", "15.50", 0), 3, "46.50", 3),
            (terms(PackageType::PayPerUse, "99", "15.50", 0), 2, "31.00", 2),
            (terms(PackageType::FixedUnlimited, "200", "7", 0), 0, "200", 0),
            (terms(PackageType::FixedUnlimited, "200", "7", 0), 10_000, "200", 0),
            (terms(PackageType::Other, "42", "7", 1), 9, "42", 0),
        ];

        for (terms, usage, expected_amount, expected_extra) in cases {
            let outcome = evaluate(&terms, usage);
            assert_eq!(
                outcome.amount_owed,
                money(expected_amount),
                "{:?} usage={usage}",
                terms.package_type
            );
            assert_eq!(outcome.extra_units, expected_extra, "{:?}", terms.package_type);
        }
    }

    #[test]
    fn negative_inputs_are_treated_as_zero() {
        let outcome = evaluate(&terms(PackageType::FixedWithLimit, "-10", "-3", -4), 2);
        assert_eq!(outcome.amount_owed, Decimal::ZERO);
        assert_eq!(outcome.extra_units, 2);

        let outcome = evaluate(&terms(PackageType::PayPerUse, "0", "5", 0), -7);
        assert_eq!(outcome.amount_owed, Decimal::ZERO);
        assert_eq!(outcome.extra_units, 0);
    }

    #[test]
    fn amounts_are_rounded_to_cents() {
        let outcome = evaluate(&terms(PackageType::PayPerUse, "0", "0.335", 0), 3);
        assert_eq!(outcome.amount_owed, money("1.01"));
    }

    #[test]
    fn description_mentions_extras_only_when_present() {
        assert_eq!(billing_description("Plano A", 0), "Consolidated billing: Plano A.");
        assert_eq!(
            billing_description("Plano A", 3),
            "Consolidated billing: Plano A. Extra audios: 3."
        );
    }

    #[test]
    fn billable_terms() {
        assert!(bills_anything(&terms(PackageType::FixedWithLimit, "10", "0", 5)));
        assert!(!bills_anything(&terms(PackageType::FixedUnlimited, "0", "9", 0)));
        assert!(bills_anything(&terms(PackageType::PayPerUse, "0", "10", 0)));
        assert!(!bills_anything(&terms(PackageType::PayPerUse, "0", "0", 0)));
    }
}
