use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppError;
use crate::packages::ClientPackage;

use super::models::OrderKind;

/// The money-relevant fields of an order as submitted.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub package_id: Option<Uuid>,
    pub credits_consumed: Option<i32>,
    pub is_bonus: bool,
    pub venda_valor: Decimal,
    pub allow_overage: bool,
    /// Credits the order already debits, when an existing consumption order is edited.
    pub held: Option<HeldCredits>,
    /// The order is being stored as cancelled, so it debits nothing.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldCredits {
    pub package_id: Uuid,
    pub credits: i32,
}

/// How an order is stored after the package rules ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: OrderKind,
    pub package_id: Option<Uuid>,
    pub venda_valor: Decimal,
    pub credits_consumed: Option<i32>,
}

/// key: order-rules -> direct sale vs package consumption
///
/// `package` is the package named by the draft, already loaded; `committed_usage` is the
/// usage the package carries excluding this order. Validity and limit checks only run when
/// the order starts debiting the package or debits more than it already held.
pub fn classify_order(
    draft: &OrderDraft,
    package: Option<&ClientPackage>,
    committed_usage: i32,
    now: DateTime<Utc>,
) -> Result<Classification, AppError> {
    let credits = draft.credits_consumed.filter(|credits| *credits > 0);

    if draft.is_bonus {
        return Ok(Classification {
            kind: OrderKind::DirectSale,
            package_id: None,
            venda_valor: Decimal::ZERO,
            credits_consumed: credits,
        });
    }

    if draft.venda_valor > Decimal::ZERO || draft.package_id.is_none() {
        return Ok(Classification {
            kind: OrderKind::DirectSale,
            package_id: None,
            venda_valor: draft.venda_valor.max(Decimal::ZERO),
            credits_consumed: credits,
        });
    }

    let package = package.ok_or(AppError::NotFound("package"))?;
    let credits = credits.unwrap_or(1);

    let within_held = matches!(
        draft.held,
        Some(held) if held.package_id == package.id && credits <= held.credits
    );

    if package.active && !draft.cancelled && !within_held {
        if !package.is_valid_at(now) {
            return Err(AppError::BadRequest {
                code: "PACKAGE_EXPIRED",
                message: format!(
                    "The client's package is valid from {} to {}. Set a sale value or update the package.",
                    package.start_date.format("%d/%m/%Y"),
                    package.end_date.format("%d/%m/%Y")
                ),
            });
        }

        let usage_after = committed_usage.saturating_add(credits);
        if package.package_type.is_limited()
            && usage_after > package.audio_limit
            && !draft.allow_overage
        {
            return Err(AppError::BadRequest {
                code: "PACKAGE_LIMIT_REACHED",
                message: format!(
                    "The package limit of {} credits was reached. Set a sale value, allow overage or change the plan.",
                    package.audio_limit
                ),
            });
        }
    }

    Ok(Classification {
        kind: OrderKind::PackageConsumption,
        package_id: Some(package.id),
        venda_valor: Decimal::ZERO,
        credits_consumed: Some(credits),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::PackageType;
    use chrono::Duration;

    fn package(package_type: PackageType, limit: i32) -> ClientPackage {
        let now = Utc::now();
        ClientPackage {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            name: "Plano".into(),
            client_code: None,
            package_type,
            fixed_fee: Decimal::new(300, 0),
            extra_audio_fee: Decimal::new(8, 0),
            audio_limit: limit,
            used_audios: 0,
            start_date: now - Duration::days(10),
            end_date: now + Duration::days(20),
            active: true,
            auto_renewal: false,
            billing_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn draft(package_id: Option<Uuid>, credits: Option<i32>) -> OrderDraft {
        OrderDraft {
            package_id,
            credits_consumed: credits,
            is_bonus: false,
            venda_valor: Decimal::ZERO,
            allow_overage: false,
            held: None,
            cancelled: false,
        }
    }

    fn held(pkg: &ClientPackage, credits: i32) -> Option<HeldCredits> {
        Some(HeldCredits {
            package_id: pkg.id,
            credits,
        })
    }

    #[test]
    fn bonus_orders_never_touch_packages() {
        let pkg = package(PackageType::FixedWithLimit, 10);
        let mut bonus = draft(Some(pkg.id), Some(3));
        bonus.is_bonus = true;
        bonus.venda_valor = Decimal::new(50, 0);
        let outcome = classify_order(&bonus, Some(&pkg), 0, Utc::now()).unwrap();
        assert_eq!(outcome.kind, OrderKind::DirectSale);
        assert_eq!(outcome.package_id, None);
        assert_eq!(outcome.venda_valor, Decimal::ZERO);
    }

    #[test]
    fn positive_sale_value_makes_a_direct_sale() {
        let pkg = package(PackageType::FixedWithLimit, 10);
        let mut sale = draft(Some(pkg.id), Some(1));
        sale.venda_valor = Decimal::new(12000, 2);
        let outcome = classify_order(&sale, Some(&pkg), 0, Utc::now()).unwrap();
        assert_eq!(outcome.kind, OrderKind::DirectSale);
        assert_eq!(outcome.package_id, None);
        assert_eq!(outcome.venda_valor, Decimal::new(12000, 2));
    }

    #[test]
    fn consumption_defaults_to_one_credit() {
        let pkg = package(PackageType::FixedUnlimited, 0);
        let outcome = classify_order(&draft(Some(pkg.id), None), Some(&pkg), 500, Utc::now()).unwrap();
        assert_eq!(outcome.kind, OrderKind::PackageConsumption);
        assert_eq!(outcome.credits_consumed, Some(1));
        assert_eq!(outcome.venda_valor, Decimal::ZERO);
    }

    #[test]
    fn expired_package_is_rejected() {
        let mut pkg = package(PackageType::FixedUnlimited, 0);
        pkg.end_date = Utc::now() - Duration::days(1);
        let err = classify_order(&draft(Some(pkg.id), Some(1)), Some(&pkg), 0, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest { code: "PACKAGE_EXPIRED", .. }));
    }

    #[test]
    fn limited_package_blocks_overage_unless_allowed() {
        let pkg = package(PackageType::FixedWithLimit, 20);
        let err = classify_order(&draft(Some(pkg.id), Some(3)), Some(&pkg), 18, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest { code: "PACKAGE_LIMIT_REACHED", .. }));

        let mut allowed = draft(Some(pkg.id), Some(3));
        allowed.allow_overage = true;
        let outcome = classify_order(&allowed, Some(&pkg), 18, Utc::now()).unwrap();
        assert_eq!(outcome.kind, OrderKind::PackageConsumption);
    }

    #[test]
    fn on_demand_packages_have_no_ceiling() {
        let pkg = package(PackageType::FixedOnDemand, 0);
        assert!(classify_order(&draft(Some(pkg.id), Some(5)), Some(&pkg), 100, Utc::now()).is_ok());
        let pkg = package(PackageType::PayPerUse, 0);
        assert!(classify_order(&draft(Some(pkg.id), Some(5)), Some(&pkg), 100, Utc::now()).is_ok());
    }

    #[test]
    fn unknown_package_is_not_found() {
        let err = classify_order(&draft(Some(Uuid::new_v4()), Some(1)), None, 0, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::NotFound("package")));
    }

    #[test]
    fn editing_a_held_order_skips_expiry_check() {
        let mut pkg = package(PackageType::FixedUnlimited, 0);
        pkg.end_date = Utc::now() - Duration::days(1);
        let mut edit = draft(Some(pkg.id), Some(5));
        edit.held = held(&pkg, 5);
        let outcome = classify_order(&edit, Some(&pkg), 0, Utc::now()).unwrap();
        assert_eq!(outcome.kind, OrderKind::PackageConsumption);
        assert_eq!(outcome.credits_consumed, Some(5));
    }

    #[test]
    fn editing_a_held_order_over_limit_is_allowed_until_it_grows() {
        // 23 of 20 used after an allowed overage; this order holds 5 of them.
        let pkg = package(PackageType::FixedWithLimit, 20);
        let mut edit = draft(Some(pkg.id), Some(5));
        edit.held = held(&pkg, 5);
        assert!(classify_order(&edit, Some(&pkg), 18, Utc::now()).is_ok());

        edit.credits_consumed = Some(6);
        let err = classify_order(&edit, Some(&pkg), 18, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest { code: "PACKAGE_LIMIT_REACHED", .. }));
    }

    #[test]
    fn held_credits_on_another_package_do_not_count() {
        let mut pkg = package(PackageType::FixedUnlimited, 0);
        pkg.end_date = Utc::now() - Duration::days(1);
        let mut moved = draft(Some(pkg.id), Some(1));
        moved.held = Some(HeldCredits {
            package_id: Uuid::new_v4(),
            credits: 5,
        });
        assert!(classify_order(&moved, Some(&pkg), 0, Utc::now()).is_err());
    }

    #[test]
    fn cancelling_is_always_allowed() {
        let mut pkg = package(PackageType::FixedWithLimit, 20);
        pkg.end_date = Utc::now() - Duration::days(1);
        let mut cancel = draft(Some(pkg.id), Some(5));
        cancel.cancelled = true;
        let outcome = classify_order(&cancel, Some(&pkg), 23, Utc::now()).unwrap();
        assert_eq!(outcome.package_id, Some(pkg.id));
    }
}
