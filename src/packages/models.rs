use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::orders::{OrderKind, OrderStatus};

/// Billing policy of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageType {
    /// Fixed fee, no usage limit.
    #[serde(rename = "FIXO_ILIMITADO")]
    FixedUnlimited,
    /// Fixed fee covering `audio_limit` credits, extras billed per unit.
    #[serde(rename = "FIXO_COM_LIMITE")]
    FixedWithLimit,
    /// Fixed fee plus every unit billed.
    #[serde(rename = "FIXO_SOB_DEMANDA")]
    FixedOnDemand,
    /// Pure pay-per-use.
    #[serde(rename = "SOB_DEMANDA_AVULSO")]
    PayPerUse,
    /// Any label this build does not know; billed as the fixed fee.
    #[serde(other, rename = "OUTRO")]
    Other,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::FixedUnlimited => "FIXO_ILIMITADO",
            PackageType::FixedWithLimit => "FIXO_COM_LIMITE",
            PackageType::FixedOnDemand => "FIXO_SOB_DEMANDA",
            PackageType::PayPerUse => "SOB_DEMANDA_AVULSO",
            PackageType::Other => "OUTRO",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "FIXO_ILIMITADO" => PackageType::FixedUnlimited,
            "FIXO_COM_LIMITE" => PackageType::FixedWithLimit,
            "FIXO_SOB_DEMANDA" => PackageType::FixedOnDemand,
            "SOB_DEMANDA_AVULSO" => PackageType::PayPerUse,
            _ => PackageType::Other,
        }
    }

    /// Whether running out of credits blocks the package.
    pub fn is_limited(&self) -> bool {
        matches!(self, PackageType::FixedWithLimit | PackageType::Other)
    }
}

/// key: package-model -> client_packages row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPackage {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub client_code: Option<String>,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub fixed_fee: Decimal,
    pub extra_audio_fee: Decimal,
    pub audio_limit: i32,
    pub used_audios: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub active: bool,
    pub auto_renewal: bool,
    pub billing_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientPackage {
    pub const COLUMNS: &'static str = "id, client_id, name, client_code, type, \
        COALESCE(fixed_fee, 0) AS fixed_fee, COALESCE(extra_audio_fee, 0) AS extra_audio_fee, \
        COALESCE(audio_limit, 0) AS audio_limit, COALESCE(used_audios, 0) AS used_audios, \
        start_date, end_date, active, auto_renewal, billing_order_id, created_at, updated_at";

    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let package_type: String = row.try_get("type")?;
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            name: row.try_get("name")?,
            client_code: row.try_get("client_code")?,
            package_type: PackageType::from_string(&package_type),
            fixed_fee: row.try_get("fixed_fee")?,
            extra_audio_fee: row.try_get("extra_audio_fee")?,
            audio_limit: row.try_get("audio_limit")?,
            used_audios: row.try_get("used_audios")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            active: row.try_get("active")?,
            auto_renewal: row.try_get("auto_renewal")?,
            billing_order_id: row.try_get("billing_order_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn terms(&self) -> BillingTerms {
        BillingTerms {
            package_type: self.package_type,
            fixed_fee: self.fixed_fee,
            extra_audio_fee: self.extra_audio_fee,
            audio_limit: self.audio_limit,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }
}

/// The billing-affecting fields of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingTerms {
    pub package_type: PackageType,
    pub fixed_fee: Decimal,
    pub extra_audio_fee: Decimal,
    pub audio_limit: i32,
}

/// The billing order's fields the sync compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingOrderSnapshot {
    pub id: Uuid,
    pub venda_valor: Decimal,
    pub comentarios: Option<String>,
    pub faturado: bool,
}

/// A package together with its linked billing order, when that order still exists.
#[derive(Debug, Clone)]
pub struct PackageWithBilling {
    pub package: ClientPackage,
    pub billing_order: Option<BillingOrderSnapshot>,
}

/// The order fields the credit ledger reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub is_bonus: bool,
    pub credits_consumed: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_package_labels_are_treated_as_limited() {
        let parsed = PackageType::from_string("PACOTE_ANTIGO");
        assert_eq!(parsed, PackageType::Other);
        assert!(parsed.is_limited());
        assert!(!PackageType::FixedOnDemand.is_limited());
        assert!(!PackageType::PayPerUse.is_limited());
        assert!(!PackageType::FixedUnlimited.is_limited());
    }

    #[test]
    fn package_type_serializes_with_wire_labels() {
        let json = serde_json::to_string(&PackageType::FixedWithLimit).unwrap();
        assert_eq!(json, "\"FIXO_COM_LIMITE\"");
        let parsed: PackageType = serde_json::from_str("\"SOB_DEMANDA_AVULSO\"").unwrap();
        assert_eq!(parsed, PackageType::PayPerUse);
    }
}
