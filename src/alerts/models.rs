use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::packages::PackageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Renewal,
    StagnantOrder,
    DailyBillingSummary,
    OverdueBilling,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Renewal => "RENEWAL",
            NotificationKind::StagnantOrder => "STAGNANT_ORDER",
            NotificationKind::DailyBillingSummary => "DAILY_BILLING_SUMMARY",
            NotificationKind::OverdueBilling => "OVERDUE_BILLING",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "RENEWAL" => Some(NotificationKind::Renewal),
            "STAGNANT_ORDER" => Some(NotificationKind::StagnantOrder),
            "DAILY_BILLING_SUMMARY" => Some(NotificationKind::DailyBillingSummary),
            "OVERDUE_BILLING" => Some(NotificationKind::OverdueBilling),
            _ => None,
        }
    }
}

/// Team a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetRole {
    Atendimento,
    Financeiro,
}

impl TargetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRole::Atendimento => "ATENDIMENTO",
            TargetRole::Financeiro => "FINANCEIRO",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "ATENDIMENTO" => Some(TargetRole::Atendimento),
            "FINANCEIRO" => Some(TargetRole::Financeiro),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: String,
    pub target_role: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub const COLUMNS: &'static str =
        "id, kind, target_role, title, message, link, read, created_at";

    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            target_role: row.try_get("target_role")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            link: row.try_get("link")?,
            read: row.try_get("read")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub target_role: TargetRole,
    pub title: String,
    pub message: String,
    pub link: String,
}

/// Active auto-renewing package as seen by the renewal rule.
#[derive(Debug, Clone)]
pub struct RenewalCandidate {
    pub package_id: Uuid,
    pub package_name: String,
    pub client_name: String,
    pub package_type: PackageType,
    pub audio_limit: i32,
    pub used_audios: i32,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalReason {
    Expired,
    Exhausted,
}

/// Exhaustion wins over expiry; only limited package types can be exhausted.
pub fn renewal_reason(candidate: &RenewalCandidate, now: DateTime<Utc>) -> Option<RenewalReason> {
    if candidate.package_type.is_limited() && candidate.used_audios >= candidate.audio_limit {
        return Some(RenewalReason::Exhausted);
    }
    if candidate.end_date <= now {
        return Some(RenewalReason::Expired);
    }
    None
}

/// An order referenced by the stagnant/overdue rules.
#[derive(Debug, Clone)]
pub struct AlertOrder {
    pub id: Uuid,
    pub title: String,
    pub client_name: String,
    pub numero_venda: Option<i64>,
    pub data_faturar: Option<DateTime<Utc>>,
}

impl AlertOrder {
    pub fn label(&self) -> String {
        match self.numero_venda {
            Some(number) => format!("#{number}"),
            None => format!("\"{}\"", self.title),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertReport {
    pub renewals: usize,
    pub stagnant_orders: usize,
    pub daily_billing_summary: usize,
    pub overdue_billings: usize,
    pub errors: Vec<String>,
}

impl AlertReport {
    pub fn created(&self) -> usize {
        self.renewals + self.stagnant_orders + self.daily_billing_summary + self.overdue_billings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(package_type: PackageType, limit: i32, used: i32, ends_in_days: i64) -> RenewalCandidate {
        RenewalCandidate {
            package_id: Uuid::new_v4(),
            package_name: "Plano Mensal".into(),
            client_name: "Rádio Sul".into(),
            package_type,
            audio_limit: limit,
            used_audios: used,
            end_date: Utc::now() + Duration::days(ends_in_days),
        }
    }

    #[test]
    fn exhausted_overrides_expired() {
        let pkg = candidate(PackageType::FixedWithLimit, 10, 10, -2);
        assert_eq!(renewal_reason(&pkg, Utc::now()), Some(RenewalReason::Exhausted));
    }

    #[test]
    fn unlimited_types_only_expire() {
        let now = Utc::now();
        for package_type in [
            PackageType::FixedUnlimited,
            PackageType::FixedOnDemand,
            PackageType::PayPerUse,
        ] {
            assert_eq!(renewal_reason(&candidate(package_type, 0, 40, 5), now), None);
            assert_eq!(
                renewal_reason(&candidate(package_type, 0, 40, -1), now),
                Some(RenewalReason::Expired)
            );
        }
    }

    #[test]
    fn unknown_types_count_as_limited() {
        let pkg = candidate(PackageType::Other, 5, 6, 30);
        assert_eq!(renewal_reason(&pkg, Utc::now()), Some(RenewalReason::Exhausted));
    }

    #[test]
    fn healthy_package_needs_nothing() {
        let pkg = candidate(PackageType::FixedWithLimit, 10, 3, 30);
        assert_eq!(renewal_reason(&pkg, Utc::now()), None);
    }

    #[test]
    fn role_and_kind_labels() {
        assert_eq!(TargetRole::from_string("FINANCEIRO"), Some(TargetRole::Financeiro));
        assert_eq!(TargetRole::from_string("admin"), None);
        assert_eq!(
            NotificationKind::from_string(NotificationKind::OverdueBilling.as_str()),
            Some(NotificationKind::OverdueBilling)
        );
    }
}
