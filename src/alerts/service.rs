use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use once_cell::sync::Lazy;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config;
use crate::schedule::{self, Cadence, TickGuard};

use super::models::{
    renewal_reason, AlertReport, NewNotification, NotificationKind, RenewalReason, TargetRole,
};
use super::store::{AlertStore, PgAlertStore};

/// Shared by the hourly timer and the manual trigger.
pub static ALERTS_GUARD: Lazy<TickGuard> = Lazy::new(TickGuard::new);

/// key: system-alerts -> role-targeted notifications from periodic rules
pub struct SystemAlertService<S: ?Sized> {
    store: Arc<S>,
    offset: FixedOffset,
    stagnant_after: Duration,
    overdue_after: Duration,
}

impl<S: ?Sized> Clone for SystemAlertService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            offset: self.offset,
            stagnant_after: self.stagnant_after,
            overdue_after: self.overdue_after,
        }
    }
}

impl<S> SystemAlertService<S>
where
    S: AlertStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            offset: config::scheduler_offset(),
            stagnant_after: Duration::days(*config::STAGNANT_ORDER_DAYS),
            overdue_after: Duration::days(*config::OVERDUE_BILLING_DAYS),
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_thresholds(mut self, stagnant_days: i64, overdue_days: i64) -> Self {
        self.stagnant_after = Duration::days(stagnant_days);
        self.overdue_after = Duration::days(overdue_days);
        self
    }

    /// Runs every rule. A failing rule is recorded in the report and the rest still run.
    pub async fn run_all_checks(&self, now: DateTime<Utc>) -> AlertReport {
        let mut report = AlertReport::default();

        match self.check_package_renewals(now).await {
            Ok(created) => report.renewals = created,
            Err(err) => record_failure(&mut report, "package renewals", err),
        }
        match self.check_stagnant_orders(now).await {
            Ok(created) => report.stagnant_orders = created,
            Err(err) => record_failure(&mut report, "stagnant orders", err),
        }
        match self.check_daily_billings(now).await {
            Ok(created) => report.daily_billing_summary = created,
            Err(err) => record_failure(&mut report, "daily billings", err),
        }
        match self.check_overdue_billings(now).await {
            Ok(created) => report.overdue_billings = created,
            Err(err) => record_failure(&mut report, "overdue billings", err),
        }

        if report.created() > 0 || !report.errors.is_empty() {
            info!(
                created = report.created(),
                errors = report.errors.len(),
                "system alert checks finished"
            );
        }
        report
    }

    pub async fn check_package_renewals(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = self
            .store
            .renewal_candidates()
            .await
            .context("failed to load auto-renewing packages")?;

        let mut created = 0;
        for candidate in &candidates {
            let Some(reason) = renewal_reason(candidate, now) else {
                continue;
            };
            let message = match reason {
                RenewalReason::Expired => format!(
                    "Package \"{}\" expired on {}.",
                    candidate.package_name,
                    candidate.end_date.with_timezone(&self.offset).format("%d/%m/%Y")
                ),
                RenewalReason::Exhausted => format!(
                    "Package \"{}\" reached its limit of {} audios.",
                    candidate.package_name, candidate.audio_limit
                ),
            };
            let notification = NewNotification {
                kind: NotificationKind::Renewal,
                target_role: TargetRole::Atendimento,
                title: format!("Renewal needed: {}", candidate.client_name),
                message,
                link: format!("/pacotes?packageId={}", candidate.package_id),
            };
            if self.create_unless_pending(&notification).await? {
                info!(package_id = %candidate.package_id, ?reason, "renewal alert created");
                created += 1;
            }
        }
        Ok(created)
    }

    pub async fn check_stagnant_orders(&self, now: DateTime<Utc>) -> Result<usize> {
        let orders = self
            .store
            .stagnant_orders(now - self.stagnant_after)
            .await
            .context("failed to load stagnant orders")?;

        let mut created = 0;
        for order in &orders {
            let notification = NewNotification {
                kind: NotificationKind::StagnantOrder,
                target_role: TargetRole::Atendimento,
                title: format!("Stagnant order: {}", order.title),
                message: format!(
                    "Order {} for {} has been in PEDIDO for more than {} days.",
                    order.label(),
                    order.client_name,
                    self.stagnant_after.num_days()
                ),
                link: format!("/pedidos?id={}", order.id),
            };
            if self.create_unless_pending(&notification).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    pub async fn check_daily_billings(&self, now: DateTime<Utc>) -> Result<usize> {
        let today = now.with_timezone(&self.offset).date_naive();
        let start_of_day = today
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| self.offset.from_local_datetime(&midnight).single())
            .map(|start| start.with_timezone(&Utc))
            .context("local midnight is not representable")?;
        let end_of_day = start_of_day + Duration::days(1);

        let due_today = self
            .store
            .count_billings_between(start_of_day, end_of_day)
            .await
            .context("failed to count today's billings")?;
        if due_today == 0 {
            return Ok(0);
        }

        let already_sent = self
            .store
            .has_unread_since(
                NotificationKind::DailyBillingSummary,
                TargetRole::Financeiro,
                start_of_day,
            )
            .await
            .context("failed to check existing billing summary")?;
        if already_sent {
            return Ok(0);
        }

        self.store
            .create_notification(&NewNotification {
                kind: NotificationKind::DailyBillingSummary,
                target_role: TargetRole::Financeiro,
                title: "Billing agenda".to_string(),
                message: format!("{due_today} billing(s) are scheduled for today."),
                link: format!("/faturamento?date={}", today.format("%Y-%m-%d")),
            })
            .await
            .context("failed to create billing summary")?;
        info!(count = due_today, "daily billing summary created");
        Ok(1)
    }

    pub async fn check_overdue_billings(&self, now: DateTime<Utc>) -> Result<usize> {
        let orders = self
            .store
            .overdue_billings(now - self.overdue_after)
            .await
            .context("failed to load overdue billings")?;

        let mut created = 0;
        for order in &orders {
            let billing_date = order
                .data_faturar
                .map(|date| date.with_timezone(&self.offset).format("%d/%m/%Y").to_string())
                .unwrap_or_default();
            let notification = NewNotification {
                kind: NotificationKind::OverdueBilling,
                target_role: TargetRole::Financeiro,
                title: format!("Overdue billing: {}", order.client_name),
                message: format!(
                    "Order {} (\"{}\") should have been invoiced on {}.",
                    order.label(),
                    order.title,
                    billing_date
                ),
                link: format!("/faturamento?id={}", order.id),
            };
            if self.create_unless_pending(&notification).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn create_unless_pending(&self, notification: &NewNotification) -> Result<bool> {
        let pending = self
            .store
            .has_unread(notification.kind, notification.target_role, &notification.link)
            .await
            .context("failed to check existing notifications")?;
        if pending {
            return Ok(false);
        }
        self.store
            .create_notification(notification)
            .await
            .context("failed to create notification")?;
        Ok(true)
    }
}

fn record_failure(report: &mut AlertReport, rule: &'static str, err: anyhow::Error) {
    warn!(rule, error = %format!("{err:#}"), "alert rule failed");
    report.errors.push(format!("{rule}: {err:#}"));
}

pub fn alert_service(pool: &PgPool) -> SystemAlertService<PgAlertStore> {
    SystemAlertService::new(Arc::new(PgAlertStore::new(pool.clone())))
}

/// key: alerts-scheduler -> hourly run plus one at startup
pub fn spawn(pool: PgPool) {
    let service = alert_service(&pool);
    schedule::spawn_job(
        "system-alerts",
        Cadence::HourlyAt {
            minute: *config::ALERTS_RUN_MINUTE,
        },
        config::scheduler_offset(),
        ALERTS_GUARD.clone(),
        move |now| {
            let service = service.clone();
            async move {
                service.run_all_checks(now).await;
            }
        },
    );
}
