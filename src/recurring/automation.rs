use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::schedule::{self, Cadence, TickGuard};

use super::models::{MaterializedSale, NewExecutionLog, RecurringSale, RecurringService};
use super::recurrence::next_execution;
use super::store::{PgRecurringStore, RecurringStore};

/// Shared by the daily timer and the manual `run-due` trigger.
pub static RECURRING_GUARD: Lazy<TickGuard> = Lazy::new(TickGuard::new);

/// Outcome of one due service in a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub service_id: Uuid,
    pub service_name: String,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: std::result::Result<MaterializedSale, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|entry| entry.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}

fn serialize_outcome<S>(
    outcome: &std::result::Result<MaterializedSale, String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    #[derive(Serialize)]
    #[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
    enum Outcome<'a> {
        Success {
            order_id: Uuid,
            numero_venda: i64,
        },
        Failed {
            error: &'a str,
        },
    }

    match outcome {
        Ok(sale) => Outcome::Success {
            order_id: sale.order_id,
            numero_venda: sale.numero_venda,
        }
        .serialize(serializer),
        Err(error) => Outcome::Failed { error }.serialize(serializer),
    }
}

/// key: recurring-automation -> turns due recurring services into sale orders
pub struct RecurringAutomation<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for RecurringAutomation<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> RecurringAutomation<S>
where
    S: RecurringStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Materialize one service. On failure a FAILED log is written and the schedule is left
    /// untouched so the next run retries.
    pub async fn execute_service(
        &self,
        service: &RecurringService,
        now: DateTime<Utc>,
    ) -> Result<MaterializedSale> {
        match self.materialize(service, now).await {
            Ok(sale) => {
                info!(
                    service_id = %service.id,
                    order_id = %sale.order_id,
                    numero_venda = sale.numero_venda,
                    "recurring service executed"
                );
                Ok(sale)
            }
            Err(err) => {
                warn!(service_id = %service.id, error = %err, "recurring service execution failed");
                let log = NewExecutionLog::failed(service.id, &err);
                if let Err(log_err) = self.store.record_log(&log).await {
                    warn!(service_id = %service.id, error = %log_err, "failed to record execution failure");
                }
                Err(err)
            }
        }
    }

    async fn materialize(
        &self,
        service: &RecurringService,
        now: DateTime<Utc>,
    ) -> Result<MaterializedSale> {
        let sale = RecurringSale::for_service(service, now);
        let next = next_execution(service.next_execution, now, service.recurrence);
        self.store
            .record_execution(service.id, &sale, next)
            .await
            .context("failed to record the sale, schedule and log")
    }

    /// Execute every due service; one failure never stops the batch.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let due = self
            .store
            .due_services(now)
            .await
            .context("failed to load due recurring services")?;

        let mut report = BatchReport::default();
        for service in due.iter().filter(|service| service.is_due(now)) {
            let outcome = self
                .execute_service(service, now)
                .await
                .map_err(|err| format!("{err:#}"));
            report.entries.push(BatchEntry {
                service_id: service.id,
                service_name: service.name.clone(),
                outcome,
            });
        }

        if !report.entries.is_empty() {
            info!(
                processed = report.entries.len(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                "recurring services batch finished"
            );
        }
        Ok(report)
    }
}

pub fn automation(pool: &PgPool) -> RecurringAutomation<PgRecurringStore> {
    RecurringAutomation::new(Arc::new(PgRecurringStore::new(pool.clone())))
}

/// key: recurring-scheduler -> daily run plus one at startup
pub fn spawn(pool: PgPool) {
    let cadence = Cadence::DailyAt {
        hour: *config::RECURRING_RUN_HOUR,
        minute: *config::RECURRING_RUN_MINUTE,
    };
    let automation = automation(&pool);
    schedule::spawn_job(
        "recurring-services",
        cadence,
        config::scheduler_offset(),
        RECURRING_GUARD.clone(),
        move |now| {
            let automation = automation.clone();
            async move {
                if let Err(err) = automation.process_due(now).await {
                    warn!(error = %err, "recurring services tick failed");
                }
            }
        },
    );
}
