use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ledger::compute_usage;
use super::policy::{billing_description, evaluate};
use super::store::PackageStore;

/// Failure of a package sync, carrying the operation that failed.
#[derive(Debug, Error)]
#[error("failed to sync package {package_id} during {operation}: {message}")]
pub struct PackageSyncError {
    pub package_id: Uuid,
    pub operation: &'static str,
    pub message: String,
}

/// What a sync call observed and wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub package_id: Uuid,
    pub total_usage: i32,
    pub usage_written: bool,
    pub billing_written: bool,
}

impl SyncReport {
    pub fn wrote_anything(&self) -> bool {
        self.usage_written || self.billing_written
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResyncSummary {
    pub checked: usize,
    pub corrected: usize,
    pub failed: Vec<Uuid>,
}

/// key: package-sync -> recompute usage, then compare-and-write package and billing order
pub struct PackageService<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for PackageService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: PackageStore + ?Sized> PackageService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns `Ok(None)` when the package does not exist.
    pub async fn sync_package(&self, package_id: Uuid) -> Result<Option<SyncReport>, PackageSyncError> {
        let fail = |operation: &'static str| {
            move |err: sqlx::Error| {
                warn!(%package_id, operation, error = %err, "package sync failed");
                PackageSyncError {
                    package_id,
                    operation,
                    message: err.to_string(),
                }
            }
        };

        let (loaded, entries) = tokio::try_join!(
            async { self.store.load_package(package_id).await.map_err(fail("load_package")) },
            async { self.store.ledger_entries(package_id).await.map_err(fail("compute_usage")) },
        )?;

        let Some(loaded) = loaded else {
            warn!(%package_id, "package not found; skipping sync");
            return Ok(None);
        };
        let package = loaded.package;

        let total_usage = compute_usage(&entries);
        let mut report = SyncReport {
            package_id,
            total_usage,
            usage_written: false,
            billing_written: false,
        };

        if package.used_audios != total_usage {
            self.store
                .set_used_audios(package_id, total_usage)
                .await
                .map_err(fail("update_usage"))?;
            report.usage_written = true;
            info!(
                %package_id,
                package = %package.name,
                used = total_usage,
                limit = package.audio_limit,
                "updated package consumption"
            );
        }

        let Some(billing_order_id) = package.billing_order_id else {
            return Ok(Some(report));
        };
        let Some(billing_order) = loaded.billing_order else {
            warn!(%package_id, %billing_order_id, "linked billing order is missing; skipping billing sync");
            return Ok(Some(report));
        };

        let evaluation = evaluate(&package.terms(), i64::from(total_usage));
        if billing_order.venda_valor != evaluation.amount_owed {
            let description = billing_description(&package.name, evaluation.extra_units);
            self.store
                .update_billing_order(billing_order.id, evaluation.amount_owed, &description)
                .await
                .map_err(fail("update_billing_order"))?;
            report.billing_written = true;
            info!(
                %package_id,
                billing_order = %billing_order.id,
                amount = %evaluation.amount_owed,
                extra_units = evaluation.extra_units,
                "updated package billing"
            );
        } else {
            debug!(%package_id, amount = %evaluation.amount_owed, "package billing unchanged");
        }

        Ok(Some(report))
    }

    /// Runs the sync over every package; one failing package does not stop the rest.
    pub async fn resync_all(&self) -> Result<ResyncSummary, PackageSyncError> {
        let ids = self.store.package_ids().await.map_err(|err| PackageSyncError {
            package_id: Uuid::nil(),
            operation: "list_packages",
            message: err.to_string(),
        })?;

        let mut summary = ResyncSummary::default();
        for package_id in ids {
            summary.checked += 1;
            match self.sync_package(package_id).await {
                Ok(Some(report)) if report.wrote_anything() => summary.corrected += 1,
                Ok(_) => {}
                Err(_) => summary.failed.push(package_id),
            }
        }
        info!(
            checked = summary.checked,
            corrected = summary.corrected,
            failed = summary.failed.len(),
            "package resync finished"
        );
        Ok(summary)
    }
}
