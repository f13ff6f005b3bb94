use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agency_backend::orders::{OrderKind, OrderStatus};
use agency_backend::packages::{
    BillingOrderSnapshot, ClientPackage, LedgerEntry, PackageService, PackageStore, PackageType,
    PackageWithBilling,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    packages: HashMap<Uuid, ClientPackage>,
    billing_orders: HashMap<Uuid, BillingOrderSnapshot>,
    ledger: HashMap<Uuid, Vec<LedgerEntry>>,
    usage_writes: usize,
    billing_writes: usize,
    fail_usage_write: bool,
}

#[derive(Default)]
struct MemoryPackageStore {
    state: Mutex<MemoryState>,
}

impl MemoryPackageStore {
    fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}

#[async_trait]
impl PackageStore for MemoryPackageStore {
    async fn load_package(&self, package_id: Uuid) -> Result<Option<PackageWithBilling>, sqlx::Error> {
        Ok(self.with(|state| {
            state.packages.get(&package_id).cloned().map(|package| {
                let billing_order = package
                    .billing_order_id
                    .and_then(|id| state.billing_orders.get(&id).cloned());
                PackageWithBilling {
                    package,
                    billing_order,
                }
            })
        }))
    }

    async fn ledger_entries(&self, package_id: Uuid) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        Ok(self.with(|state| state.ledger.get(&package_id).cloned().unwrap_or_default()))
    }

    async fn set_used_audios(&self, package_id: Uuid, used_audios: i32) -> Result<(), sqlx::Error> {
        self.with(|state| {
            if state.fail_usage_write {
                return Err(sqlx::Error::PoolTimedOut);
            }
            state.usage_writes += 1;
            if let Some(package) = state.packages.get_mut(&package_id) {
                package.used_audios = used_audios;
            }
            Ok(())
        })
    }

    async fn update_billing_order(
        &self,
        order_id: Uuid,
        venda_valor: Decimal,
        comentarios: &str,
    ) -> Result<(), sqlx::Error> {
        self.with(|state| {
            state.billing_writes += 1;
            if let Some(order) = state.billing_orders.get_mut(&order_id) {
                order.venda_valor = venda_valor;
                order.comentarios = Some(comentarios.to_string());
            }
        });
        Ok(())
    }

    async fn package_ids(&self) -> Result<Vec<Uuid>, sqlx::Error> {
        Ok(self.with(|state| state.packages.keys().copied().collect()))
    }
}

fn package(package_type: PackageType, fixed: i64, extra: i64, limit: i32) -> ClientPackage {
    let now = Utc::now();
    ClientPackage {
        id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        name: "Plano Rádio".into(),
        client_code: None,
        package_type,
        fixed_fee: Decimal::new(fixed, 0),
        extra_audio_fee: Decimal::new(extra, 0),
        audio_limit: limit,
        used_audios: 0,
        start_date: now - Duration::days(5),
        end_date: now + Duration::days(25),
        active: true,
        auto_renewal: false,
        billing_order_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn consumption(credits: Option<i32>) -> LedgerEntry {
    LedgerEntry {
        kind: OrderKind::PackageConsumption,
        status: OrderStatus::Venda,
        is_bonus: false,
        credits_consumed: credits,
    }
}

/// Registers the package with a billing order carrying `billed`.
fn seed(store: &MemoryPackageStore, mut package: ClientPackage, billed: Decimal, ledger: Vec<LedgerEntry>) -> (Uuid, Uuid) {
    let billing_id = Uuid::new_v4();
    package.billing_order_id = Some(billing_id);
    let package_id = package.id;
    store.with(|state| {
        state.billing_orders.insert(
            billing_id,
            BillingOrderSnapshot {
                id: billing_id,
                venda_valor: billed,
                comentarios: None,
                faturado: false,
            },
        );
        state.packages.insert(package_id, package);
        state.ledger.insert(package_id, ledger);
    });
    (package_id, billing_id)
}

#[tokio::test]
async fn limited_package_bills_extra_audios() {
    let store = Arc::new(MemoryPackageStore::default());
    let ledger = (0..13).map(|_| consumption(Some(1))).collect();
    let (package_id, billing_id) = seed(
        &store,
        package(PackageType::FixedWithLimit, 300, 8, 10),
        Decimal::new(300, 0),
        ledger,
    );

    let report = PackageService::new(store.clone())
        .sync_package(package_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.total_usage, 13);
    assert!(report.usage_written);
    assert!(report.billing_written);
    store.with(|state| {
        assert_eq!(state.packages[&package_id].used_audios, 13);
        let billing = &state.billing_orders[&billing_id];
        assert_eq!(billing.venda_valor, Decimal::new(324, 0));
        assert_eq!(
            billing.comentarios.as_deref(),
            Some("Consolidated billing: Plano Rádio. Extra audios: 3.")
        );
    });
}

#[tokio::test]
async fn multi_credit_orders_past_a_limit_of_twenty() {
    let store = Arc::new(MemoryPackageStore::default());
    let (package_id, billing_id) = seed(
        &store,
        package(PackageType::FixedWithLimit, 300, 8, 20),
        Decimal::new(300, 0),
        vec![consumption(Some(5)), consumption(Some(18))],
    );

    let report = PackageService::new(store.clone())
        .sync_package(package_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.total_usage, 23);
    store.with(|state| {
        assert_eq!(state.packages[&package_id].used_audios, 23);
        let billing = &state.billing_orders[&billing_id];
        assert_eq!(billing.venda_valor, Decimal::new(324, 0));
        assert!(billing
            .comentarios
            .as_deref()
            .unwrap_or_default()
            .contains("Extra audios: 3."));
    });
}

#[tokio::test]
async fn second_sync_writes_nothing() {
    let store = Arc::new(MemoryPackageStore::default());
    let (package_id, _) = seed(
        &store,
        package(PackageType::FixedWithLimit, 100, 5, 10),
        Decimal::ZERO,
        vec![consumption(Some(8)), consumption(Some(5))],
    );
    let service = PackageService::new(store.clone());

    let first = service.sync_package(package_id).await.unwrap().unwrap();
    assert!(first.wrote_anything());
    let writes = store.with(|state| (state.usage_writes, state.billing_writes));

    let second = service.sync_package(package_id).await.unwrap().unwrap();
    assert!(!second.wrote_anything());
    assert_eq!(store.with(|state| (state.usage_writes, state.billing_writes)), writes);
}

#[tokio::test]
async fn cancelled_bonus_and_direct_sales_do_not_count() {
    let store = Arc::new(MemoryPackageStore::default());
    let mut cancelled = consumption(Some(4));
    cancelled.status = OrderStatus::Cancelado;
    let mut bonus = consumption(Some(2));
    bonus.is_bonus = true;
    let mut sale = consumption(Some(7));
    sale.kind = OrderKind::DirectSale;
    let (package_id, _) = seed(
        &store,
        package(PackageType::FixedUnlimited, 200, 0, 0),
        Decimal::new(200, 0),
        vec![consumption(None), consumption(Some(0)), cancelled, bonus, sale],
    );

    let report = PackageService::new(store.clone())
        .sync_package(package_id)
        .await
        .unwrap()
        .unwrap();

    // Missing and non-positive credits count as one each.
    assert_eq!(report.total_usage, 2);
    assert!(!report.billing_written);
}

#[tokio::test]
async fn package_without_billing_order_only_updates_usage() {
    let store = Arc::new(MemoryPackageStore::default());
    let pkg = package(PackageType::FixedWithLimit, 100, 5, 10);
    let package_id = pkg.id;
    store.with(|state| {
        state.packages.insert(package_id, pkg);
        state.ledger.insert(package_id, vec![consumption(Some(3))]);
    });

    let report = PackageService::new(store.clone())
        .sync_package(package_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.total_usage, 3);
    assert!(!report.billing_written);
    assert_eq!(store.with(|state| state.billing_writes), 0);
}

#[tokio::test]
async fn dangling_billing_order_link_is_tolerated() {
    let store = Arc::new(MemoryPackageStore::default());
    let mut pkg = package(PackageType::FixedOnDemand, 50, 10, 0);
    pkg.billing_order_id = Some(Uuid::new_v4());
    let package_id = pkg.id;
    store.with(|state| {
        state.packages.insert(package_id, pkg);
        state.ledger.insert(package_id, vec![consumption(Some(2))]);
    });

    let report = PackageService::new(store.clone())
        .sync_package(package_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.total_usage, 2);
    assert!(report.usage_written);
    assert!(!report.billing_written);
}

#[tokio::test]
async fn missing_package_is_not_an_error() {
    let store = Arc::new(MemoryPackageStore::default());
    let outcome = PackageService::new(store).sync_package(Uuid::new_v4()).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn store_failure_names_the_operation() {
    let store = Arc::new(MemoryPackageStore::default());
    let (package_id, _) = seed(
        &store,
        package(PackageType::FixedWithLimit, 100, 5, 10),
        Decimal::new(100, 0),
        vec![consumption(Some(1))],
    );
    store.with(|state| state.fail_usage_write = true);

    let err = PackageService::new(store)
        .sync_package(package_id)
        .await
        .unwrap_err();
    assert_eq!(err.package_id, package_id);
    assert_eq!(err.operation, "update_usage");
}

#[tokio::test]
async fn resync_all_reports_corrected_packages() {
    let store = Arc::new(MemoryPackageStore::default());
    seed(
        &store,
        package(PackageType::PayPerUse, 0, 15, 0),
        Decimal::ZERO,
        vec![consumption(Some(3))],
    );
    let mut settled = package(PackageType::FixedUnlimited, 200, 0, 0);
    settled.used_audios = 1;
    seed(&store, settled, Decimal::new(200, 0), vec![consumption(Some(1))]);

    let summary = PackageService::new(store).resync_all().await.unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.corrected, 1);
    assert!(summary.failed.is_empty());
}
