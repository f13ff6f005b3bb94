pub mod api;
pub mod ledger;
pub mod models;
pub mod policy;
pub mod service;
pub mod store;

pub use models::{
    BillingOrderSnapshot, BillingTerms, ClientPackage, LedgerEntry, PackageType,
    PackageWithBilling,
};
pub use policy::{billing_description, evaluate, BillingEvaluation};
pub use service::{PackageService, PackageSyncError, ResyncSummary, SyncReport};
pub use store::{PackageStore, PgPackageStore};
