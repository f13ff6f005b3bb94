pub mod api;
pub mod models;
pub mod service;
pub mod store;

pub use models::{
    renewal_reason, AlertOrder, AlertReport, NewNotification, Notification, NotificationKind,
    RenewalCandidate, RenewalReason, TargetRole,
};
pub use service::{spawn, SystemAlertService};
pub use store::{AlertStore, PgAlertStore};
