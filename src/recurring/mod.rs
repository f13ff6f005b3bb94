pub mod api;
pub mod automation;
pub mod models;
pub mod recurrence;
pub mod store;

pub use automation::{spawn, BatchEntry, BatchReport, RecurringAutomation};
pub use models::{
    ExecutionStatus, MaterializedSale, NewExecutionLog, RecurringSale, RecurringService,
    RecurringServiceLog,
};
pub use recurrence::{next_execution, Recurrence};
pub use store::{PgRecurringStore, RecurringStore};
