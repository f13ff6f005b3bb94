pub mod api;
pub mod models;
pub mod rules;
pub mod store;

pub use models::{NewOrder, Order, OrderKind, OrderStatus};
pub use rules::{classify_order, Classification, HeldCredits, OrderDraft};
