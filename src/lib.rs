pub mod alerts;
pub mod config;
pub mod error;
pub mod orders;
pub mod packages;
pub mod recurring;
pub mod routes;
pub mod schedule;

pub use routes::{api_routes, root};
