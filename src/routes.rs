use axum::{
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{alerts, orders, packages, recurring};

pub async fn root() -> &'static str {
    "Agency Backend API"
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/client-packages",
            get(packages::api::list_active_packages).post(packages::api::create_package),
        )
        .route(
            "/api/client-packages/resync",
            post(packages::api::resync_packages),
        )
        .route(
            "/api/client-packages/client/:client_id",
            get(packages::api::list_client_packages),
        )
        .route(
            "/api/client-packages/active/:client_id",
            get(packages::api::active_client_package),
        )
        .route(
            "/api/client-packages/:id",
            put(packages::api::update_package).delete(packages::api::delete_package),
        )
        .route(
            "/api/client-packages/:id/sync",
            post(packages::api::sync_package),
        )
        .route(
            "/api/orders",
            get(orders::api::list_orders).post(orders::api::create_order),
        )
        .route("/api/orders/batch", post(orders::api::create_orders_batch))
        .route(
            "/api/orders/:id",
            put(orders::api::update_order).delete(orders::api::delete_order),
        )
        .route(
            "/api/orders/:id/duplicate",
            post(orders::api::duplicate_order),
        )
        .route(
            "/api/recurring-services",
            get(recurring::api::list_services).post(recurring::api::create_service),
        )
        .route(
            "/api/recurring-services/run-due",
            post(recurring::api::run_due),
        )
        .route(
            "/api/recurring-services/logs/:log_id",
            delete(recurring::api::delete_log),
        )
        .route(
            "/api/recurring-services/:id",
            get(recurring::api::get_service)
                .put(recurring::api::update_service)
                .delete(recurring::api::delete_service),
        )
        .route(
            "/api/recurring-services/:id/logs",
            get(recurring::api::list_logs),
        )
        .route(
            "/api/recurring-services/:id/execute",
            post(recurring::api::execute_service),
        )
        .route(
            "/api/recurring-services/:id/toggle",
            patch(recurring::api::toggle_service),
        )
        .route("/api/notifications", get(alerts::api::list_notifications))
        .route(
            "/api/notifications/:id/read",
            patch(alerts::api::mark_read),
        )
        .route("/api/alerts/run", post(alerts::api::run_alerts))
}
