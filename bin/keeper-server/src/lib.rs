#![allow(missing_docs)]

pub mod config;

mod error;
mod payload;
mod routes;

use std::sync::Arc;

use axum::{Router, routing};
use bon::Builder;
use dissolve_derive::Dissolve;
use safe_keeper_engine::{KeeperEngine, Started};

pub fn create_router(app: App) -> Router {
    Router::new()
        .route("/health", routing::get(routes::health))
        .route("/api/v1/request/submit", routing::post(routes::submit_request))
        .route("/api/v1/safe/details", routing::post(routes::get_safe_details))
        .route("/api/v1/transaction/details", routing::post(routes::get_transaction_details))
        .route("/api/v1/accountant/balance", routing::post(routes::get_accountant_balance))
        .route("/api/v1/outbound/list", routing::post(routes::list_outbound))
        .route("/api/v1/network/status", routing::post(routes::get_network_status))
        .with_state(app)
}

#[derive(Clone, Builder, Dissolve)]
pub struct App {
    engine: Arc<KeeperEngine<Started>>,
}
