use axum::{Router, routing::post};

use crate::AppState;

mod actions;
mod command;
mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/api/webhook", post(webhook::webhook))
        .route("/api/command", post(command::command))
        .route("/api/actions/approve", post(actions::approve))
}
