//! HTTP API over the workflow engine
//!
//! Provides:
//! - Stage transitions per case
//! - Case status, verification and reconciliation
//! - Project progress and history
//! - Flag management for tampered cases

pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use acquisition_workflow::WorkflowEngine;

use crate::notify::NotificationDispatcher;

/// State shared across handlers
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    /// `None` when notifications are disabled
    pub notifier: Option<Arc<dyn NotificationDispatcher>>,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

pub type SharedState = Arc<AppState>;

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // Transitions
        .route("/api/cases/:case_id/measurement", post(routes::record_measurement))
        .route("/api/cases/:case_id/award", post(routes::declare_award))
        .route("/api/cases/:case_id/notice", post(routes::generate_notice))
        .route("/api/cases/:case_id/documents", post(routes::upload_documents))
        .route("/api/cases/:case_id/payment", post(routes::create_payment_slip))
        .route("/api/cases/:case_id/payment/release", post(routes::release_payment))
        .route("/api/cases/:case_id/payment/fail", post(routes::fail_payment))
        .route("/api/cases/:case_id/status-update", post(routes::record_status_update))
        .route("/api/cases/:case_id/retract", post(routes::retract_stage))
        // Integrity
        .route("/api/cases/:case_id", get(routes::case_status))
        .route("/api/cases/:case_id/verify", get(routes::verify_case))
        .route("/api/cases/:case_id/reconcile", post(routes::reconcile))
        .route("/api/cases/:case_id/flag/clear", post(routes::clear_flag))
        .route("/api/flags", get(routes::flagged_cases))
        // Projects
        .route("/api/projects/:project_id/progress", get(routes::project_progress))
        .route("/api/projects/:project_id/history", get(routes::project_history))
        .route("/api/bulk", post(routes::bulk))
        // Health check
        .route("/health", get(routes::health))
        .with_state(state)
}
