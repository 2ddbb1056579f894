//! acquisition-node: HTTP service for the land-acquisition case ledger
//!
//! Wires the in-memory ledger and stage stores into a workflow engine and
//! serves it over HTTP/JSON. Notices and payment confirmations are handed
//! to a [`notify::NotificationDispatcher`] once recorded.

pub mod api;
pub mod config;
pub mod error;
pub mod notify;

use std::sync::Arc;

use acquisition_workflow::{InMemoryStageStore, WorkflowEngine};
use land_ledger::InMemoryLedgerStore;

use api::AppState;
use config::Config;
use notify::TracingNotifier;

/// Build handler state from configuration.
pub fn build_state(config: &Config) -> AppState {
    let engine = WorkflowEngine::with_config(
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(InMemoryStageStore::new()),
        config.engine.clone(),
    );

    let state = AppState::new(Arc::new(engine));
    if config.notifications.enabled {
        state.with_notifier(Arc::new(TracingNotifier))
    } else {
        state
    }
}
