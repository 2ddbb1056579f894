//! Outbound notifications
//!
//! Delivery (email, SMS, post) is external. The node only hands finished
//! transitions to a dispatcher after they are recorded.

use async_trait::async_trait;

use acquisition_workflow::Transition;

/// Error types for notification dispatch.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Trait for notification delivery.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// A notice was generated and must reach the landowner.
    async fn notice_generated(&self, transition: &Transition) -> Result<(), NotifyError>;

    /// A payment was released.
    async fn payment_released(&self, transition: &Transition) -> Result<(), NotifyError>;
}

/// Dispatcher that only logs.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn notice_generated(&self, transition: &Transition) -> Result<(), NotifyError> {
        let notice = transition.record.notice();
        tracing::info!(
            case_id = %transition.record.case_id,
            notice_number = ?notice.map(|n| n.notice_number.as_str()),
            objection_deadline = ?notice.map(|n| n.objection_deadline.to_rfc3339()),
            block_id = %transition.block.block_id,
            "Notice ready for dispatch"
        );
        Ok(())
    }

    async fn payment_released(&self, transition: &Transition) -> Result<(), NotifyError> {
        let payment = transition.record.payment();
        tracing::info!(
            case_id = %transition.record.case_id,
            amount = ?payment.map(|p| p.amount),
            settlement_ref = ?payment.and_then(|p| p.settlement_ref.as_deref()),
            block_id = %transition.block.block_id,
            "Payment confirmation ready for dispatch"
        );
        Ok(())
    }
}
