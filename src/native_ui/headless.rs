//! Headless-UI für Desktop und Demo: genehmigt jeden Call, loggt den Rest

use super::{EndReason, NativeCallUi, NativeUiAction, NativeUiActionSink, StartCallRequest};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessCallUi;

impl HeadlessCallUi {
    pub fn new() -> Self {
        Self
    }
}

impl NativeCallUi for HeadlessCallUi {
    fn request_start(&mut self, request: StartCallRequest, actions: NativeUiActionSink) {
        tracing::info!(
            "Outgoing call to {} ({}) approved",
            request.display_name.as_deref().unwrap_or(&request.handle),
            request.correlation_id
        );
        actions.emit(NativeUiAction::StartApproved);
    }

    fn report_connecting(&mut self, correlation_id: Uuid, at: DateTime<Utc>) {
        tracing::info!("Call {} connecting at {}", correlation_id, at.to_rfc3339());
    }

    fn report_connected(&mut self, correlation_id: Uuid, at: DateTime<Utc>) {
        tracing::info!("Call {} connected at {}", correlation_id, at.to_rfc3339());
    }

    fn report_ended(&mut self, correlation_id: Uuid, at: DateTime<Utc>, reason: EndReason) {
        tracing::info!(
            "Call {} ended at {} ({:?})",
            correlation_id,
            at.to_rfc3339(),
            reason
        );
    }
}
