use std::sync::Arc;

use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use spider_core::Severity;

use crate::{EngineEvent, ProgressSink};

/// Publishes engine events and mirrors user-facing log lines into the log facade.
#[derive(Clone)]
pub(crate) struct EventSink {
    sink: Arc<dyn ProgressSink>,
}

impl EventSink {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        self.sink.emit(event);
    }

    pub(crate) fn progress_sink(&self) -> Arc<dyn ProgressSink> {
        Arc::clone(&self.sink)
    }

    pub(crate) fn log(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info | Severity::Success => engine_info!("{}", message),
            Severity::Secondary => engine_debug!("{}", message),
            Severity::Warning => engine_warn!("{}", message),
            Severity::Danger => engine_error!("{}", message),
        }
        self.sink.emit(EngineEvent::Log { severity, message });
    }
}
