//! Per-run logging handle.
//!
//! Every component of a run receives the same [`RunLog`] explicitly. Events
//! are emitted through `tracing` inside the run's span, so the caller's
//! subscriber decides where they go. Debug chatter is only emitted when the
//! run was configured with logging enabled; failures are always reported.

use std::fmt::Display;
use tracing::Span;

#[derive(Debug, Clone)]
pub struct RunLog {
    enabled: bool,
    span: Span,
}

impl RunLog {
    /// Handle for an import of `resource`.
    pub fn new(resource: &str, enabled: bool) -> Self {
        Self {
            enabled,
            span: tracing::info_span!("import", resource = %resource),
        }
    }

    /// Handle that emits nothing but failures, outside any span.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            span: Span::none(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn debug(&self, step: &str, message: impl Display) {
        if self.enabled {
            tracing::debug!(parent: &self.span, step, "{}", message);
        }
    }

    pub fn warn(&self, step: &str, message: impl Display) {
        if self.enabled {
            tracing::warn!(parent: &self.span, step, "{}", message);
        }
    }

    /// Always emitted.
    pub fn failure(&self, step: &str, message: impl Display) {
        tracing::warn!(parent: &self.span, step, "{}", message);
    }
}
