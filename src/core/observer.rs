use super::envelope::ResultEnvelope;
use std::fmt::Display;

/// Receives the outcome of facade operations and subscription deliveries.
///
/// Observers are side channels only: nothing they do changes what a facade
/// returns.
pub trait FacadeObserver: Send + Sync {
    fn succeeded(&self, _operation: &'static str, _detail: &str) {}

    fn failed(&self, _operation: &'static str, _error: &str) {}

    fn delivered(&self, _subscription: &'static str, _detail: &str) {}
}

/// Emits `tracing` events for every outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl FacadeObserver for TracingObserver {
    fn succeeded(&self, operation: &'static str, detail: &str) {
        tracing::info!(operation, detail, "operation succeeded");
    }

    fn failed(&self, operation: &'static str, error: &str) {
        tracing::warn!(operation, error, "operation failed");
    }

    fn delivered(&self, subscription: &'static str, detail: &str) {
        tracing::debug!(subscription, detail, "subscription update");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl FacadeObserver for NoopObserver {}

/// Turns a service result into an envelope and reports it.
pub fn settle<T, E: Display>(
    observer: &dyn FacadeObserver,
    operation: &'static str,
    result: Result<T, E>,
    detail: impl FnOnce(&T) -> String,
) -> ResultEnvelope<T> {
    match result {
        Ok(data) => {
            observer.succeeded(operation, &detail(&data));
            ResultEnvelope::Success(data)
        }
        Err(e) => {
            let envelope = ResultEnvelope::failure(e.to_string());
            if let Some(message) = envelope.error() {
                observer.failed(operation, message);
            }
            envelope
        }
    }
}
