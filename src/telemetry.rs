//! Error-reporting seam for best-effort failures
//!
//! Cache writes and queue persistence are best-effort: their storage failures
//! never reach the caller of the primary operation. They do reach the
//! [`TelemetrySink`], so the host application's crash-reporting integration can
//! record them with context.

use crate::error::Error;

/// Fire-and-forget error reporting
///
/// Implementations must not block or fail; the caller never observes the
/// outcome of a report.
pub trait TelemetrySink: Send + Sync {
    /// Record `error` together with a short context string such as
    /// `"cache.put"` or `"queue.drain"`.
    fn report_error(&self, error: &Error, context: &str);
}

/// Telemetry sink that discards all reports
///
/// The default when the host application has no crash-reporting integration.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpTelemetry;

impl TelemetrySink for NoOpTelemetry {
    fn report_error(&self, _error: &Error, _context: &str) {}
}
