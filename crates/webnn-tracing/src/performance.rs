//! Timing helpers for the graph compilation and execution paths.
//!
//! ```rust
//! use webnn_tracing::performance::{record_transfer, PerformanceSpan, TransferDirection};
//!
//! let span = PerformanceSpan::new("upload_constants", Some(100));
//! // ... stage and copy ...
//! drop(span); // logged only if it took at least 100us
//!
//! record_transfer(4096, TransferDirection::Upload, 12);
//! ```

use std::fmt;
use std::time::Instant;
use tracing::Level;

/// RAII guard that times a region and logs its duration on drop.
///
/// With a threshold, regions faster than the threshold are not logged.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start timing `name` at debug level.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    /// Start timing `name` with a span at the given level.
    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds since the span was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter the underlying tracing span.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    fn should_log(&self, elapsed_us: u64) -> bool {
        self.threshold_us.is_none_or(|threshold| elapsed_us >= threshold)
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.should_log(elapsed_us) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Direction of a staging transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// CPU staging memory to device memory.
    Upload,
    /// Device memory to CPU readback memory.
    Readback,
    /// CPU writes straight into shared (UMA) memory.
    Mapped,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Readback => "readback",
            TransferDirection::Mapped => "mapped",
        };
        f.write_str(label)
    }
}

fn bandwidth_mbps(bytes: usize, duration_us: u64) -> f64 {
    if duration_us == 0 {
        return 0.0;
    }
    (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
}

/// Record a staging transfer with its bandwidth.
pub fn record_transfer(bytes: usize, direction: TransferDirection, duration_us: u64) {
    tracing::debug!(
        event = "transfer",
        bytes,
        direction = %direction,
        duration_us,
        bandwidth_mbps = bandwidth_mbps(bytes, duration_us),
        "data_transfer"
    );
}

/// Record a command list submission.
pub fn record_submission(fence_value: u64, command_count: usize, referenced_objects: usize) {
    tracing::debug!(
        event = "submission",
        fence_value,
        command_count,
        referenced_objects,
        "command_list_submitted"
    );
}

/// Record the compilation of a lowered graph.
pub fn record_compile(backend: &str, node_count: usize, duration_us: u64, cache_hit: bool) {
    tracing::debug!(
        event = "compile",
        backend,
        node_count,
        duration_us,
        cache_hit,
        "graph_compiled"
    );
}
