//! Instrumentation macros used on the hot paths of the engine.

/// Create a [`crate::performance::PerformanceSpan`] guard.
///
/// ```text
/// perf_span!("name")
/// perf_span!("name", threshold_us = 100)
/// ```
///
/// ```rust
/// use webnn_tracing::perf_span;
///
/// {
///     let _span = perf_span!("record_compute");
///     // ... record commands ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, threshold_us = $threshold:expr) => {{
        $crate::performance::PerformanceSpan::new($name, Some($threshold))
    }};
}

/// Run a block and return `(result, duration_us)`, logging the duration.
///
/// ```rust
/// use webnn_tracing::timed_block;
///
/// let (sum, _duration_us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::debug!(operation = $name, duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    #[test]
    fn perf_span_forms() {
        let span = perf_span!("lower");
        assert_eq!(span.name(), "lower");
        let _threshold = perf_span!("lower", threshold_us = 10);
    }

    #[test]
    fn timed_block_returns_value_and_duration() {
        let (value, duration_us) = timed_block!("sleep", {
            thread::sleep(Duration::from_millis(2));
            7
        });
        assert_eq!(value, 7);
        assert!(duration_us >= 2_000);
    }

    #[test]
    fn timed_block_passes_errors_through() {
        let (result, _) = timed_block!("fails", { Result::<u8, &str>::Err("boom") });
        assert!(result.is_err());
    }
}
