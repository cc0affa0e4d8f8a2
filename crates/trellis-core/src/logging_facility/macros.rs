//! Canonical logging macros
//!
//! These macros provide a structured, consistent way to log operations.

/// Log the start of an operation
///
/// # Example
///
/// ```
/// # use trellis_core::log_op_start;
/// log_op_start!("commit");
/// log_op_start!("commit", txn_id = "t123");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = trellis_core_types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = trellis_core_types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// # Example
///
/// ```
/// # use trellis_core::log_op_end;
/// log_op_end!("commit", duration_ms = 42);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = trellis_core_types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = trellis_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error
///
/// # Example
///
/// ```
/// # use trellis_core::{log_op_error, errors::TrellisError};
/// let err = TrellisError::NoChanges;
/// log_op_error!("commit", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let err: &$crate::errors::TrellisError = &$err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = trellis_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.code = err.code(),
            err.message = %err,
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let err: &$crate::errors::TrellisError = &$err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = trellis_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.code = err.code(),
            err.message = %err,
            $($field)*
        );
    }};
}

#[cfg(test)]
mod tests {
    use crate::errors::TrellisError;
    use crate::logging_facility::test_capture::init_test_capture;

    #[test]
    fn test_macros_emit_canonical_events() {
        let capture = init_test_capture();
        capture.clear();

        log_op_start!("unit_op", xpath = "/system");
        log_op_end!("unit_op", duration_ms = 3);
        log_op_error!("unit_op", TrellisError::NoChanges, duration_ms = 5);

        capture.assert_event_exists("unit_op", "start");
        capture.assert_event_exists("unit_op", "end");
        capture.assert_event_exists("unit_op", "end_error");

        let errors = capture.count_events(|e| {
            e.fields.get("err.code").map(String::as_str) == Some("ERR_NO_CHANGES")
        });
        assert_eq!(errors, 1);
    }
}
