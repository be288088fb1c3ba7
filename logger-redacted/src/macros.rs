// Logging macros

/// `tracing::warn!` with the message passed through a [`crate::PiiRedactor`].
///
/// ```ignore
/// redacted_warn!(redactor, source = BillSource::Note, page = 2; err);
/// ```
#[macro_export]
macro_rules! redacted_warn {
    ($redactor:expr, $($field:ident = $value:expr),* ; $msg:expr) => {
        tracing::warn!($($field = %$value,)* "{}", $redactor.redact(&$msg.to_string()))
    };
}

/// `tracing::error!` counterpart of [`redacted_warn!`].
#[macro_export]
macro_rules! redacted_error {
    ($redactor:expr, $($field:ident = $value:expr),* ; $msg:expr) => {
        tracing::error!($($field = %$value,)* "{}", $redactor.redact(&$msg.to_string()))
    };
}
