//! Level macros that capture the caller's location into the record.

/// Emit at an explicit level, formatting the message with `format!`
/// syntax and stamping `file!()`/`line!()` into the record.
#[macro_export]
macro_rules! log_event {
    ($logger:expr, $level:expr, $($arg:tt)*) => {
        $logger.log_with(
            $level,
            &format!($($arg)*),
            $crate::RecordFields::default().with_location(file!(), line!()),
        )
    };
}

#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_event!($logger, $crate::Level::Trace, $($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_event!($logger, $crate::Level::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_event!($logger, $crate::Level::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_event!($logger, $crate::Level::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_event!($logger, $crate::Level::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! critical {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_event!($logger, $crate::Level::Critical, $($arg)*)
    };
}
