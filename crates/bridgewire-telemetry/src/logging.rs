//! Structured log helpers.
//!
//! Every bridge log line carries the same field names so that log queries can
//! join on them:
//! - `role`: hub or peer
//! - `channel`: human readable channel name
//! - `token`: wire key
//! - `sender`: origin of an inbound message

/// Log a channel-related event with standard fields.
#[macro_export]
macro_rules! log_channel_event {
    ($level:ident, $role:expr, $msg:expr, $channel:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            role = %$role,
            channel = %$channel,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a sender-related event with standard fields.
#[macro_export]
macro_rules! log_sender_event {
    ($level:ident, $role:expr, $msg:expr, $sender:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            role = %$role,
            sender = %$sender,
            $($($field)*,)?
            $msg
        )
    };
}
