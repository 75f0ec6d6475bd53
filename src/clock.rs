//! The one place the core reads wall-clock time, so every timestamp
//! comparison in the session (`lastOkPollAt`, `bootEpoch`, heal backoff
//! deadlines) goes through the same source.

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
