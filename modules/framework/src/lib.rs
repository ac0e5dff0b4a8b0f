#![forbid(unsafe_code, clippy::unwrap_used, clippy::panic, clippy::expect_used)]

pub mod cron;
pub mod error;
pub mod sqlx;

pub use error::Error;

pub fn now_time() -> time::PrimitiveDateTime {
    let now = time::OffsetDateTime::now_utc();
    time::PrimitiveDateTime::new(now.date(), now.time())
}

/// Convert a unix timestamp in milliseconds into the UTC wall clock stored by the database.
pub fn time_from_unix_millis(millis: i64) -> Option<time::PrimitiveDateTime> {
    let nanos = i128::from(millis) * 1_000_000;
    let dt = time::OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    Some(time::PrimitiveDateTime::new(dt.date(), dt.time()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_round_trip_to_utc() {
        let dt = time_from_unix_millis(1_700_000_000_123).unwrap();
        assert_eq!(dt.assume_utc().unix_timestamp(), 1_700_000_000);
        assert_eq!(dt.millisecond(), 123);
    }

    #[test]
    fn out_of_range_millis_are_rejected() {
        assert!(time_from_unix_millis(i64::MAX).is_none());
    }
}
