//! Startup alignment to the next wall-clock minute
//!
//! Independently launched nodes call this before sampling so that their
//! batches line up to within local clock drift. No network time sync is done.

use log::info;
use std::time::Duration;
use time::OffsetDateTime;

use crate::utils::{format_datetime, Clock};

/// Instant starting the next whole minute after `now`
///
/// A timestamp already on a boundary yields the following minute.
pub fn next_minute_boundary(now: OffsetDateTime) -> OffsetDateTime {
    let into_minute = time::Duration::new(i64::from(now.second()), now.nanosecond() as i32);
    now - into_minute + time::Duration::MINUTE
}

/// How long to sleep from `now` until the next minute boundary
pub fn delay_until_next_minute(now: OffsetDateTime) -> Duration {
    (next_minute_boundary(now) - now).unsigned_abs()
}

/// Sleep until the minute boundary following `now`, returning that boundary
pub async fn wait_until_next_minute_from(now: OffsetDateTime) -> OffsetDateTime {
    let boundary = next_minute_boundary(now);
    let wait = delay_until_next_minute(now);
    info!(
        "Waiting {:.2} seconds until the next minute...",
        wait.as_secs_f64()
    );
    tokio::time::sleep(wait).await;
    info!("Started at {}", format_datetime(&boundary));
    boundary
}

/// Sleep until the next minute boundary of `clock`
pub async fn wait_until_next_minute(clock: &Clock) -> OffsetDateTime {
    wait_until_next_minute_from(clock.now()).await
}
