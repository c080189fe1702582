//! Record key generation.
//!
//! A key is `<timestamp>.<uuid>`: the receipt time to the second in a fixed
//! zone (no colons or spaces, so it is safe in file and object names),
//! followed by a version-1 UUID. Keys sort by time. When the clock does not
//! move between two keys, the UUID timestamp is nudged forward one 100 ns
//! tick so the keys stay distinct.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use uuid::{Context, Timestamp, Uuid};

/// `strftime` pattern for receipt timestamps, e.g. `2024-01-02T030405-0500`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%z";

/// Zone used when none is configured
pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::US::Eastern;

/// Source of the current instant in a fixed zone
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
}

/// Wall clock reporting in a configured zone
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    zone: Tz,
}

impl SystemClock {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_ZONE)
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.zone)
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<Tz>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Tz>) -> Self {
        Self { instant }
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        self.instant
    }
}

/// Format an instant as a receipt timestamp.
pub fn format_timestamp(instant: &DateTime<Tz>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Generate a fresh key from the clock's current instant.
pub fn generate_key(clock: &dyn TimeSource) -> String {
    key_for_instant(&clock.now())
}

/// Generate a fresh key for an instant already read from a clock.
pub fn key_for_instant(instant: &DateTime<Tz>) -> String {
    format!("{}.{}", format_timestamp(instant), uuid_v1_at(instant))
}

fn uuid_v1_at(instant: &DateTime<Tz>) -> Uuid {
    let tick = next_tick(unix_ticks(instant));
    let seconds = tick / TICKS_PER_SECOND;
    let nanos = u32::try_from((tick % TICKS_PER_SECOND) * 100).unwrap_or(0);
    let ts = Timestamp::from_unix(clock_sequence(), seconds, nanos);
    Uuid::new_v1(ts, node_id())
}

/// 100 ns intervals per second, the resolution of a version-1 timestamp.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Last tick handed out by [`next_tick`].
static LAST_TICK: AtomicU64 = AtomicU64::new(0);

fn unix_ticks(instant: &DateTime<Tz>) -> u64 {
    let seconds = u64::try_from(instant.timestamp()).unwrap_or(0);
    let sub_ticks = u64::from(instant.timestamp_subsec_nanos()) / 100;
    seconds.saturating_mul(TICKS_PER_SECOND).saturating_add(sub_ticks)
}

/// Return `tick`, or one past the last tick issued if the clock has not
/// moved forward since.
fn next_tick(tick: u64) -> u64 {
    let previous = LAST_TICK
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(tick.max(last.saturating_add(1)))
        })
        .unwrap_or_else(|last| last);
    tick.max(previous.saturating_add(1))
}

/// Process-wide clock sequence.
fn clock_sequence() -> &'static Context {
    static CONTEXT: OnceLock<Context> = OnceLock::new();
    CONTEXT.get_or_init(|| {
        let seed = Uuid::new_v4().into_bytes();
        Context::new(u16::from_be_bytes([seed[0], seed[1]]))
    })
}

/// Random node id with the multicast bit set, chosen once per process.
fn node_id() -> &'static [u8; 6] {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    NODE_ID.get_or_init(|| {
        let bytes = Uuid::new_v4().into_bytes();
        let mut node = [0u8; 6];
        node.copy_from_slice(&bytes[..6]);
        node[0] |= 0x01;
        node
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn eastern(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Tz> {
        DEFAULT_TIME_ZONE
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .unwrap()
    }

    #[test]
    fn test_timestamp_format_winter_and_summer() {
        assert_eq!(
            format_timestamp(&eastern(2024, 1, 2, 3, 4, 5)),
            "2024-01-02T030405-0500"
        );
        assert_eq!(
            format_timestamp(&eastern(2024, 7, 4, 12, 0, 0)),
            "2024-07-04T120000-0400"
        );
    }

    #[test]
    fn test_key_shape() {
        let clock = FixedClock::new(eastern(2024, 1, 2, 3, 4, 5));
        let key = generate_key(&clock);

        let (timestamp, uuid) = key.split_once('.').unwrap();
        assert_eq!(timestamp, "2024-01-02T030405-0500");
        let uuid = Uuid::parse_str(uuid).unwrap();
        assert_eq!(uuid.get_version_num(), 1);
        assert!(!key.contains(':') && !key.contains(' '));
    }

    #[test]
    fn test_stalled_clock_still_unique() {
        let clock = FixedClock::new(eastern(2024, 1, 2, 3, 4, 5));
        let keys: HashSet<String> = (0..1000).map(|_| generate_key(&clock)).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_long_stalled_clock_still_unique() {
        // More keys than the 14-bit clock sequence can distinguish alone.
        let clock = FixedClock::new(eastern(2024, 1, 2, 3, 4, 5));
        let keys: HashSet<String> = (0..20_000).map(|_| generate_key(&clock)).collect();
        assert_eq!(keys.len(), 20_000);
    }

    #[test]
    fn test_next_tick_never_repeats() {
        let first = next_tick(42);
        let second = next_tick(42);
        assert!(second > first);
        assert!(first >= 42);
    }

    #[test]
    fn test_concurrent_generation_unique() {
        let clock = FixedClock::new(eastern(2024, 1, 2, 3, 4, 5));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(move || (0..250).map(|_| generate_key(&clock)).collect::<Vec<_>>())
            })
            .collect();

        let mut keys = HashSet::new();
        for handle in handles {
            keys.extend(handle.join().unwrap());
        }
        assert_eq!(keys.len(), 2000);
    }

    #[test]
    fn test_keys_sort_by_time() {
        let earlier = key_for_instant(&eastern(2024, 1, 2, 3, 4, 5));
        let later = key_for_instant(&eastern(2024, 1, 2, 3, 4, 6));
        assert!(earlier < later);
    }

    #[test]
    fn test_system_clock_uses_zone() {
        let clock = SystemClock::new(chrono_tz::UTC);
        assert!(format_timestamp(&clock.now()).ends_with("+0000"));
    }
}
