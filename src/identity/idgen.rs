//! Snowflake-style 64-bit identifier generator.
//!
//! Layout, most significant first: 41+ bits of milliseconds since `EPOCH_MS`,
//! 5 bits datacenter, 5 bits worker, 12 bits sequence.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::clock::Clock;

pub const EPOCH_MS: i64 = 1_288_834_974_657;
pub const WORKER_BITS: u32 = 5;
pub const DATACENTER_BITS: u32 = 5;
pub const SEQUENCE_BITS: u32 = 12;

pub const MAX_WORKER_ID: i64 = (1 << WORKER_BITS) - 1;
pub const MAX_DATACENTER_ID: i64 = (1 << DATACENTER_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS + DATACENTER_BITS;

/// Fallback node component when host identity cannot be read.
const FALLBACK_NODE_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("clock moved backwards by {behind_ms}ms; refusing to generate id")]
    ClockRegression { behind_ms: i64 },
    #[error("{what} id {value} out of range 0..={max}")]
    NodeOutOfRange { what: &'static str, value: i64, max: i64 },
}

#[derive(Debug, Default)]
struct GenState {
    last_ts: i64,
    sequence: i64,
}

/// Decoded components of a generated id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub timestamp_ms: i64,
    pub datacenter_id: i64,
    pub worker_id: i64,
    pub sequence: i64,
}

pub struct IdGenerator {
    state: Mutex<GenState>,
    clock: Arc<dyn Clock>,
    worker_id: i64,
    datacenter_id: i64,
    skew_tolerance_ms: i64,
}

fn hash_into_range(input: &str, max: i64) -> i64 {
    (xxh3_64(input.as_bytes()) % (max as u64 + 1)) as i64
}

impl IdGenerator {
    /// Derive worker and datacenter ids from the host name and device name.
    pub fn from_host(clock: Arc<dyn Clock>, skew_tolerance_ms: u64) -> Self {
        let worker_id = match whoami::fallible::hostname() {
            Ok(h) if !h.is_empty() => hash_into_range(&h, MAX_WORKER_ID),
            _ => FALLBACK_NODE_ID,
        };
        let device = whoami::devicename();
        let datacenter_id = if device.is_empty() { FALLBACK_NODE_ID } else { hash_into_range(&device, MAX_DATACENTER_ID) };
        debug!(target: "idgen", worker_id, datacenter_id, "derived node identity from host");
        Self::build(clock, worker_id, datacenter_id, skew_tolerance_ms)
    }

    pub fn with_node(clock: Arc<dyn Clock>, worker_id: i64, datacenter_id: i64, skew_tolerance_ms: u64) -> Result<Self, IdError> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(IdError::NodeOutOfRange { what: "worker", value: worker_id, max: MAX_WORKER_ID });
        }
        if !(0..=MAX_DATACENTER_ID).contains(&datacenter_id) {
            return Err(IdError::NodeOutOfRange { what: "datacenter", value: datacenter_id, max: MAX_DATACENTER_ID });
        }
        Ok(Self::build(clock, worker_id, datacenter_id, skew_tolerance_ms))
    }

    fn build(clock: Arc<dyn Clock>, worker_id: i64, datacenter_id: i64, skew_tolerance_ms: u64) -> Self {
        Self { state: Mutex::new(GenState::default()), clock, worker_id, datacenter_id, skew_tolerance_ms: skew_tolerance_ms as i64 }
    }

    pub fn worker_id(&self) -> i64 { self.worker_id }
    pub fn datacenter_id(&self) -> i64 { self.datacenter_id }

    pub fn generate(&self) -> Result<i64, IdError> {
        let mut st = self.state.lock();
        let mut now = self.clock.now_millis();

        // Small regressions are waited out; anything larger is refused.
        while now < st.last_ts {
            let behind_ms = st.last_ts - now;
            if behind_ms > self.skew_tolerance_ms {
                warn!(target: "idgen", behind_ms, "clock regression beyond tolerance");
                return Err(IdError::ClockRegression { behind_ms });
            }
            debug!(target: "idgen", behind_ms, "waiting for clock to catch up");
            self.clock.sleep(Duration::from_millis(behind_ms as u64));
            now = self.clock.now_millis();
        }

        if now == st.last_ts {
            st.sequence = (st.sequence + 1) & SEQUENCE_MASK;
            if st.sequence == 0 {
                now = self.wait_next_millis(st.last_ts);
            }
        } else {
            st.sequence = 1;
        }
        st.last_ts = now;

        Ok(((now - EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_SHIFT)
            | (self.worker_id << WORKER_SHIFT)
            | st.sequence)
    }

    fn wait_next_millis(&self, last_ts: i64) -> i64 {
        let mut now = self.clock.now_millis();
        while now <= last_ts {
            std::hint::spin_loop();
            now = self.clock.now_millis();
        }
        now
    }

    pub fn decode(id: i64) -> IdParts {
        IdParts {
            timestamp_ms: (id >> TIMESTAMP_SHIFT) + EPOCH_MS,
            datacenter_id: (id >> DATACENTER_SHIFT) & MAX_DATACENTER_ID,
            worker_id: (id >> WORKER_SHIFT) & MAX_WORKER_ID,
            sequence: id & SEQUENCE_MASK,
        }
    }
}
