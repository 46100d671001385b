use std::collections::{BTreeSet, HashMap as StdHashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

use super::{KvBackend, StoreError, StoreResult};

/// Value variants supported by the in-memory KV store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvValue {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: KvValue,
    /// Absolute expiry in clock milliseconds.
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn live(&self, now_ms: i64) -> bool { self.expires_at_ms.map(|e| now_ms < e).unwrap_or(true) }
}

/// In-memory stand-in for the shared key-value store.
///
/// Expiry is evaluated lazily against the injected clock on every access, and
/// `sweep` reclaims expired keys in bulk. Every trait call counts as one round trip
/// in `ops()`; `set_unavailable(true)` makes every call fail the way an unreachable
/// store would.
#[derive(Clone)]
pub struct MemoryKv {
    map: Arc<parking_lot::RwLock<StdHashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    ops: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl Default for MemoryKv {
    fn default() -> Self { Self::new(Arc::new(SystemClock)) }
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: Arc::new(parking_lot::RwLock::new(StdHashMap::new())),
            clock,
            ops: Arc::new(AtomicUsize::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn ops(&self) -> usize { self.ops.load(Ordering::SeqCst) }
    pub fn set_unavailable(&self, down: bool) { self.unavailable.store(down, Ordering::SeqCst) }

    fn begin(&self) -> StoreResult<i64> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("kv store unreachable".into()));
        }
        Ok(self.clock.now_millis())
    }

    fn expiry(&self, now_ms: i64, ttl: Option<Duration>) -> Option<i64> { ttl.map(|d| now_ms + d.as_millis() as i64) }

    /// Remaining lifetime of a key, `None` if missing or persistent. Not counted as an op.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        let r = self.map.read();
        let ent = r.get(key).filter(|e| e.live(now))?;
        ent.expires_at_ms.map(|e| Duration::from_millis((e - now).max(0) as u64))
    }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Add members under one write guard; `ttl` re-arms the expiry in the same step.
    fn insert_members(&self, now: i64, key: &str, members: &[String], ttl: Option<Duration>) -> usize {
        let mut w = self.map.write();
        let ent = w.entry(key.to_string()).or_insert_with(|| Entry { value: KvValue::Set(BTreeSet::new()), expires_at_ms: None });
        // An expired or string-typed entry is replaced by a fresh set.
        if !ent.live(now) || !matches!(ent.value, KvValue::Set(_)) {
            *ent = Entry { value: KvValue::Set(BTreeSet::new()), expires_at_ms: None };
        }
        if ttl.is_some() {
            ent.expires_at_ms = self.expiry(now, ttl);
        }
        let KvValue::Set(set) = &mut ent.value else { return 0 };
        members.iter().filter(|m| set.insert((*m).clone())).count()
    }

    /// Remove expired keys. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, e| e.live(now));
        before - w.len()
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.begin()?;
        let r = self.map.read();
        Ok(match r.get(key) {
            Some(Entry { value: KvValue::Str(s), expires_at_ms }) if expires_at_ms.map(|e| now < e).unwrap_or(true) => Some(s.clone()),
            _ => None,
        })
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let now = self.begin()?;
        let ent = Entry { value: KvValue::Str(value.to_string()), expires_at_ms: self.expiry(now, ttl) };
        self.map.write().insert(key.to_string(), ent);
        Ok(())
    }

    fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.begin()?;
        let mut w = self.map.write();
        if w.get(key).map(|e| e.live(now)).unwrap_or(false) { return Ok(false); }
        w.insert(key.to_string(), Entry { value: KvValue::Str(value.to_string()), expires_at_ms: self.expiry(now, Some(ttl)) });
        Ok(true)
    }

    fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = self.begin()?;
        let mut w = self.map.write();
        let matches = matches!(w.get(key), Some(e @ Entry { value: KvValue::Str(s), .. }) if e.live(now) && s == expected);
        if matches { w.remove(key); }
        Ok(matches)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.begin()?;
        Ok(self.map.write().remove(key).map(|e| e.live(now)).unwrap_or(false))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = self.begin()?;
        Ok(self.map.read().get(key).map(|e| e.live(now)).unwrap_or(false))
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.begin()?;
        let mut w = self.map.write();
        match w.get_mut(key) {
            Some(e) if e.live(now) => { e.expires_at_ms = Some(now + ttl.as_millis() as i64); Ok(true) }
            _ => Ok(false),
        }
    }

    fn sadd(&self, key: &str, members: &[String]) -> StoreResult<usize> {
        let now = self.begin()?;
        Ok(self.insert_members(now, key, members, None))
    }

    fn sadd_with_ttl(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<()> {
        let now = self.begin()?;
        self.insert_members(now, key, members, Some(ttl));
        Ok(())
    }

    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        let now = self.begin()?;
        let r = self.map.read();
        Ok(match r.get(key) {
            Some(e @ Entry { value: KvValue::Set(s), .. }) if e.live(now) => s.clone(),
            _ => BTreeSet::new(),
        })
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now = self.begin()?;
        let r = self.map.read();
        Ok(matches!(r.get(key), Some(e @ Entry { value: KvValue::Set(s), .. }) if e.live(now) && s.contains(member)))
    }

    fn srem(&self, key: &str, members: &[String]) -> StoreResult<usize> {
        let now = self.begin()?;
        let mut w = self.map.write();
        match w.get_mut(key) {
            Some(Entry { value: KvValue::Set(s), expires_at_ms }) if expires_at_ms.map(|e| now < e).unwrap_or(true) => {
                Ok(members.iter().filter(|m| s.remove(m.as_str())).count())
            }
            _ => Ok(0),
        }
    }
}
