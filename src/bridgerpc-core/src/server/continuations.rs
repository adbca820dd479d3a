use crate::error::ProtocolViolation;
use crate::message::SubRequestKind;
use crate::server::methods::{BoxedSource, Callback};
use dashmap::DashMap;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Identifies the physical connection a continuation was opened on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionTag {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
}

impl SessionTag {
    pub fn generate() -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id: nanoid!(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationKind {
    AsyncIterator,
    Function,
}

impl fmt::Display for ContinuationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuationKind::AsyncIterator => write!(f, "async-iterator"),
            ContinuationKind::Function => write!(f, "function"),
        }
    }
}

/// How many consumed callback ids are remembered for error reporting.
pub(crate) const CONSUMED_MEMORY: usize = 1024;

pub(crate) type SharedSource = Arc<Mutex<BoxedSource>>;

enum Handle {
    Iterator(SharedSource),
    Function(Callback),
}

struct Continuation {
    handle: Handle,
    session: Option<SessionTag>,
    created_at: Instant,
}

impl Continuation {
    fn kind(&self) -> ContinuationKind {
        match self.handle {
            Handle::Iterator(_) => ContinuationKind::AsyncIterator,
            Handle::Function(_) => ContinuationKind::Function,
        }
    }

    fn check_session(&self, id: &str, caller: Option<&SessionTag>) -> Result<(), ProtocolViolation> {
        match &self.session {
            Some(owner) if caller != Some(owner) => Err(ProtocolViolation::SessionMismatch {
                id: id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn mismatch(&self, id: &str, requested: &SubRequestKind) -> ProtocolViolation {
        ProtocolViolation::KindMismatch {
            id: id.to_string(),
            requested: requested.to_string(),
            registered: self.kind(),
        }
    }
}

/// Open streams and callbacks, keyed by the id of the call that produced them.
///
/// Consuming a callback removes its entry. The id is remembered among the
/// last [`CONSUMED_MEMORY`] consumed ids, so a second invocation fails with
/// [`ProtocolViolation::ContinuationConsumed`] instead of looking unknown.
#[derive(Default)]
pub(crate) struct ContinuationRegistry {
    entries: DashMap<String, Continuation>,
    consumed: DashMap<String, u64>,
    consumed_seq: AtomicU64,
}

impl ContinuationRegistry {
    pub fn insert_iterator(&self, id: &str, source: BoxedSource, session: Option<SessionTag>) {
        self.insert(id, Handle::Iterator(Arc::new(Mutex::new(source))), session);
    }

    pub fn insert_function(&self, id: &str, callback: Callback, session: Option<SessionTag>) {
        self.insert(id, Handle::Function(callback), session);
    }

    fn insert(&self, id: &str, handle: Handle, session: Option<SessionTag>) {
        self.entries.insert(
            id.to_string(),
            Continuation {
                handle,
                session,
                created_at: Instant::now(),
            },
        );
    }

    pub fn iterator(&self, id: &str, caller: Option<&SessionTag>) -> Result<SharedSource, ProtocolViolation> {
        let entry = self.entries.get(id).ok_or_else(|| self.missing(id))?;
        entry.check_session(id, caller)?;

        match &entry.handle {
            Handle::Iterator(source) => Ok(source.clone()),
            Handle::Function(_) => Err(entry.mismatch(id, &SubRequestKind::AsyncIteratorNext)),
        }
    }

    /// Removes an armed callback and hands it out.
    pub fn consume_function(
        &self,
        id: &str,
        caller: Option<&SessionTag>,
    ) -> Result<Callback, ProtocolViolation> {
        {
            let entry = self.entries.get(id).ok_or_else(|| self.missing(id))?;
            entry.check_session(id, caller)?;
            if let Handle::Iterator(_) = entry.handle {
                return Err(ProtocolViolation::KindMismatch {
                    id: id.to_string(),
                    requested: "function-call".to_string(),
                    registered: ContinuationKind::AsyncIterator,
                });
            }
        }

        // A concurrent call may have taken it since the lookup.
        match self
            .entries
            .remove_if(id, |_, entry| matches!(entry.handle, Handle::Function(_)))
        {
            Some((_, Continuation { handle: Handle::Function(callback), .. })) => {
                self.remember_consumed(id);
                Ok(callback)
            }
            _ => Err(ProtocolViolation::ContinuationConsumed { id: id.to_string() }),
        }
    }

    fn missing(&self, id: &str) -> ProtocolViolation {
        if self.consumed.contains_key(id) {
            ProtocolViolation::ContinuationConsumed { id: id.to_string() }
        } else {
            ProtocolViolation::UnknownContinuation { id: id.to_string() }
        }
    }

    fn remember_consumed(&self, id: &str) {
        let seq = self.consumed_seq.fetch_add(1, Ordering::Relaxed);
        self.consumed.insert(id.to_string(), seq);
        if self.consumed.len() > CONSUMED_MEMORY {
            let floor = seq.saturating_sub(CONSUMED_MEMORY as u64 / 2);
            self.consumed.retain(|_, consumed_at| *consumed_at > floor);
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed.len()
    }

    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        self.evict(|entry| entry.created_at.elapsed() >= max_age)
    }

    pub fn release_session(&self, session: &SessionTag) -> usize {
        self.evict(|entry| entry.session.as_ref() == Some(session))
    }

    fn evict(&self, doomed: impl Fn(&Continuation) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !doomed(entry));
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::Value;

    fn noop_callback() -> Callback {
        Box::new(|_: Vec<Value>| async move { Ok::<_, anyhow::Error>(Value::Null) }.boxed())
    }

    #[test]
    fn function_entry_is_single_shot() {
        let registry = ContinuationRegistry::default();
        registry.insert_function("f", noop_callback(), None);
        assert!(registry.is_live("f"));

        assert!(registry.consume_function("f", None).is_ok());
        assert!(!registry.is_live("f"));
        assert_eq!(registry.live_count(), 0);
        assert_eq!(
            registry.consume_function("f", None).err(),
            Some(ProtocolViolation::ContinuationConsumed { id: "f".into() })
        );
    }

    #[test]
    fn consumed_ids_are_bounded() {
        let registry = ContinuationRegistry::default();
        for n in 0..CONSUMED_MEMORY * 3 {
            let id = n.to_string();
            registry.insert_function(&id, noop_callback(), None);
            registry.consume_function(&id, None).unwrap();
        }

        assert_eq!(registry.live_count(), 0);
        assert!(registry.consumed_count() <= CONSUMED_MEMORY);
        let latest = (CONSUMED_MEMORY * 3 - 1).to_string();
        assert_eq!(
            registry.consume_function(&latest, None).err(),
            Some(ProtocolViolation::ContinuationConsumed { id: latest })
        );
        assert_eq!(
            registry.consume_function("0", None).err(),
            Some(ProtocolViolation::UnknownContinuation { id: "0".into() })
        );
    }

    #[test]
    fn unknown_and_mismatched_lookups() {
        let registry = ContinuationRegistry::default();
        assert_eq!(
            registry.iterator("x", None).err(),
            Some(ProtocolViolation::UnknownContinuation { id: "x".into() })
        );

        registry.insert_function("f", noop_callback(), None);
        assert!(matches!(
            registry.iterator("f", None).err(),
            Some(ProtocolViolation::KindMismatch {
                registered: ContinuationKind::Function,
                ..
            })
        ));
    }

    #[test]
    fn session_tags_are_compared_by_value() {
        let registry = ContinuationRegistry::default();
        let owner = SessionTag::generate();
        let stranger = SessionTag::generate();
        registry.insert_function("f", noop_callback(), Some(owner.clone()));

        assert_eq!(
            registry.consume_function("f", Some(&stranger)).err(),
            Some(ProtocolViolation::SessionMismatch { id: "f".into() })
        );
        assert!(registry.consume_function("f", None).is_err());
        assert!(registry.consume_function("f", Some(&owner.clone())).is_ok());
    }

    #[test]
    fn eviction_by_session_and_age() {
        let registry = ContinuationRegistry::default();
        let a = SessionTag::generate();
        let b = SessionTag::generate();
        registry.insert_function("1", noop_callback(), Some(a.clone()));
        registry.insert_function("2", noop_callback(), Some(a.clone()));
        registry.insert_function("3", noop_callback(), Some(b));

        assert_eq!(registry.release_session(&a), 2);
        assert_eq!(registry.live_count(), 1);

        assert_eq!(registry.evict_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(registry.evict_older_than(Duration::ZERO), 1);
        assert_eq!(registry.live_count(), 0);
    }
}
