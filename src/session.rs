//! Per-conversation context with TTL eviction.
//!
//! [`SessionStore`] holds every live [`Session`] in process memory. The
//! map itself sits behind a `RwLock`; each session sits behind its own
//! `Mutex`, so turns appended to one session never block another.
//!
//! Lock order is always *session, then map*. Lookups take the map lock,
//! clone the session handle, and release the map before locking the
//! session. [`SessionStore::sweep_expired`] locks a session first, marks
//! it evicted, and only then removes it from the map. A writer that
//! raced the sweep sees the evicted mark and retries against a fresh
//! session, so no turn is ever appended to a detached session.
//!
//! Time comes from an injected [`Clock`] so expiry is testable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{Query, Session, Turn, ValidationOutcome};

/// Maximum length of a caller-supplied session id.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SessionEntry {
    session: Session,
    /// Set by the sweeper under this entry's lock before removal.
    evicted: bool,
}

type SessionHandle = Arc<Mutex<SessionEntry>>;

pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_turns: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            ttl,
            max_turns: max_turns.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.session_ttl, config.max_turns_per_session, clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fetch a session, creating it when absent.
    ///
    /// With no id a new session is created under a fresh UUID. An unknown
    /// (or expired) well-formed id starts a fresh session under that id.
    /// The access refreshes `last_active_at`.
    pub fn get_or_create(&self, session_id: Option<&str>) -> Result<Session> {
        let id = match session_id {
            Some(id) => {
                check_session_id(id)?;
                id.to_string()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        loop {
            let handle = self.handle_for(&id);
            let mut entry = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if entry.evicted {
                continue;
            }
            let now = self.clock.now();
            self.reset_if_expired(&mut entry.session, now);
            entry.session.last_active_at = now;
            return Ok(entry.session.clone());
        }
    }

    /// Record a turn and refresh `last_active_at`.
    ///
    /// Concurrent calls for the same session are serialized on that
    /// session's lock; both turns are kept. History beyond
    /// `max_turns_per_session` drops the oldest turns.
    pub fn append_turn(
        &self,
        session_id: &str,
        query: &Query,
        outcome: ValidationOutcome,
    ) -> Result<()> {
        check_session_id(session_id)?;

        loop {
            let handle = self.handle_for(session_id);
            let mut entry = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if entry.evicted {
                continue;
            }
            let now = self.clock.now();
            self.reset_if_expired(&mut entry.session, now);

            let session = &mut entry.session;
            session.turns.push(Turn {
                query: query.text().to_string(),
                selected_text: query.selected_text().map(String::from),
                outcome,
                at: now,
            });
            if session.turns.len() > self.max_turns {
                let excess = session.turns.len() - self.max_turns;
                session.turns.drain(..excess);
            }
            session.last_active_at = now;
            return Ok(());
        }
    }

    /// The most recent `limit` turns, oldest first. Empty for unknown or
    /// expired sessions.
    pub fn history(&self, session_id: &str, limit: usize) -> Vec<Turn> {
        let Some(handle) = self.lookup(session_id) else {
            return Vec::new();
        };
        let entry = handle.lock().unwrap_or_else(PoisonError::into_inner);
        if entry.evicted || self.is_expired(&entry.session, self.clock.now()) {
            return Vec::new();
        }
        let turns = &entry.session.turns;
        turns[turns.len().saturating_sub(limit)..].to_vec()
    }

    /// Snapshot of a stored session without touching it.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let handle = self.lookup(session_id)?;
        let entry = handle.lock().unwrap_or_else(PoisonError::into_inner);
        (!entry.evicted).then(|| entry.session.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every session idle for longer than the TTL as of `now`.
    ///
    /// Each session is locked before it is judged and removed, so a
    /// concurrent [`append_turn`](Self::append_turn) either lands before
    /// the check (and keeps the session alive) or retries on a fresh one.
    /// Returns the number of sessions evicted.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let candidates: Vec<(String, SessionHandle)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect();

        let mut evicted = 0;
        for (id, handle) in candidates {
            let mut entry = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if entry.evicted || !self.is_expired(&entry.session, now) {
                continue;
            }
            entry.evicted = true;

            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            if sessions
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                sessions.remove(&id);
                evicted += 1;
                debug!(session_id = %id, "session evicted");
            }
        }

        if evicted > 0 {
            info!(evicted, remaining = self.len(), "expired sessions swept");
        }
        evicted
    }

    fn lookup(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Existing handle for `id`, or a newly inserted empty session.
    fn handle_for(&self, id: &str) -> SessionHandle {
        if let Some(handle) = self.lookup(id) {
            return handle;
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(id.to_string()).or_insert_with(|| {
            debug!(session_id = %id, "session not found, creating");
            let now = self.clock.now();
            Arc::new(Mutex::new(SessionEntry {
                session: Session {
                    id: id.to_string(),
                    turns: Vec::new(),
                    created_at: now,
                    last_active_at: now,
                },
                evicted: false,
            }))
        }))
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        match (now - session.last_active_at).to_std() {
            Ok(idle) => idle > self.ttl,
            // last_active_at in the future: not idle at all
            Err(_) => false,
        }
    }

    fn reset_if_expired(&self, session: &mut Session, now: DateTime<Utc>) {
        if self.is_expired(session, now) {
            debug!(session_id = %session.id, "session expired before sweep, starting fresh");
            session.turns.clear();
            session.created_at = now;
        }
    }
}

/// Well-formed ids are 1..=128 characters of `[A-Za-z0-9_.-]`.
pub fn check_session_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(PipelineError::InvalidSessionId(
            crate::error::truncate_for_log(id),
        ))
    }
}

/// Run [`SessionStore::sweep_expired`] every `interval` until the task is
/// aborted.
pub fn spawn_sweeper(store: Arc<SessionStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.sweep_expired(store.now());
        }
    })
}
