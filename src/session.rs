//! Per-client session storage.
//!
//! Middleware never reaches for session state through a global: each one is
//! constructed with the [`SharedSession`] of the client that sent the request.
//! A session is shared by every request from the same client (two browser
//! tabs, say), so every operation that reads and then changes state runs under
//! one lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use crate::token::{constant_time_eq, random_hex};

/// Alphabet for captcha strings.
const CAPTCHA_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Captcha length used by forms that do not ask for another.
pub const DEFAULT_CAPTCHA_LEN: usize = 6;

/// Outstanding CSRF tokens kept per session before the oldest is evicted.
pub const DEFAULT_MAX_CSRF_TOKENS: usize = 32;

/// How long a session may go unused before the store drops it.
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

/// Upper bound on the time between two sweeps of the store.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ── Flash messages ────────────────────────────────────────────────────────────

/// Bucket of a flash message. The wire names match common CSS alert classes.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FlashKind {
    Error,
    Warning,
    Info,
    Success,
}

impl FlashKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error   => "danger",
            Self::Warning => "warning",
            Self::Info    => "info",
            Self::Success => "success",
        }
    }

    /// Unknown names fall back to [`FlashKind::Info`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "danger"  => Self::Error,
            "warning" => Self::Warning,
            "success" => Self::Success,
            _         => Self::Info,
        }
    }
}

/// Messages queued for the next render, grouped by kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlashMessage {
    kind: FlashKind,
    messages: Vec<String>,
}

impl FlashMessage {
    pub fn new(kind: FlashKind) -> Self {
        Self { kind, messages: Vec::new() }
    }

    pub fn kind(&self) -> FlashKind { self.kind }
    pub fn messages(&self) -> &[String] { &self.messages }

    pub fn first(&self) -> &str {
        self.messages.first().map_or("", String::as_str)
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

impl fmt::Display for FlashMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages.join("\n"))
    }
}

// ── Session capability ────────────────────────────────────────────────────────

/// What middleware may do with a client's session.
pub trait Session: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn has(&self, key: &str) -> bool;
    /// Removes `key`, returning what it held.
    fn unset(&self, key: &str) -> Option<String>;
    /// Drops every value, token, captcha and flash message.
    fn clear(&self);

    /// Returns the raw CSRF token stored under `name`, minting a new one if
    /// `force_new` is set or none exists.
    fn csrf_token(&self, name: &str, force_new: bool) -> String;

    /// Compares `candidate` against the token stored under `name` and removes
    /// the stored token, in one atomic step, whatever the outcome.
    fn validate_csrf_token(&self, name: &str, candidate: &[u8]) -> bool;

    /// Returns the captcha text for `form`, minting `len` characters if
    /// `force_new` is set or none exists.
    fn captcha(&self, form: &str, len: usize, force_new: bool) -> String;

    /// Read-and-clear, like [`validate_csrf_token`](Self::validate_csrf_token).
    fn validate_captcha(&self, form: &str, candidate: &str) -> bool;

    fn add_flash(&self, kind: FlashKind, message: &str);
    /// Takes the messages of one kind; they are gone afterwards.
    fn take_flash(&self, kind: FlashKind) -> Option<FlashMessage>;
    /// Takes every pending flash message.
    fn take_flashes(&self) -> Vec<FlashMessage>;
    fn has_flash(&self, kind: FlashKind) -> bool;
}

/// A session handle as injected into middleware.
pub type SharedSession = Arc<dyn Session>;

// ── In-memory implementation ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SessionData {
    values: HashMap<String, String>,
    csrf: HashMap<String, String>,
    /// Token names, oldest first.
    csrf_order: VecDeque<String>,
    captcha: HashMap<String, String>,
    flash: BTreeMap<FlashKind, FlashMessage>,
}

impl SessionData {
    fn take_csrf(&mut self, name: &str) -> Option<String> {
        let token = self.csrf.remove(name)?;
        self.csrf_order.retain(|n| n != name);
        Some(token)
    }
}

/// Process-local session.
///
/// Every rendered form leaves a CSRF token behind, and most are never
/// submitted, so at most `max_tokens` are kept. Minting one more evicts the
/// oldest.
#[derive(Debug)]
pub struct MemorySession {
    data: Mutex<SessionData>,
    max_tokens: usize,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::with_token_limit(DEFAULT_MAX_CSRF_TOKENS)
    }
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limit of zero is treated as one.
    pub fn with_token_limit(max_tokens: usize) -> Self {
        Self { data: Mutex::new(SessionData::default()), max_tokens: max_tokens.max(1) }
    }

    /// Number of CSRF tokens currently outstanding.
    pub fn pending_tokens(&self) -> usize {
        self.data.lock().csrf.len()
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.data.lock().values.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.data.lock().values.insert(key.to_owned(), value);
    }

    fn has(&self, key: &str) -> bool {
        self.data.lock().values.contains_key(key)
    }

    fn unset(&self, key: &str) -> Option<String> {
        self.data.lock().values.remove(key)
    }

    fn clear(&self) {
        *self.data.lock() = SessionData::default();
    }

    fn csrf_token(&self, name: &str, force_new: bool) -> String {
        let mut data = self.data.lock();
        if !force_new {
            if let Some(token) = data.csrf.get(name).filter(|t| !t.is_empty()) {
                return token.clone();
            }
        }
        let token = random_hex(32);
        if data.csrf.insert(name.to_owned(), token.clone()).is_none() {
            data.csrf_order.push_back(name.to_owned());
        }
        while data.csrf.len() > self.max_tokens {
            let Some(oldest) = data.csrf_order.pop_front() else { break };
            data.csrf.remove(&oldest);
            debug!(name = %oldest, "csrf token evicted");
        }
        token
    }

    fn validate_csrf_token(&self, name: &str, candidate: &[u8]) -> bool {
        let stored = self.data.lock().take_csrf(name);
        match stored {
            Some(token) => constant_time_eq(token.as_bytes(), candidate),
            None => {
                debug!(name, "no csrf token stored under name");
                false
            }
        }
    }

    fn captcha(&self, form: &str, len: usize, force_new: bool) -> String {
        let mut data = self.data.lock();
        if !force_new {
            if let Some(text) = data.captcha.get(form).filter(|t| !t.is_empty()) {
                return text.clone();
            }
        }
        let mut rng = rand::thread_rng();
        let text: String = (0..len)
            .map(|_| CAPTCHA_ALPHABET[rng.gen_range(0..CAPTCHA_ALPHABET.len())] as char)
            .collect();
        data.captcha.insert(form.to_owned(), text.clone());
        text
    }

    fn validate_captcha(&self, form: &str, candidate: &str) -> bool {
        let stored = self.data.lock().captcha.remove(form);
        stored.is_some_and(|text| constant_time_eq(text.as_bytes(), candidate.as_bytes()))
    }

    fn add_flash(&self, kind: FlashKind, message: &str) {
        self.data.lock()
            .flash
            .entry(kind)
            .or_insert_with(|| FlashMessage::new(kind))
            .push(message);
    }

    fn take_flash(&self, kind: FlashKind) -> Option<FlashMessage> {
        self.data.lock().flash.remove(&kind)
    }

    fn take_flashes(&self) -> Vec<FlashMessage> {
        std::mem::take(&mut self.data.lock().flash).into_values().collect()
    }

    fn has_flash(&self, kind: FlashKind) -> bool {
        self.data.lock().flash.contains_key(&kind)
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

struct StoreEntry {
    session: Arc<MemorySession>,
    last_seen: Instant,
}

/// Process-wide map of session id → session.
///
/// A session unused for longer than the idle timeout is gone: looking it up
/// yields a new session, and [`open`](Self::open) periodically sweeps such
/// entries out.
pub struct SessionStore {
    sessions: DashMap<String, StoreEntry>,
    idle_timeout: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_SESSION_IDLE)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn idle_timeout(&self) -> Duration { self.idle_timeout }

    /// Returns the session for `id`, or a brand-new session (with a new id)
    /// if `id` is absent, unknown or expired. The boolean is `true` for a new
    /// session.
    pub fn open(&self, id: Option<&str>) -> (String, SharedSession, bool) {
        let now = Instant::now();
        self.sweep_if_due(now);

        if let Some(id) = id {
            if let Some(mut entry) = self.sessions.get_mut(id) {
                if now.duration_since(entry.last_seen) < self.idle_timeout {
                    entry.last_seen = now;
                    let session: SharedSession = entry.session.clone();
                    return (id.to_owned(), session, false);
                }
            }
            if self.sessions.remove(id).is_some() {
                debug!("expired session dropped");
            }
        }

        let id = random_hex(16);
        let session = Arc::new(MemorySession::new());
        self.sessions.insert(id.clone(), StoreEntry { session: Arc::clone(&session), last_seen: now });
        debug!(sessions = self.sessions.len(), "session opened");
        let shared: SharedSession = session;
        (id, shared, true)
    }

    /// Drops every session idle for longer than the timeout. Returns how many
    /// were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        *self.last_sweep.lock() = now;
        self.evict_idle(now)
    }

    fn sweep_if_due(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock();
            if now.duration_since(*last) < self.idle_timeout.min(MAX_SWEEP_INTERVAL) {
                return;
            }
            *last = now;
        }
        self.evict_idle(now);
    }

    fn evict_idle(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        let dropped = before.saturating_sub(self.sessions.len());
        if dropped > 0 {
            debug!(dropped, remaining = self.sessions.len(), "idle sessions swept");
        }
        dropped
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize { self.sessions.len() }
    pub fn is_empty(&self) -> bool { self.sessions.is_empty() }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn values_round_trip_and_unset() {
        let s = MemorySession::new();
        s.set("__user_id", "42".into());
        assert!(s.has("__user_id"));
        assert_eq!(s.unset("__user_id").as_deref(), Some("42"));
        assert!(!s.has("__user_id"));
        assert_eq!(s.get("__user_id"), None);
    }

    #[test]
    fn csrf_token_is_reused_unless_forced() {
        let s = MemorySession::new();
        let first = s.csrf_token("csrf1", true);
        assert_eq!(first.len(), 64);
        assert_eq!(s.csrf_token("csrf1", false), first);
        assert_ne!(s.csrf_token("csrf1", true), first);
    }

    #[test]
    fn csrf_validation_consumes_even_on_mismatch() {
        let s = MemorySession::new();
        let token = s.csrf_token("csrf1", true);
        assert!(!s.validate_csrf_token("csrf1", b"wrong"));
        assert!(!s.validate_csrf_token("csrf1", token.as_bytes()));
        assert_eq!(s.pending_tokens(), 0);
    }

    #[test]
    fn racing_validations_accept_at_most_once() {
        let s = Arc::new(MemorySession::new());
        let token = s.csrf_token("csrf1", true);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                let token = token.clone();
                thread::spawn(move || s.validate_csrf_token("csrf1", token.as_bytes()))
            })
            .collect();
        let wins = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|accepted| *accepted)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(s.pending_tokens(), 0);
    }

    #[test]
    fn outstanding_tokens_are_capped_oldest_first() {
        let s = MemorySession::with_token_limit(3);
        let first = s.csrf_token("t0", true);
        for i in 1..1000 {
            s.csrf_token(&format!("t{i}"), true);
        }
        assert_eq!(s.pending_tokens(), 3);
        assert!(!s.validate_csrf_token("t0", first.as_bytes()));

        let newest = s.csrf_token("t999", false);
        assert!(s.validate_csrf_token("t999", newest.as_bytes()));
        assert_eq!(s.pending_tokens(), 2);
    }

    #[test]
    fn reminting_a_name_does_not_count_twice() {
        let s = MemorySession::with_token_limit(2);
        s.csrf_token("a", true);
        s.csrf_token("b", true);
        s.csrf_token("a", true);
        assert_eq!(s.pending_tokens(), 2);
        // "a" still sits first in line, so a new name evicts it.
        s.csrf_token("c", true);
        assert!(!s.validate_csrf_token("a", b""));
        assert_eq!(s.pending_tokens(), 2);
    }

    #[test]
    fn captcha_is_single_use() {
        let s = MemorySession::new();
        let text = s.captcha("signup", DEFAULT_CAPTCHA_LEN, true);
        assert_eq!(text.len(), 6);
        assert!(text.bytes().all(|b| CAPTCHA_ALPHABET.contains(&b)));
        assert!(s.validate_captcha("signup", &text));
        assert!(!s.validate_captcha("signup", &text));
    }

    #[test]
    fn flash_messages_are_taken_once() {
        let s = MemorySession::new();
        s.add_flash(FlashKind::Success, "saved");
        s.add_flash(FlashKind::Success, "and indexed");
        s.add_flash(FlashKind::Error, "but slowly");

        let success = s.take_flash(FlashKind::Success).unwrap();
        assert_eq!(success.first(), "saved");
        assert_eq!(success.to_string(), "saved\nand indexed");
        assert!(!s.has_flash(FlashKind::Success));

        let rest = s.take_flashes();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].kind().as_str(), "danger");
        assert!(s.take_flashes().is_empty());
    }

    #[test]
    fn flash_kind_names() {
        assert_eq!(FlashKind::from_name("danger"), FlashKind::Error);
        assert_eq!(FlashKind::from_name("bogus"), FlashKind::Info);
    }

    #[test]
    fn store_reuses_known_ids_only() {
        let store = SessionStore::new();
        let (id, session, fresh) = store.open(None);
        assert!(fresh);
        session.set("k", "v".into());

        let (same, again, fresh) = store.open(Some(&id));
        assert!(!fresh);
        assert_eq!(same, id);
        assert_eq!(again.get("k").as_deref(), Some("v"));

        let (other, _, fresh) = store.open(Some("forged"));
        assert!(fresh);
        assert_ne!(other, "forged");
        assert_eq!(store.len(), 2);
        assert!(store.remove(&id));
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::with_idle_timeout(Duration::ZERO);
        let (id, _, _) = store.open(None);

        let (other, _, fresh) = store.open(Some(&id));
        assert!(fresh);
        assert_ne!(other, id);

        for _ in 0..1000 {
            store.open(None);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sweep_keeps_live_sessions() {
        let store = SessionStore::new();
        let (id, _, _) = store.open(None);
        assert_eq!(store.sweep(), 0);
        assert!(!store.open(Some(&id)).2);
        assert_eq!(store.idle_timeout(), DEFAULT_SESSION_IDLE);
    }
}
