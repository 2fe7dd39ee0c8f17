//! Converse tracker: keeps the list of handlers eligible to converse in sync
//! with the bus.
//!
//! Inputs, from most to least trustworthy:
//!
//! - `active_skill_request`: a handler announces itself; promoted at once.
//! - `skill.converse.response`: authoritative answer to a converse offer;
//!   records `last_conversed`, removes handlers the service no longer knows
//!   and corrects missed promotions.
//! - `recognizer_loop:utterance`: the utterance is resolved speculatively
//!   through the intent service and the predicted handler promoted; stale
//!   entries are expired afterwards.
//! - `sync_with_active_handlers`: on-demand reconciliation against the
//!   intent service's own list, the convergence backstop.
//!
//! All list mutations happen under one async mutex. Intent-service queries
//! are always issued with the lock released. Lifecycle notifications are
//! emitted before the lock is released, so their order on the bus is the
//! order in which the list changed.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use convtrack_bus::{Message, Transport, handler};
use convtrack_core::{ActiveHandlerEntry, ActiveHandlerList, MergeOutcome, TrackerConfig, merge};

use crate::clock::{Clock, SystemClock};
use crate::query::IntentQueryApi;
use crate::topics;

/// Error strings meaning "this handler is not registered".
const HANDLER_NOT_FOUND_ERRORS: [&str; 2] = ["skill id does not exist", "handler id does not exist"];

/// Whether a removal announces itself on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    Notify,
    Silent,
}

#[derive(Debug, Default)]
struct TrackerState {
    active: ActiveHandlerList,
    last_conversed: Option<String>,
}

struct Binding {
    bus: Arc<dyn Transport>,
    intents: IntentQueryApi,
}

struct Inner {
    state: Mutex<TrackerState>,
    binding: OnceLock<Binding>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

// ─── Payloads ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ActivateRequest {
    #[serde(default, alias = "handler_id")]
    skill_id: String,
}

#[derive(Debug, Deserialize)]
struct ConverseResponse {
    #[serde(default, alias = "handler_id")]
    skill_id: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl ConverseResponse {
    fn accepted(&self) -> bool {
        matches!(self.result, Some(Value::Bool(true)))
    }

    fn handler_not_found(&self) -> bool {
        self.error
            .as_ref()
            .and_then(Value::as_str)
            .is_some_and(|e| HANDLER_NOT_FOUND_ERRORS.contains(&e))
    }
}

// ─── Tracker ─────────────────────────────────────────────────────────

/// Shared handle; clones observe and mutate the same state.
#[derive(Clone)]
pub struct ConverseTracker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConverseTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverseTracker")
            .field("config", &self.inner.config)
            .field("bound", &self.is_bound())
            .finish_non_exhaustive()
    }
}

impl ConverseTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TrackerState::default()),
                binding: OnceLock::new(),
                clock,
                config,
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.get().is_some()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // ── Binding ──────────────────────────────────────────────────────

    /// Bind to `bus` and subscribe the event handlers.
    ///
    /// Only the first call binds; later calls are no-ops returning `false`.
    /// Until bound, lifecycle notifications are dropped and utterances
    /// cannot be resolved.
    pub fn connect_bus(&self, bus: Arc<dyn Transport>) -> bool {
        let intents = IntentQueryApi::new(Arc::clone(&bus))
            .with_timeout(self.inner.config.query_timeout())
            .with_lang(self.inner.config.lang.clone());
        let binding = Binding {
            bus: Arc::clone(&bus),
            intents,
        };
        if self.inner.binding.set(binding).is_err() {
            debug!("converse tracker already bound, ignoring");
            return false;
        }

        self.subscribe(bus.as_ref(), topics::ACTIVE_SKILL_REQUEST, |t, msg| async move {
            t.handle_activate_request(msg).await
        });
        self.subscribe(bus.as_ref(), topics::CONVERSE_RESPONSE, |t, msg| async move {
            t.handle_converse_response(msg).await
        });
        self.subscribe(bus.as_ref(), topics::HANDLER_START, |t, msg| async move {
            t.handle_handler_start(msg).await
        });
        self.subscribe(bus.as_ref(), topics::UTTERANCE, |t, msg| async move {
            t.handle_utterance(msg).await
        });

        info!("converse tracker bound to message bus");
        true
    }

    /// Subscribe through a weak handle so the bus does not keep the tracker
    /// alive.
    fn subscribe<F, Fut>(&self, bus: &dyn Transport, topic: &str, f: F)
    where
        F: Fn(ConverseTracker, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        bus.on(
            topic,
            handler(move |msg| {
                let pending = weak
                    .upgrade()
                    .map(|inner| f(ConverseTracker { inner }, msg));
                async move {
                    if let Some(fut) = pending {
                        fut.await;
                    }
                }
            }),
        );
    }

    fn emit_lifecycle(&self, topic: &str, skill_id: &str) {
        match self.inner.binding.get() {
            Some(binding) => binding
                .bus
                .emit(Message::from_value(topic, json!({ "skill_id": skill_id }))),
            None => debug!(topic, skill_id, "not bound to a bus, notification dropped"),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Snapshot of the active list, most recently active first.
    pub async fn active_handlers(&self) -> Vec<ActiveHandlerEntry> {
        self.inner.state.lock().await.active.entries().to_vec()
    }

    /// Last handler that accepted a converse turn.
    pub async fn last_conversed(&self) -> Option<String> {
        self.inner.state.lock().await.last_conversed.clone()
    }

    /// Whether `handler_id` may converse. Expires stale entries first.
    pub async fn is_active(&self, handler_id: &str) -> bool {
        self.expire_stale().await;
        self.inner.state.lock().await.active.contains(handler_id)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Move `handler_id` to the front of the list, stamped now, and emit
    /// `converse.skill.activated`.
    ///
    /// The notification may repeat for an already-active handler; it is
    /// level information. The empty id is rejected without any change.
    pub async fn promote(&self, handler_id: &str) -> bool {
        if handler_id.is_empty() {
            warn!("skill id was empty, not adding it to the active skills");
            return false;
        }
        let now = self.now();
        let mut state = self.inner.state.lock().await;
        state.active.promote(handler_id, now);

        debug!(skill_id = handler_id, "skill activated");
        self.emit_lifecycle(topics::SKILL_ACTIVATED, handler_id);
        true
    }

    /// Remove `handler_id` if tracked. Emits `converse.skill.deactivated`
    /// unless `mode` is `Silent`. Returns whether an entry was removed.
    pub async fn remove(&self, handler_id: &str, mode: RemovalMode) -> bool {
        let mut state = self.inner.state.lock().await;
        let removed = state.active.remove(handler_id).is_some();
        if removed {
            debug!(skill_id = handler_id, ?mode, "skill deactivated");
            if mode == RemovalMode::Notify {
                self.emit_lifecycle(topics::SKILL_DEACTIVATED, handler_id);
            }
        }
        removed
    }

    /// Drop every entry idle for longer than the converse window and
    /// announce each removal. Returns the removed ids.
    pub async fn expire_stale(&self) -> Vec<String> {
        let now = self.now();
        let window = self.inner.config.converse_window();
        let mut state = self.inner.state.lock().await;
        let expired = state.active.expire(now, window);

        expired
            .into_iter()
            .map(|entry| {
                debug!(
                    skill_id = %entry.handler_id,
                    idle_secs = entry.elapsed(now).num_seconds(),
                    "skill expired"
                );
                self.emit_lifecycle(topics::SKILL_DEACTIVATED, &entry.handler_id);
                entry.handler_id
            })
            .collect()
    }

    /// Reconcile with the intent service's list of active handlers.
    ///
    /// A timestamped reply replaces the local list. An id-only reply fills
    /// gaps and drops ids it does not list, keeping local timestamps for
    /// ids both sides know. `None` when unbound or the query failed; the
    /// local list is then left untouched.
    pub async fn sync_with_active_handlers(&self) -> Option<MergeOutcome> {
        let Some(binding) = self.inner.binding.get() else {
            debug!("not bound to a bus, skipping sync");
            return None;
        };
        let snapshot = binding.intents.get_active_skills().await?;

        let now = self.now();
        let mut state = self.inner.state.lock().await;
        let (merged, outcome) = merge(&state.active, &snapshot, now);
        state.active = merged;

        for id in &outcome.activated {
            self.emit_lifecycle(topics::SKILL_ACTIVATED, id);
        }
        for id in &outcome.deactivated {
            self.emit_lifecycle(topics::SKILL_DEACTIVATED, id);
        }
        drop(state);
        debug!(
            replaced = outcome.replaced,
            activated = outcome.activated.len(),
            deactivated = outcome.deactivated.len(),
            "synced active skills with intent service"
        );
        Some(outcome)
    }

    // ── Bus event handlers ───────────────────────────────────────────

    /// `active_skill_request`: the handler is about to run.
    pub async fn handle_activate_request(&self, message: Message) {
        let skill_id = match message.parse_data::<ActivateRequest>() {
            Ok(request) => request.skill_id,
            Err(e) => {
                warn!(error = %e, "malformed active skill request");
                String::new()
            }
        };
        self.promote(&skill_id).await;
    }

    /// `skill.converse.response`.
    pub async fn handle_converse_response(&self, message: Message) {
        let response = match message.parse_data::<ConverseResponse>() {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "malformed converse response");
                return;
            }
        };
        let skill_id = response.skill_id.as_str();
        if skill_id.is_empty() {
            warn!("converse response without skill id");
            return;
        }

        if let Some(error) = &response.error {
            if response.handler_not_found() {
                self.remove(skill_id, RemovalMode::Notify).await;
            } else {
                debug!(skill_id, %error, "converse error ignored");
            }
            return;
        }

        let now = self.now();
        if response.accepted() {
            // Acceptance implies recent engagement, so a missing entry means
            // an activation was missed. `now` is the real timestamp here.
            let mut state = self.inner.state.lock().await;
            state.last_conversed = Some(skill_id.to_owned());
            if !state.active.contains(skill_id) && state.active.promote(skill_id, now) {
                warn!(skill_id, "accepted converse from untracked skill, activated");
                self.emit_lifecycle(topics::SKILL_ACTIVATED, skill_id);
            }
        } else {
            // Declined: the handler is active but its last activity time is
            // unknown, so it must not jump ahead of anything tracked.
            let appended = self
                .inner
                .state
                .lock()
                .await
                .active
                .append_uncertain(skill_id, now);
            if appended {
                warn!(skill_id, "declined converse from untracked skill, appended at tail");
            }
        }
    }

    /// `mycroft.skill.handler.start`. The payload does not name the handler
    /// that started, so there is nothing to promote; utterance resolution and
    /// converse responses cover this transition instead.
    pub async fn handle_handler_start(&self, message: Message) {
        debug!(data = ?message.data, "intent handler started");
    }

    /// `recognizer_loop:utterance`: promote the handler the utterance is
    /// predicted to trigger, then expire stale entries.
    pub async fn handle_utterance(&self, message: Message) {
        let utterance = message
            .data
            .get("utterances")
            .and_then(Value::as_array)
            .and_then(|utterances| utterances.first())
            .and_then(Value::as_str);

        match (utterance, self.inner.binding.get()) {
            (Some(utterance), Some(binding)) => {
                if let Some(skill_id) = binding.intents.get_skill(utterance).await {
                    self.promote(&skill_id).await;
                }
            }
            (None, _) => warn!("utterance event without utterances"),
            (Some(_), None) => debug!("not bound to a bus, utterance not resolved"),
        }

        self.expire_stale().await;
    }
}
