//! Intent service query client.
//!
//! Every call is a bus request bounded by the configured timeout. Failures
//! never propagate: a timeout, an empty reply or a malformed field is
//! logged and surfaces as `None`. Calls share no state, so they are safe
//! to issue concurrently.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use convtrack_bus::{Message, Transport};
use convtrack_core::ActiveHandlersSnapshot;
use convtrack_core::config::{DEFAULT_LANG, DEFAULT_QUERY_TIMEOUT_SECS};
use convtrack_core::intent::{
    EntityEntry, RegexEntry, VocabEntry, handler_from_intent, parse_entity_samples,
    regex_manifest, vocab_manifest,
};

use crate::topics;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentManifest {
    pub adapt: Option<Vec<Value>>,
    pub padatious: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordsManifest {
    pub adapt: Option<Vec<VocabEntry>>,
    pub padatious: Option<Vec<EntityEntry>>,
    pub regex: Option<Vec<RegexEntry>>,
}

#[derive(Clone)]
pub struct IntentQueryApi {
    bus: Arc<dyn Transport>,
    timeout: Duration,
    lang: String,
}

impl std::fmt::Debug for IntentQueryApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentQueryApi")
            .field("timeout", &self.timeout)
            .field("lang", &self.lang)
            .finish_non_exhaustive()
    }
}

impl IntentQueryApi {
    pub fn new(bus: Arc<dyn Transport>) -> Self {
        Self {
            bus,
            timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            lang: DEFAULT_LANG.to_owned(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ── Plumbing ─────────────────────────────────────────────────────

    async fn query(
        &self,
        request_topic: &str,
        reply_topic: &str,
        data: Map<String, Value>,
    ) -> Option<Map<String, Value>> {
        let request = Message::new(request_topic, data)
            .with_context("destination", "intent_service")
            .with_context("source", "intent_api");

        match self
            .bus
            .wait_for_response(request, reply_topic, self.timeout)
            .await
        {
            Ok(reply) if reply.data.is_empty() => {
                error!(reply_topic, "intent service sent an empty reply");
                None
            }
            Ok(reply) => Some(reply.data),
            Err(e) => {
                error!(reply_topic, error = %e, "intent service timed out");
                None
            }
        }
    }

    /// Query and take one field of the reply. A missing field is malformed
    /// (warn); an explicit `null` is a legitimate "nothing" (debug).
    async fn query_field(
        &self,
        request_topic: &str,
        reply_topic: &str,
        data: Map<String, Value>,
        field: &str,
    ) -> Option<Value> {
        let mut reply = self.query(request_topic, reply_topic, data).await?;
        match reply.remove(field) {
            None => {
                warn!(reply_topic, field, "intent service reply missing field");
                None
            }
            Some(Value::Null) => {
                debug!(reply_topic, field, "intent service reply field is null");
                None
            }
            Some(value) => Some(value),
        }
    }

    async fn query_list(
        &self,
        request_topic: &str,
        reply_topic: &str,
        field: &str,
    ) -> Option<Vec<Value>> {
        match self
            .query_field(request_topic, reply_topic, Map::new(), field)
            .await?
        {
            Value::Array(items) => Some(items),
            other => {
                warn!(reply_topic, field, kind = %json_kind(&other), "expected a list");
                None
            }
        }
    }

    fn utterance_data(&self, utterance: &str) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("utterance".to_owned(), json!(utterance));
        data.insert("lang".to_owned(), json!(self.lang));
        data
    }

    // ── Intents ──────────────────────────────────────────────────────

    /// Best intent for `utterance` across all engines.
    pub async fn get_intent(&self, utterance: &str) -> Option<Value> {
        self.query_field(
            topics::INTENT_GET,
            topics::INTENT_REPLY,
            self.utterance_data(utterance),
            "intent",
        )
        .await
    }

    pub async fn get_adapt_intent(&self, utterance: &str) -> Option<Value> {
        self.query_field(
            topics::ADAPT_INTENT_GET,
            topics::ADAPT_INTENT_REPLY,
            self.utterance_data(utterance),
            "intent",
        )
        .await
    }

    pub async fn get_padatious_intent(&self, utterance: &str) -> Option<Value> {
        self.query_field(
            topics::PADATIOUS_INTENT_GET,
            topics::PADATIOUS_INTENT_REPLY,
            self.utterance_data(utterance),
            "intent",
        )
        .await
    }

    /// Handler that `utterance` would trigger.
    pub async fn get_skill(&self, utterance: &str) -> Option<String> {
        let intent = self.get_intent(utterance).await?;
        let handler = handler_from_intent(&intent);
        if handler.is_none() {
            warn!(%intent, "intent match names no handler");
        }
        handler
    }

    // ── Skills ───────────────────────────────────────────────────────

    pub async fn get_skills_manifest(&self) -> Option<Vec<Value>> {
        self.query_list(topics::SKILLS_GET, topics::SKILLS_REPLY, "skills")
            .await
    }

    /// Active handlers as the intent service sees them.
    pub async fn get_active_skills(&self) -> Option<ActiveHandlersSnapshot> {
        let skills = self
            .query_field(
                topics::ACTIVE_SKILLS_GET,
                topics::ACTIVE_SKILLS_REPLY,
                Map::new(),
                "skills",
            )
            .await?;
        let snapshot = ActiveHandlersSnapshot::from_wire(&skills);
        if snapshot.is_none() {
            warn!(%skills, "malformed active skills reply");
        }
        snapshot
    }

    /// Active handler ids only, most recent first.
    pub async fn get_active_skill_ids(&self) -> Option<Vec<String>> {
        let snapshot = self.get_active_skills().await?;
        Some(snapshot.ids().into_iter().map(str::to_owned).collect())
    }

    // ── Manifests ────────────────────────────────────────────────────

    pub async fn get_adapt_manifest(&self) -> Option<Vec<Value>> {
        self.query_list(
            topics::ADAPT_MANIFEST_GET,
            topics::ADAPT_MANIFEST_REPLY,
            "intents",
        )
        .await
    }

    pub async fn get_padatious_manifest(&self) -> Option<Vec<Value>> {
        self.query_list(
            topics::PADATIOUS_MANIFEST_GET,
            topics::PADATIOUS_MANIFEST_REPLY,
            "intents",
        )
        .await
    }

    pub async fn get_intent_manifest(&self) -> IntentManifest {
        let (adapt, padatious) =
            tokio::join!(self.get_adapt_manifest(), self.get_padatious_manifest());
        IntentManifest { adapt, padatious }
    }

    async fn get_vocab(&self) -> Option<Vec<Value>> {
        self.query_list(
            topics::VOCAB_MANIFEST_GET,
            topics::VOCAB_MANIFEST_REPLY,
            "vocab",
        )
        .await
    }

    pub async fn get_vocab_manifest(&self) -> Option<Vec<VocabEntry>> {
        self.get_vocab().await.map(|vocab| vocab_manifest(&vocab))
    }

    pub async fn get_regex_manifest(&self) -> Option<Vec<RegexEntry>> {
        self.get_vocab().await.map(|vocab| regex_manifest(&vocab))
    }

    /// Padatious entities with their samples read from the entity files.
    /// Entities whose file cannot be read are skipped.
    pub async fn get_entities_manifest(&self) -> Option<Vec<EntityEntry>> {
        let entities = self
            .query_list(
                topics::ENTITIES_MANIFEST_GET,
                topics::ENTITIES_MANIFEST_REPLY,
                "entities",
            )
            .await?;

        let mut manifest = Vec::with_capacity(entities.len());
        for entity in &entities {
            let (Some(name), Some(file_name)) = (
                entity.get("name").and_then(Value::as_str),
                entity.get("file_name").and_then(Value::as_str),
            ) else {
                warn!(%entity, "entity without name or file_name");
                continue;
            };
            match tokio::fs::read_to_string(file_name).await {
                Ok(contents) => manifest.push(EntityEntry {
                    name: name.to_owned(),
                    samples: parse_entity_samples(&contents),
                }),
                Err(e) => debug!(entity = name, file_name, error = %e, "entity file unreadable, skipped"),
            }
        }
        Some(manifest)
    }

    pub async fn get_keywords_manifest(&self) -> KeywordsManifest {
        let (adapt, padatious, regex) = tokio::join!(
            self.get_vocab_manifest(),
            self.get_entities_manifest(),
            self.get_regex_manifest(),
        );
        KeywordsManifest {
            adapt,
            padatious,
            regex,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
