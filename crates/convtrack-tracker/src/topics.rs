//! Bus topic names.

// ─── Consumed ────────────────────────────────────────────────────────

/// A handler bumped itself to the top of the active list.
pub const ACTIVE_SKILL_REQUEST: &str = "active_skill_request";
/// Authoritative answer to a converse offer.
pub const CONVERSE_RESPONSE: &str = "skill.converse.response";
/// An intent handler started running. Payload does not name the handler.
pub const HANDLER_START: &str = "mycroft.skill.handler.start";
/// A new utterance was recognized.
pub const UTTERANCE: &str = "recognizer_loop:utterance";

// ─── Produced ────────────────────────────────────────────────────────

pub const SKILL_ACTIVATED: &str = "converse.skill.activated";
pub const SKILL_DEACTIVATED: &str = "converse.skill.deactivated";

// ─── Intent service request/reply pairs ──────────────────────────────

pub const INTENT_GET: &str = "intent.service.intent.get";
pub const INTENT_REPLY: &str = "intent.service.intent.reply";
pub const ADAPT_INTENT_GET: &str = "intent.service.adapt.get";
pub const ADAPT_INTENT_REPLY: &str = "intent.service.adapt.reply";
pub const PADATIOUS_INTENT_GET: &str = "intent.service.padatious.get";
pub const PADATIOUS_INTENT_REPLY: &str = "intent.service.padatious.reply";
pub const SKILLS_GET: &str = "intent.service.skills.get";
pub const SKILLS_REPLY: &str = "intent.service.skills.reply";
pub const ACTIVE_SKILLS_GET: &str = "intent.service.active_skills.get";
pub const ACTIVE_SKILLS_REPLY: &str = "intent.service.active_skills.reply";
pub const ADAPT_MANIFEST_GET: &str = "intent.service.adapt.manifest.get";
pub const ADAPT_MANIFEST_REPLY: &str = "intent.service.adapt.manifest";
pub const PADATIOUS_MANIFEST_GET: &str = "intent.service.padatious.manifest.get";
pub const PADATIOUS_MANIFEST_REPLY: &str = "intent.service.padatious.manifest";
pub const VOCAB_MANIFEST_GET: &str = "intent.service.adapt.vocab.manifest.get";
pub const VOCAB_MANIFEST_REPLY: &str = "intent.service.adapt.vocab.manifest";
pub const ENTITIES_MANIFEST_GET: &str = "intent.service.padatious.entities.manifest.get";
pub const ENTITIES_MANIFEST_REPLY: &str = "intent.service.padatious.entities.manifest";
