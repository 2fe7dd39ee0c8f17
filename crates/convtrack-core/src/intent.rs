//! Shaping of intent-service replies: which handler an intent belongs to,
//! and the vocabulary/regex/entity manifests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Intent-name fields that carry a `handler_id:` prefix, in lookup order.
/// `intent_name` (padatious and adapt), `name` (padatious), `intent_type`
/// (adapt).
const MUNGED_NAME_FIELDS: [&str; 3] = ["intent_name", "name", "intent_type"];

/// Derive the handler an intent match belongs to.
///
/// An explicit non-empty `skill_id` wins. Otherwise the handler is the part
/// before the first `:` of the first munged intent name present.
pub fn handler_from_intent(intent: &Value) -> Option<String> {
    if let Some(id) = intent.get("skill_id").and_then(Value::as_str) {
        if !id.is_empty() {
            return Some(id.to_owned());
        }
    }
    MUNGED_NAME_FIELDS
        .iter()
        .filter_map(|field| intent.get(*field).and_then(Value::as_str))
        .find(|name| !name.is_empty())
        .and_then(|name| name.split(':').next())
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_owned)
}

// ─── Manifests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabEntry {
    pub name: String,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexEntry {
    pub name: String,
    pub regexes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub name: String,
    pub samples: Vec<String>,
}

/// Append `sample` to the group `name`, creating it in first-seen order.
fn push_grouped(groups: &mut Vec<(String, Vec<String>)>, name: &str, sample: String) {
    match groups.iter_mut().find(|(n, _)| n == name) {
        Some((_, samples)) => samples.push(sample),
        None => groups.push((name.to_owned(), vec![sample])),
    }
}

fn has_regex(voc: &Value) -> bool {
    voc.get("regex")
        .is_some_and(|r| !r.is_null() && r.as_str() != Some("") && r != &Value::Bool(false))
}

/// Group plain (non-regex) adapt vocabulary by keyword type (`end`),
/// collecting each `start` as a sample.
pub fn vocab_manifest(vocab: &[Value]) -> Vec<VocabEntry> {
    let mut groups = Vec::new();
    for voc in vocab.iter().filter(|v| !has_regex(v)) {
        let (Some(end), Some(start)) = (
            voc.get("end").and_then(Value::as_str),
            voc.get("start").and_then(Value::as_str),
        ) else {
            continue;
        };
        push_grouped(&mut groups, end, start.to_owned());
    }
    groups
        .into_iter()
        .map(|(name, samples)| VocabEntry { name, samples })
        .collect()
}

/// Name of the last named capture group in an adapt regex, e.g.
/// `Location` for `in (?P<Location>.*)`.
pub fn regex_group_name(regex: &str) -> &str {
    let tail = regex.rsplit("(?P<").next().unwrap_or(regex);
    tail.split('>').next().unwrap_or(tail)
}

/// Group adapt regex vocabulary by captured entity name.
pub fn regex_manifest(vocab: &[Value]) -> Vec<RegexEntry> {
    let mut groups = Vec::new();
    for regex in vocab
        .iter()
        .filter(|v| has_regex(v))
        .filter_map(|v| v.get("regex").and_then(Value::as_str))
    {
        push_grouped(&mut groups, regex_group_name(regex), regex.to_owned());
    }
    groups
        .into_iter()
        .map(|(name, regexes)| RegexEntry { name, regexes })
        .collect()
}

/// Samples from a padatious `.entity` file: parentheses stripped, split on
/// lines and `|` alternatives, trimmed, blanks dropped.
pub fn parse_entity_samples(contents: &str) -> Vec<String> {
    contents
        .replace(['(', ')'], "")
        .lines()
        .flat_map(|line| line.split('|'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_skill_id_wins() {
        let intent = json!({"skill_id": "weather", "intent_type": "other:Forecast"});
        assert_eq!(handler_from_intent(&intent).as_deref(), Some("weather"));
    }

    #[test]
    fn prefix_of_intent_name() {
        let intent = json!({"intent_name": "timer-skill:start.timer.intent"});
        assert_eq!(handler_from_intent(&intent).as_deref(), Some("timer-skill"));
    }

    #[test]
    fn prefix_of_adapt_intent_type() {
        let intent = json!({"skill_id": "", "intent_type": "news:NewsIntent"});
        assert_eq!(handler_from_intent(&intent).as_deref(), Some("news"));
    }

    #[test]
    fn name_without_colon_is_whole_name() {
        let intent = json!({"name": "standalone"});
        assert_eq!(handler_from_intent(&intent).as_deref(), Some("standalone"));
    }

    #[test]
    fn no_identifying_field_is_none() {
        assert_eq!(handler_from_intent(&json!({"conf": 0.9})), None);
        assert_eq!(handler_from_intent(&json!({"intent_type": ":Orphan"})), None);
        assert_eq!(handler_from_intent(&Value::Null), None);
    }

    #[test]
    fn vocab_grouped_by_end_in_first_seen_order() {
        let vocab = vec![
            json!({"start": "weather", "end": "WeatherKeyword"}),
            json!({"start": "time", "end": "TimeKeyword"}),
            json!({"start": "forecast", "end": "WeatherKeyword"}),
            json!({"regex": "in (?P<Location>.*)"}),
        ];
        assert_eq!(
            vocab_manifest(&vocab),
            vec![
                VocabEntry {
                    name: "WeatherKeyword".into(),
                    samples: vec!["weather".into(), "forecast".into()],
                },
                VocabEntry {
                    name: "TimeKeyword".into(),
                    samples: vec!["time".into()],
                },
            ]
        );
    }

    #[test]
    fn regex_grouped_by_capture_name() {
        let vocab = vec![
            json!({"start": "weather", "end": "WeatherKeyword"}),
            json!({"regex": "in (?P<Location>.*)"}),
            json!({"regex": "at (?P<Location>\\w+)"}),
            json!({"regex": "for (?P<Duration>\\d+ minutes)"}),
        ];
        let manifest = regex_manifest(&vocab);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].name, "Location");
        assert_eq!(manifest[0].regexes.len(), 2);
        assert_eq!(manifest[1].name, "Duration");
    }

    #[test]
    fn regex_group_name_without_group_is_whole_regex() {
        assert_eq!(regex_group_name("plain"), "plain");
    }

    #[test]
    fn regex_with_several_groups_uses_the_last() {
        let regex = "from (?P<Origin>\\w+) to (?P<Destination>\\w+)";
        assert_eq!(regex_group_name(regex), "Destination");

        let manifest = regex_manifest(&[json!({"regex": regex})]);
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].name, "Destination");
    }

    #[test]
    fn entity_samples_split_and_trimmed() {
        let contents = "(new york|boston)\n  paris \n\n(lisbon | porto)|";
        assert_eq!(
            parse_entity_samples(contents),
            vec!["new york", "boston", "paris", "lisbon", "porto"]
        );
    }
}
