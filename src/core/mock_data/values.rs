//! Per-type value generation and conformance checks.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::core::tree::{Field, FieldType};

/// Dates and datetimes are drawn from this many days back from now.
pub const RECENT_DAYS: i64 = 180;

const FIRST_NAMES: &[&str] = &[
    "Ada", "Grace", "Linus", "Margaret", "Alan", "Barbara", "Ken", "Radia", "Dennis", "Frances",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Hopper", "Torvalds", "Hamilton", "Turing", "Liskov", "Thompson", "Perlman",
    "Ritchie", "Allen",
];
const ADJECTIVES: &[&str] = &[
    "Quarterly", "Urgent", "Annual", "Weekly", "Internal", "Shared", "Pending", "Primary",
];
const NOUNS: &[&str] = &[
    "report", "review", "update", "plan", "launch", "audit", "sync", "migration", "rollout",
];
const WORDS: &[&str] = &[
    "follow", "up", "with", "the", "team", "about", "next", "steps", "for", "release", "and",
    "confirm", "budget", "timeline", "details",
];

fn pick<'a, R: Rng>(rng: &mut R, items: &[&'a str]) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn sentence<R: Rng>(rng: &mut R, words: usize) -> String {
    let body: Vec<&str> = (0..words).map(|_| pick(rng, WORDS)).collect();
    let mut text = body.join(" ");
    if let Some(first) = text.get(..1) {
        text = format!("{}{}.", first.to_uppercase(), &text[1..]);
    }
    text
}

fn string_value<R: Rng>(rng: &mut R, entity: &str, field: &str, index: usize) -> String {
    let lower = field.to_lowercase();
    if lower.contains("name") && !lower.contains("user") {
        return format!("{} {}", pick(rng, FIRST_NAMES), pick(rng, LAST_NAMES));
    }
    if lower.contains("phone") {
        return format!("+1-555-{:04}", rng.gen_range(0..10_000));
    }
    if lower.contains("url") || lower.contains("website") {
        return format!("https://example.com/{}/{}", entity, index + 1);
    }
    if lower.contains("title") || lower.contains("subject") || lower.contains("label") {
        return format!("{} {}", pick(rng, ADJECTIVES), pick(rng, NOUNS));
    }
    format!("{} {} {}", entity, field, index + 1)
}

fn number_value<R: Rng>(rng: &mut R, field: &str) -> Value {
    let lower = field.to_lowercase();
    if ["price", "amount", "total", "cost", "salary", "budget"]
        .iter()
        .any(|k| lower.contains(k))
    {
        let cents: i64 = rng.gen_range(1_000..100_000);
        return Value::from(cents as f64 / 100.0);
    }
    if ["quantity", "count", "qty", "stock"].iter().any(|k| lower.contains(k)) {
        return Value::from(rng.gen_range(1..100));
    }
    if lower.contains("priority") || lower.contains("rating") {
        return Value::from(rng.gen_range(1..=5));
    }
    Value::from(rng.gen_range(1..1_000))
}

/// A plausible value for `field` on record `index` of `entity`.
pub fn generate<R: Rng>(rng: &mut R, entity: &str, field: &Field, index: usize) -> Value {
    let now = Utc::now();
    match field.kind {
        FieldType::String => Value::from(string_value(rng, entity, &field.name, index)),
        FieldType::Number => number_value(rng, &field.name),
        FieldType::Boolean => Value::from(rng.gen_bool(0.5)),
        FieldType::Select => match field.options.as_deref() {
            Some(options) if !options.is_empty() => options
                .choose(rng)
                .map(|o| Value::from(o.as_str()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        FieldType::Date => {
            let days = rng.gen_range(0..RECENT_DAYS);
            let date = (now - Duration::days(days)).date_naive();
            Value::from(date.format("%Y-%m-%d").to_string())
        }
        FieldType::Datetime => {
            let secs = rng.gen_range(0..RECENT_DAYS * 86_400);
            let at = now - Duration::seconds(secs);
            Value::from(at.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        FieldType::Text => {
            let words = rng.gen_range(6..14);
            Value::from(sentence(rng, words))
        }
        FieldType::Email => {
            let first = pick(rng, FIRST_NAMES).to_lowercase();
            let last = pick(rng, LAST_NAMES).to_lowercase();
            Value::from(format!("{}.{}{}@example.com", first, last, index + 1))
        }
        FieldType::Password => {
            let secret: String = (0..12).map(|_| rng.sample(Alphanumeric) as char).collect();
            Value::from(secret)
        }
        FieldType::File => Value::from(format!("files/{}-{}.pdf", entity, index + 1)),
    }
}

/// Whether `value` is acceptable for `field`, ignoring foreign-key integrity.
pub fn conforms(field: &Field, value: &Value) -> bool {
    if value.is_null() {
        return !field.required;
    }
    match field.kind {
        FieldType::String | FieldType::Text | FieldType::Password | FieldType::File => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Select => match (value.as_str(), field.options.as_deref()) {
            (Some(v), Some(options)) => options.iter().any(|o| o == v),
            _ => false,
        },
        FieldType::Date => value
            .as_str()
            .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        FieldType::Datetime => value
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
        FieldType::Email => value.as_str().is_some_and(|s| s.contains('@')),
    }
}
