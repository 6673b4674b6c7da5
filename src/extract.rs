//! Structured-field extraction from raw provider payloads.
//!
//! The production extractor is LLM-backed and lives outside this crate; it
//! plugs in behind [`Extractor`]. The core only checks structural shape
//! (a non-empty title), never the semantic quality of what comes back.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{ActionableItem, IntegrationKey, PriorityHint};
use crate::util::truncate_chars;

/// Maximum task title length, matching the task creation bound.
pub const MAX_TITLE_CHARS: usize = 280;

const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Provider-neutral raw payload handed to the extractor.
#[derive(Debug, Clone, Default)]
pub struct RawSignal {
    pub source_reference: String,
    pub subject: String,
    pub body: String,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    /// Priority already known from the provider (e.g. Linear priority).
    pub provider_priority: Option<PriorityHint>,
}

/// Fields the extractor derives from a raw signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub title: String,
    pub description: Option<String>,
    pub priority_hint: Option<PriorityHint>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Extraction produced no title for {0}")]
    EmptyTitle(String),
    #[error("Extraction service failed: {0}")]
    Service(String),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, raw: &RawSignal) -> Result<ExtractedFields, ExtractError>;
}

/// Build an item for `key` from a raw signal, enforcing structural shape.
///
/// Returns `Ok(None)` when the extractor produced no usable title so the
/// caller can skip the signal without failing the whole poll.
pub async fn build_item(
    extractor: &dyn Extractor,
    key: &IntegrationKey,
    raw: &RawSignal,
) -> Result<Option<ActionableItem>, ExtractError> {
    let fields = match extractor.extract(raw).await {
        Ok(fields) => fields,
        Err(ExtractError::EmptyTitle(reference)) => {
            log::debug!("Extract: skipping {} for {}: empty title", reference, key);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let title = truncate_chars(fields.title.trim(), MAX_TITLE_CHARS);
    if title.is_empty() {
        log::debug!(
            "Extract: skipping {} for {}: empty title",
            raw.source_reference,
            key
        );
        return Ok(None);
    }

    let mut item = ActionableItem::new(key, &raw.source_reference, &title)
        .with_description(fields.description)
        .with_priority_hint(fields.priority_hint)
        .with_due_date(fields.due_date.or(raw.due_date));
    if let Some(received_at) = raw.received_at {
        item = item.with_received_at(received_at);
    }
    if let Some(ref sender) = raw.sender {
        item = item.with_metadata("sender", sender.clone());
    }
    Ok(Some(item))
}

/// Keyword-based extractor used when no extraction service is configured.
#[derive(Debug, Clone, Default)]
pub struct HeuristicExtractor;

/// Words that mark a signal as urgent.
const URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "immediately",
    "action required",
    "deadline",
    "overdue",
    "eod",
];

/// Words that mark a signal as low priority.
const LOW_KEYWORDS: &[&str] = &["fyi", "no action needed", "newsletter", "digest"];

impl HeuristicExtractor {
    fn title_for(raw: &RawSignal) -> String {
        let subject = raw.subject.trim();
        if !subject.is_empty() {
            return strip_reply_prefixes(subject).to_string();
        }
        raw.body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
            .to_string()
    }

    fn priority_for(raw: &RawSignal) -> Option<PriorityHint> {
        if raw.provider_priority.is_some() {
            return raw.provider_priority;
        }
        let haystack = format!("{} {}", raw.subject, raw.body).to_lowercase();
        if URGENT_KEYWORDS.iter().any(|k| haystack.contains(k)) {
            Some(PriorityHint::High)
        } else if LOW_KEYWORDS.iter().any(|k| haystack.contains(k)) {
            Some(PriorityHint::Low)
        } else {
            None
        }
    }
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    async fn extract(&self, raw: &RawSignal) -> Result<ExtractedFields, ExtractError> {
        let title = Self::title_for(raw);
        if title.is_empty() {
            return Err(ExtractError::EmptyTitle(raw.source_reference.clone()));
        }
        let body = raw.body.trim();
        let description = if body.is_empty() {
            None
        } else {
            Some(truncate_chars(body, MAX_DESCRIPTION_CHARS))
        };
        Ok(ExtractedFields {
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            description,
            priority_hint: Self::priority_for(raw),
            due_date: raw.due_date,
        })
    }
}

/// Drop leading `Re:` / `Fwd:` markers from an email subject.
fn strip_reply_prefixes(subject: &str) -> &str {
    let mut rest = subject;
    loop {
        let lowered = rest.to_ascii_lowercase();
        let cut = ["re:", "fw:", "fwd:"]
            .iter()
            .find(|p| lowered.starts_with(*p))
            .map(|p| p.len());
        match cut {
            Some(n) => rest = rest[n..].trim_start(),
            None => return rest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderType;

    fn raw(subject: &str, body: &str) -> RawSignal {
        RawSignal {
            source_reference: "msg-1".to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_heuristic_uses_subject_without_reply_prefix() {
        let fields = HeuristicExtractor
            .extract(&raw("Re: Fwd: Contract review", "Please look"))
            .await
            .unwrap();
        assert_eq!(fields.title, "Contract review");
        assert_eq!(fields.description.as_deref(), Some("Please look"));
    }

    #[tokio::test]
    async fn test_heuristic_falls_back_to_body() {
        let fields = HeuristicExtractor
            .extract(&raw("  ", "\n\n  Call the vendor back\nthanks"))
            .await
            .unwrap();
        assert_eq!(fields.title, "Call the vendor back");
    }

    #[tokio::test]
    async fn test_heuristic_priority_keywords() {
        let urgent = HeuristicExtractor
            .extract(&raw("URGENT: sign order form", ""))
            .await
            .unwrap();
        assert_eq!(urgent.priority_hint, Some(PriorityHint::High));

        let low = HeuristicExtractor
            .extract(&raw("Weekly digest", ""))
            .await
            .unwrap();
        assert_eq!(low.priority_hint, Some(PriorityHint::Low));

        let mut with_provider = raw("urgent", "");
        with_provider.provider_priority = Some(PriorityHint::Low);
        let fields = HeuristicExtractor.extract(&with_provider).await.unwrap();
        assert_eq!(fields.priority_hint, Some(PriorityHint::Low));
    }

    #[tokio::test]
    async fn test_build_item_skips_empty_signal() {
        let key = IntegrationKey::new(ProviderType::Gmail, "personal");
        let item = build_item(&HeuristicExtractor, &key, &raw("", "   "))
            .await
            .unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_build_item_tags_identity() {
        let key = IntegrationKey::new(ProviderType::Gmail, "work");
        let mut signal = raw("Budget approval", "");
        signal.sender = Some("cfo@example.com".to_string());
        let item = build_item(&HeuristicExtractor, &key, &signal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.account_id, "work");
        assert_eq!(item.provider_type, ProviderType::Gmail);
        assert_eq!(item.source_reference, "msg-1");
        assert_eq!(item.metadata.get("sender").and_then(|v| v.as_str()), Some("cfo@example.com"));
    }
}
