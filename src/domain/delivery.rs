//! Classification of a backend response to a replayed mutation.

use serde_json::Value;

/// Structured error codes meaning "the mutation's effect already exists".
const ALREADY_APPLIED_CODES: &[&str] = &["CONFLICT", "DUPLICATE", "ALREADY_EXISTS"];

/// Fallback markers for backends that only report conflicts in prose.
const ALREADY_APPLIED_MARKERS: &[&str] = &["already exists", "duplicate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx: remove the item.
    Delivered,
    /// Conflict or duplicate: the server already holds the effect.
    AlreadyApplied,
    /// Structured validation failure: retrying the same payload cannot help.
    Rejected,
    /// Any other failure: retry on a later pass.
    Transient,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered | DeliveryOutcome::AlreadyApplied)
    }
}

pub fn classify_response(status: u16, body: &str) -> DeliveryOutcome {
    if (200..300).contains(&status) {
        return DeliveryOutcome::Delivered;
    }
    if status == 409 {
        return DeliveryOutcome::AlreadyApplied;
    }

    let parsed = serde_json::from_str::<Value>(body).ok();

    if let Some(code) = parsed.as_ref().and_then(error_code) {
        if ALREADY_APPLIED_CODES
            .iter()
            .any(|known| code.eq_ignore_ascii_case(known))
        {
            return DeliveryOutcome::AlreadyApplied;
        }
    }

    if (400..500).contains(&status) && parsed.as_ref().is_some_and(has_details) {
        return DeliveryOutcome::Rejected;
    }

    if mentions_existing_resource(parsed.as_ref(), body) {
        return DeliveryOutcome::AlreadyApplied;
    }

    DeliveryOutcome::Transient
}

fn error_code(value: &Value) -> Option<&str> {
    value
        .get("code")
        .or_else(|| value.get("error").and_then(|error| error.get("code")))
        .and_then(Value::as_str)
}

fn has_details(value: &Value) -> bool {
    match value.get("details") {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
        Some(_) => true,
    }
}

// Only message-like fields are inspected when the body is JSON, so a payload
// echo containing "duplicate" as data does not count.
fn mentions_existing_resource(parsed: Option<&Value>, raw: &str) -> bool {
    let text = match parsed {
        Some(value) => ["error", "message"]
            .iter()
            .filter_map(|field| value.get(*field).and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        None => raw.to_string(),
    };
    let lowered = text.to_ascii_lowercase();
    ALREADY_APPLIED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
