//! Flow identifier generation and validation of externally supplied ids.

use uuid::Uuid;

/// Longest externally supplied flow id that is accepted verbatim.
pub const MAX_FLOW_ID_LEN: usize = 256;

/// Generates a new flow identifier (UUID v4, hyphenated).
///
/// Unique enough to correlate log lines across the process lifetime; not
/// intended as a secret.
#[must_use]
pub fn generate_flow_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accepts an inbound correlation id verbatim when it is non-empty and at
/// most [`MAX_FLOW_ID_LEN`] bytes. The content is otherwise opaque: spaces
/// and punctuation are kept as the caller sent them.
#[must_use]
pub fn accept_external_id(candidate: &str) -> Option<&str> {
    let valid = !candidate.is_empty() && candidate.len() <= MAX_FLOW_ID_LEN;
    valid.then_some(candidate)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generates_non_empty_ids() {
        assert!(!generate_flow_id().is_empty());
    }

    #[test]
    fn hundred_ids_are_distinct() {
        let ids: HashSet<String> = (0..100).map(|_| generate_flow_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn generated_ids_are_acceptable_as_external_ids() {
        let id = generate_flow_id();
        assert_eq!(accept_external_id(&id), Some(id.as_str()));
    }

    #[test]
    fn rejects_empty_and_oversized_ids() {
        assert_eq!(accept_external_id(""), None);
        assert_eq!(accept_external_id(&"a".repeat(MAX_FLOW_ID_LEN + 1)), None);
    }

    #[test]
    fn keeps_ids_with_spaces_and_tabs() {
        assert_eq!(accept_external_id("client trace 42"), Some("client trace 42"));
        assert_eq!(accept_external_id("tab\there"), Some("tab\there"));
    }

    #[test]
    fn accepts_custom_ids_verbatim() {
        assert_eq!(accept_external_id("custom-id-1"), Some("custom-id-1"));
        let longest = "x".repeat(MAX_FLOW_ID_LEN);
        assert_eq!(accept_external_id(&longest), Some(longest.as_str()));
    }
}
