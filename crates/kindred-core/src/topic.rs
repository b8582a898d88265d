//! Topic routing keys and binding-pattern matching.
//!
//! Routing keys are dot-separated words: `tree.<treeId>.<eventType>`.
//! Binding patterns use the topic-exchange wildcards:
//!
//! - `*` matches exactly one word
//! - `#` matches zero or more words
//!
//! A tree id containing dots produces extra words; `tree.#` still matches it.

use crate::defaults::ROUTING_KEY_PREFIX;
use crate::events::EventType;

/// Build the routing key for an event on a tree.
pub fn routing_key(tree_id: &str, event_type: EventType) -> String {
    format!("{}.{}.{}", ROUTING_KEY_PREFIX, tree_id, event_type.as_str())
}

/// Returns true when `routing_key` is matched by the binding `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` absorbs 0..=key.len() words
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_format() {
        assert_eq!(
            routing_key("t1", EventType::TreeCreated),
            "tree.t1.TREE_CREATED"
        );
        assert_eq!(
            routing_key("4:abc:12", EventType::TreeStructureModified),
            "tree.4:abc:12.TREE_STRUCTURE_MODIFIED"
        );
    }

    #[test]
    fn test_hash_matches_any_suffix() {
        assert!(topic_matches("tree.#", "tree.t1.TREE_CREATED"));
        assert!(topic_matches("tree.#", "tree.t1"));
        assert!(topic_matches("tree.#", "tree"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("tree.#", "forest.t1.TREE_CREATED"));
    }

    #[test]
    fn test_star_matches_exactly_one_word() {
        assert!(topic_matches("tree.*", "tree.t1"));
        assert!(!topic_matches("tree.*", "tree.a.b"));
        assert!(!topic_matches("tree.*", "tree"));
        assert!(topic_matches("tree.*.TREE_DELETED", "tree.t9.TREE_DELETED"));
        assert!(!topic_matches("tree.*.TREE_DELETED", "tree.t9.TREE_CREATED"));
    }

    #[test]
    fn test_hash_in_middle() {
        assert!(topic_matches("tree.#.TREE_DELETED", "tree.TREE_DELETED"));
        assert!(topic_matches("tree.#.TREE_DELETED", "tree.a.b.TREE_DELETED"));
        assert!(!topic_matches("tree.#.TREE_DELETED", "tree.a.TREE_CREATED"));
    }

    #[test]
    fn test_literal_match() {
        assert!(topic_matches("tree.t1.TREE_CREATED", "tree.t1.TREE_CREATED"));
        assert!(!topic_matches("tree.t1.TREE_CREATED", "tree.t2.TREE_CREATED"));
    }
}
