//! Routing keys and topic-pattern matching.

/// Routing keys used by the choreography.
pub mod topics {
    pub const ORDER_CREATED: &str = "order.created";
    pub const INVENTORY_LOCKED: &str = "inventory.locked";
    pub const INVENTORY_RESERVATION_FAILED: &str = "inventory.reservation_failed";
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
}

/// Matches a routing key against a topic binding pattern.
///
/// Words are separated by `.`; `*` matches exactly one word and `#` matches
/// zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((word, rest)) => match key.split_first() {
            Some((head, tail)) => (*word == "*" || word == head) && matches_words(rest, tail),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_keys_match() {
        assert!(topic_matches("order.created", "order.created"));
        assert!(!topic_matches("order.created", "order.updated"));
        assert!(!topic_matches("order.created", "order.created.v2"));
    }

    #[test]
    fn star_matches_one_word() {
        assert!(topic_matches("inventory.*", "inventory.locked"));
        assert!(topic_matches("inventory.*", "inventory.reservation_failed"));
        assert!(!topic_matches("inventory.*", "inventory"));
        assert!(!topic_matches("*.locked", "inventory.stock.locked"));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        assert!(topic_matches("#", "payment.completed"));
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("order.#", "order.created.retry"));
        assert!(topic_matches("#.completed", "payment.completed"));
        assert!(!topic_matches("order.#", "payment.completed"));
    }
}
