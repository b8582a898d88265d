//! UUID v7 utilities for time-ordered identifiers.
//!
//! Event ids, broker delivery ids and WebSocket session ids are UUIDv7 so
//! that lexical order of their text form follows creation order.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use kindred_core::uuid_utils::new_v7;
///
/// assert_eq!(new_v7().get_version_num(), 7);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v7_ordering() {
        let first = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = new_v7();
        assert!(first.to_string() < second.to_string());
    }
}
