//! Time-ordered, lexicographically sortable identifiers for lore rows.
//!
//! A ULID (48-bit millisecond timestamp + 80 bits of randomness, Crockford
//! base32 encoded to a fixed 26 characters) via the `ulid` crate rather than
//! a hand-rolled encoder.

use ulid::Ulid;

pub fn new_lore_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_26_chars_and_sort_by_time() {
        let a = new_lore_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_lore_id();
        assert_eq!(a.len(), 26);
        assert_eq!(b.len(), 26);
        assert!(a < b, "ids should sort lexicographically by creation time");
    }

    #[test]
    fn ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(new_lore_id()));
        }
    }
}
