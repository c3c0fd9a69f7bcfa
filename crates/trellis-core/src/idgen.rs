//! Random 128-bit entity identifiers.

use uuid::Uuid;

/// Generates a new entity id: 16 random bytes with the version-4 bits set,
/// rendered as a 32-character lowercase hex string without separators.
pub fn new_entity_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns `true` if `s` has the shape of an entity id.
pub fn is_entity_id(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_32_hex_chars() {
        let id = new_entity_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn ids_are_unique() {
        let a = new_entity_id();
        let b = new_entity_id();
        assert_ne!(a, b);
    }

    #[test]
    fn version_bits_set() {
        let id = new_entity_id();
        // Hex digit 13 carries the UUID version nibble.
        assert_eq!(id.as_bytes()[12], b'4');
    }

    #[test]
    fn is_entity_id_accepts_generated() {
        assert!(is_entity_id(&new_entity_id()));
    }

    #[test]
    fn is_entity_id_rejects_bad_shapes() {
        assert!(!is_entity_id("short"));
        assert!(!is_entity_id("g0000000000000000000000000000000"));
        assert!(!is_entity_id(&new_entity_id().to_uppercase()));
    }
}
