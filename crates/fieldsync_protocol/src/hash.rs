//! Hash chain primitives.
//!
//! Every accepted change is linked to its predecessor:
//!
//! ```text
//! change_hash = SHA256(id ‖ tenant ‖ actor ‖ created_at ‖ object_name ‖ object_id ‖ canonical_patch)
//! state_hash  = SHA256(change_hash ‖ previous_state_hash)
//! ```
//!
//! Inputs are concatenated without delimiters and digests are lowercase hex.

use crate::error::{ProtocolError, ProtocolResult};
use sha2::{Digest, Sha256};

/// Chain head of a tenant with no accepted changes.
///
/// 68 zeros rather than 64. Deployed clients and servers compare against this
/// exact value, so it must not be "fixed" to the digest length.
pub const GENESIS_HASH: &str =
    "00000000000000000000000000000000000000000000000000000000000000000000";

const DIGEST_HEX_LEN: usize = 64;

/// Computes the content hash of a single change.
///
/// `canonical_patch` must already be canonical JSON (see [`crate::canonical_json`]).
pub fn change_hash(
    id: &str,
    tenant_id: &str,
    actor_id: &str,
    created_at: &str,
    object_name: &str,
    object_id: &str,
    canonical_patch: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        id,
        tenant_id,
        actor_id,
        created_at,
        object_name,
        object_id,
        canonical_patch,
    ] {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Combines a change hash with the previous chain head.
pub fn state_hash(change_hash: &str, previous_state_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(change_hash.as_bytes());
    hasher.update(previous_state_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true for a 64-char lowercase hex digest or the genesis value.
pub fn is_valid_hash(value: &str) -> bool {
    if value == GENESIS_HASH {
        return true;
    }
    value.len() == DIGEST_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Like [`is_valid_hash`], but as a `Result` for `?` call sites.
pub fn ensure_valid_hash(value: &str) -> ProtocolResult<&str> {
    if is_valid_hash(value) {
        Ok(value)
    } else {
        Err(ProtocolError::InvalidHash(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_change_hash(patch: &str) -> String {
        change_hash(
            "c-1",
            "tenant-a",
            "user-7",
            "2024-05-01T12:00:00.000Z",
            "job",
            "job-42",
            patch,
        )
    }

    #[test]
    fn genesis_is_sixty_eight_zeros() {
        assert_eq!(GENESIS_HASH.len(), 68);
        assert!(GENESIS_HASH.bytes().all(|b| b == b'0'));
    }

    #[test]
    fn sha256_of_empty_input() {
        let hash = change_hash("", "", "", "", "", "", "");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn concatenation_has_no_delimiters() {
        // Moving a byte across a field boundary yields the same input stream.
        let a = change_hash("ab", "c", "", "", "", "", "");
        let b = change_hash("a", "bc", "", "", "", "", "");
        assert_eq!(a, b);
    }

    #[test]
    fn state_hash_depends_on_previous() {
        let change = sample_change_hash(r#"{"status_note":"a"}"#);
        let from_genesis = state_hash(&change, GENESIS_HASH);
        let from_other = state_hash(&change, &from_genesis);
        assert_ne!(from_genesis, from_other);
        assert_eq!(from_genesis.len(), 64);
    }

    #[test]
    fn patch_change_alters_hash() {
        let a = state_hash(&sample_change_hash(r#"{"status_note":"a"}"#), GENESIS_HASH);
        let b = state_hash(&sample_change_hash(r#"{"status_note":"b"}"#), GENESIS_HASH);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_validation() {
        assert!(is_valid_hash(GENESIS_HASH));
        assert!(is_valid_hash(&state_hash("x", GENESIS_HASH)));
        assert!(!is_valid_hash(&"g".repeat(64)));
        assert!(!is_valid_hash(&"A".repeat(64)));
        assert!(!is_valid_hash("abc"));
        assert_eq!(ensure_valid_hash(GENESIS_HASH).unwrap(), GENESIS_HASH);
        assert!(matches!(
            ensure_valid_hash("abc"),
            Err(ProtocolError::InvalidHash(value)) if value == "abc"
        ));
    }

    proptest! {
        #[test]
        fn hashing_is_deterministic(id in ".*", tenant in ".*", patch in ".*") {
            let first = change_hash(&id, &tenant, "actor", "t", "job", "o", &patch);
            let second = change_hash(&id, &tenant, "actor", "t", "job", "o", &patch);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(state_hash(&first, GENESIS_HASH), state_hash(&second, GENESIS_HASH));
        }

        #[test]
        fn output_is_lowercase_hex(input in ".*") {
            let hash = state_hash(&input, GENESIS_HASH);
            prop_assert!(is_valid_hash(&hash));
        }
    }
}
