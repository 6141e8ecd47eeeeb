//! NTAG424 key derivation.
//!
//! Keys are derived from the current calendar month, the key slot and the card
//! UID, so they can be recomputed at any time without storing a secret and they
//! rotate every month.

use chrono::{Datelike, Local};
use ring::digest::{SHA256, digest};

/// Length of an NTAG424 AES key in bytes.
pub const KEY_LENGTH: usize = 16;

/// Slot of the card master key, the only slot managed by the gateway.
pub const MASTER_KEY_SLOT: u8 = 0;

pub type Ntag424Key = [u8; KEY_LENGTH];

/// Factory key of a blank NTAG424 tag.
pub const DEFAULT_NTAG424_KEY: Ntag424Key = [0; KEY_LENGTH];

/// Derives the key for `key_no` of the card `card_uid`.
///
/// `month` is zero-based (January is `0`). The seed is the decimal month, the
/// decimal slot and the UID concatenated; the key is the first 16 bytes of its
/// SHA-256 digest.
pub fn derive_ntag424_key(month: u32, key_no: u8, card_uid: &str) -> Ntag424Key {
    let seed = format!("{month}{key_no}{card_uid}");
    let hash = digest(&SHA256, seed.as_bytes());

    let mut key = DEFAULT_NTAG424_KEY;
    key.copy_from_slice(&hash.as_ref()[..KEY_LENGTH]);
    key
}

/// Zero-based month of the local date, as used by [`derive_ntag424_key`].
pub fn current_month() -> u32 {
    Local::now().month0()
}

/// Derives the key for `key_no` of `card_uid` for the current month.
pub fn derive_current_key(key_no: u8, card_uid: &str) -> Ntag424Key {
    derive_ntag424_key(current_month(), key_no, card_uid)
}

/// Lowercase hex representation used on the wire and in card records.
pub fn key_to_hex(key: &Ntag424Key) -> String {
    hex::encode(key)
}

pub fn default_key_hex() -> String {
    key_to_hex(&DEFAULT_NTAG424_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_matches_reference_digest() {
        // sha256("00ABC123")[..16]
        let key = derive_ntag424_key(0, 0, "ABC123");
        assert_eq!(key_to_hex(&key), "40e190367808e2139e091efb560a9900");

        // sha256("110ABC123")[..16]
        let key = derive_ntag424_key(11, 0, "ABC123");
        assert_eq!(key_to_hex(&key), "89e9521309b661282d545be670fa7e27");
    }

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(
            derive_ntag424_key(4, 0, "04A1B2C3D4E5F6"),
            derive_ntag424_key(4, 0, "04A1B2C3D4E5F6")
        );
    }

    #[test]
    fn test_derive_changes_with_each_input() {
        let base = derive_ntag424_key(4, 0, "ABC123");
        assert_ne!(base, derive_ntag424_key(5, 0, "ABC123"));
        assert_ne!(base, derive_ntag424_key(4, 1, "ABC123"));
        assert_ne!(base, derive_ntag424_key(4, 0, "ABC124"));
    }

    #[test]
    fn test_default_key_hex() {
        assert_eq!(default_key_hex(), "0".repeat(32));
    }

    #[test]
    fn test_current_month_is_zero_based() {
        assert!(current_month() < 12);
    }
}
