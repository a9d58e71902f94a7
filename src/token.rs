//! Token primitives shared by the CSRF middleware, the session store and auth.
//!
//! # One-time-pad masking
//!
//! A raw CSRF token never leaves the server as-is. Each render sends
//! `base64(key ++ (key XOR token))` with a fresh random `key` as long as the
//! token, so two renders of the same token look unrelated on the wire.
//! [`unmask`] reverses it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

/// Masks `token` with a fresh random pad of the same length.
pub fn mask(token: &[u8]) -> String {
    let mut key = vec![0u8; token.len()];
    rand::thread_rng().fill_bytes(&mut key);
    let cipher: Vec<u8> = key.iter().zip(token).map(|(k, t)| k ^ t).collect();
    key.extend_from_slice(&cipher);
    STANDARD.encode(key)
}

/// Recovers the token from a masked value.
///
/// `None` if the value is not base64 or its decoded length is odd (key and
/// ciphertext halves must be the same length).
pub fn unmask(masked: &str) -> Option<Vec<u8>> {
    let decoded = STANDARD.decode(masked).ok()?;
    if decoded.len() % 2 != 0 {
        return None;
    }
    let (key, cipher) = decoded.split_at(decoded.len() / 2);
    Some(key.iter().zip(cipher).map(|(k, c)| k ^ c).collect())
}

/// `n` random bytes, hex encoded (`2n` characters).
pub fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Equality whose running time depends only on the lengths of the inputs.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn unmask_inverts_mask(token in proptest::collection::vec(any::<u8>(), 0..128)) {
            prop_assert_eq!(unmask(&mask(&token)), Some(token));
        }
    }

    #[test]
    fn masking_is_randomised() {
        let token = random_hex(32);
        assert_ne!(mask(token.as_bytes()), mask(token.as_bytes()));
    }

    #[test]
    fn odd_or_garbage_values_do_not_unmask() {
        assert_eq!(unmask(&STANDARD.encode([1u8, 2, 3])), None);
        assert_eq!(unmask("not base64!"), None);
        assert_eq!(unmask(""), Some(Vec::new()));
    }

    #[test]
    fn random_hex_has_expected_shape() {
        let h = random_hex(32);
        assert_eq!(h.len(), 64);
        assert!(h.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn constant_time_eq_compares_contents() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
