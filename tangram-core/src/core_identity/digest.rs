//! One-way digests used to derive peer and room addresses.
//!
//! Digests are BLAKE3 hashes rendered in base58, optionally truncated.
//! Verification always re-hashes and compares; nothing is ever decrypted.

/// Length of the user-id segment in a room address.
pub(crate) const ROOM_USER_DIGEST_LEN: usize = 6;

/// Length of the room id segment in a room address.
pub(crate) const ROOM_ID_LEN: usize = 3;

/// Length of the password digest segment in a room address.
pub(crate) const PASSWORD_DIGEST_LEN: usize = 7;

/// Digest an arbitrary string into its base58 form.
pub fn digest(input: &str) -> String {
    let hash = blake3::hash(input.as_bytes());
    bs58::encode(hash.as_bytes()).into_string()
}

/// Digest truncated to at most `len` characters.
pub fn digest_truncated(input: &str, len: usize) -> String {
    let mut encoded = digest(input);
    encoded.truncate(len);
    encoded
}

/// Derive the wire identifier for a user.
pub fn digest_user_id(user_id: &str) -> String {
    digest(user_id)
}

/// Derive the password digest embedded in a room address.
///
/// An empty password yields an empty digest so that open rooms carry no
/// password segment at all.
pub fn digest_password(room_id: &str, password: &str) -> String {
    if password.is_empty() {
        return String::new();
    }
    digest_truncated(&format!("{}{}", room_id, password), PASSWORD_DIGEST_LEN)
}
