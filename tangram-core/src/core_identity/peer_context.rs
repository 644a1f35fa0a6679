//! Peer addresses and the room-address format.
//!
//! A bare peer address is the full digest of its user id. A room address is
//! `<user digest, 6><room id, 3><encoded room name>-<password digest>`:
//! everything a joining peer needs to find a room and prove knowledge of its
//! password is embedded in the address itself.

use crate::core_identity::digest::{
    digest_password, digest_truncated, digest_user_id, PASSWORD_DIGEST_LEN, ROOM_ID_LEN,
    ROOM_USER_DIGEST_LEN,
};
use crate::core_identity::session_state::SessionState;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire identifier of a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

/// Everything locally known about one peer: its parsed address, credentials
/// (for the local peer only), and transport session state.
///
/// Created when a peer id is first observed, dropped when the peer
/// disconnects and nothing references it anymore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerContext {
    pub peer_id: PeerId,
    pub user_id: String,
    pub room_id: String,
    pub room_name: String,
    pub password: String,
    pub digest_user_id: String,
    pub digest_password: String,
    pub is_open: bool,
    pub session: SessionState,
}

impl PeerContext {
    /// Derive the address of a bare (roomless) peer from its user id.
    pub fn create(user_id: &str) -> Self {
        let digest_user_id = digest_user_id(user_id);
        let mut context = Self::parse(&PeerId::new(digest_user_id));
        context.user_id = user_id.to_string();
        context
    }

    /// Derive a room address. The room name travels inside the address in
    /// base58 form; the password only ever appears as a truncated digest.
    pub fn create_room(user_id: &str, room_id: &str, room_name: &str, password: &str) -> Self {
        let digest_user_id = digest_truncated(user_id, ROOM_USER_DIGEST_LEN);
        let digest_password = digest_password(room_id, password);
        let encoded_name = encode_room_name(room_name);
        let peer_id = format!(
            "{}{}{}-{}",
            digest_user_id, room_id, encoded_name, digest_password
        );

        let mut context = Self::parse(&PeerId::new(peer_id));
        context.user_id = user_id.to_string();
        context.password = password.to_string();
        context
    }

    /// Parse a peer id string. If it matches the room-address shape the room
    /// parts are extracted; otherwise the whole string is taken as a bare
    /// user digest.
    pub fn parse(peer_id: &PeerId) -> Self {
        let mut context = PeerContext {
            peer_id: peer_id.clone(),
            ..Default::default()
        };

        match parse_room_address(peer_id.as_str()) {
            Some(parts) => {
                context.digest_user_id = parts.digest_user_id;
                context.room_id = parts.room_id;
                context.room_name = parts.room_name;
                context.digest_password = parts.digest_password;
            }
            None => {
                context.digest_user_id = peer_id.as_str().to_string();
            }
        }
        context
    }

    pub fn is_room(&self) -> bool {
        !self.room_id.is_empty()
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty() || !self.digest_password.is_empty()
    }

    /// Check a password candidate against the digest embedded in the
    /// address. Re-hashes and compares; the real password never round-trips.
    pub fn verify_password(&self, candidate: &str) -> bool {
        digest_password(&self.room_id, candidate) == self.digest_password
    }

    /// Generate a random base62 identifier of the given length, used for
    /// fresh room ids.
    pub fn generate_id(len: usize) -> String {
        const ALPHABET: &[u8] =
            b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::rng();
        (0..len)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

struct RoomAddressParts {
    digest_user_id: String,
    room_id: String,
    room_name: String,
    digest_password: String,
}

fn is_address_word(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_room_address(peer_id: &str) -> Option<RoomAddressParts> {
    let (head, digest_password) = peer_id.split_once('-')?;
    if head.len() < ROOM_USER_DIGEST_LEN + ROOM_ID_LEN {
        return None;
    }
    if !is_address_word(head) || !is_address_word(digest_password) {
        return None;
    }
    if digest_password.len() > PASSWORD_DIGEST_LEN {
        return None;
    }

    let digest_user_id = &head[..ROOM_USER_DIGEST_LEN];
    let room_id = &head[ROOM_USER_DIGEST_LEN..ROOM_USER_DIGEST_LEN + ROOM_ID_LEN];
    let encoded_name = &head[ROOM_USER_DIGEST_LEN + ROOM_ID_LEN..];
    let room_name = decode_room_name(encoded_name)?;

    Some(RoomAddressParts {
        digest_user_id: digest_user_id.to_string(),
        room_id: room_id.to_string(),
        room_name,
        digest_password: digest_password.to_string(),
    })
}

fn encode_room_name(room_name: &str) -> String {
    bs58::encode(room_name.as_bytes()).into_string()
}

fn decode_room_name(encoded: &str) -> Option<String> {
    if encoded.is_empty() {
        return Some(String::new());
    }
    let bytes = bs58::decode(encoded).into_vec().ok()?;
    String::from_utf8(bytes).ok()
}
