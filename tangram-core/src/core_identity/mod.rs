/*
    core_identity - Content-addressed peer and room identity

    Peers are addressed by one-way digests of their credentials, so real
    identities never cross the wire. A room address additionally embeds the
    room id, an encoded human-readable room name, and a truncated digest of
    the room password, letting peers discover and authenticate rooms without
    a registry service.
*/

mod digest;
mod peer_context;
mod session_state;

pub use digest::{digest, digest_password, digest_truncated, digest_user_id};
pub use peer_context::{PeerContext, PeerId};
pub use session_state::{SessionGrade, SessionState};
