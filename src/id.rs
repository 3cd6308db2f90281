//! Identifier minting and validation.
//!
//! Peer ids: `peer_` + 12 lowercase hex characters (6 random bytes).
//! Room ids: either a server-minted `room_` + 12 lowercase hex characters,
//! or a client-supplied short code (any printable, non-whitespace string of
//! length 3-64).

use rand::RngCore;

const PEER_PREFIX: &str = "peer_";
const ROOM_PREFIX: &str = "room_";

fn random_hex12() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Mint a new, process-unique peer id.
pub fn mint_peer_id() -> String {
    format!("{PEER_PREFIX}{}", random_hex12())
}

/// Mint a new, process-unique room id (server-generated form).
pub fn mint_room_id() -> String {
    format!("{ROOM_PREFIX}{}", random_hex12())
}

/// Validate a peer id's shape. Only used to gate client-supplied peer ids
/// (see §9 reconnection note); server-minted ids are always valid.
pub fn is_valid_peer_id(id: &str) -> bool {
    match id.strip_prefix(PEER_PREFIX) {
        Some(hex) => hex.len() == 12 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Validate a room id/key: either the server-minted `room_<hex12>` form, or
/// any printable, non-empty string of length 3-64 without control characters
/// or whitespace (the client-supplied short-code surface).
pub fn is_valid_room_id(id: &str) -> bool {
    if id.strip_prefix(ROOM_PREFIX).is_some_and(|hex| {
        hex.len() == 12 && hex.chars().all(|c| c.is_ascii_hexdigit())
    }) {
        return true;
    }
    let len = id.chars().count();
    (3..=64).contains(&len) && id.chars().all(|c| !c.is_control() && !c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_well_formed_peer_ids() {
        let id = mint_peer_id();
        assert!(is_valid_peer_id(&id));
        assert!(id.starts_with("peer_"));
        assert_eq!(id.len(), 5 + 12);
    }

    #[test]
    fn mints_unique_ids() {
        let a = mint_peer_id();
        let b = mint_peer_id();
        assert_ne!(a, b);
    }

    #[test]
    fn accepts_minted_room_id() {
        let id = mint_room_id();
        assert!(is_valid_room_id(&id));
    }

    #[test]
    fn accepts_client_supplied_short_code() {
        assert!(is_valid_room_id("ABC123"));
        assert!(is_valid_room_id("room-name"));
    }

    #[test]
    fn rejects_too_short_or_too_long() {
        assert!(!is_valid_room_id("ab"));
        assert!(!is_valid_room_id(&"x".repeat(65)));
    }

    #[test]
    fn rejects_control_and_whitespace() {
        assert!(!is_valid_room_id("has space"));
        assert!(!is_valid_room_id("tab\tchar"));
        assert!(!is_valid_room_id("new\nline"));
    }

    #[test]
    fn rejects_malformed_peer_id() {
        assert!(!is_valid_peer_id("peer_short"));
        assert!(!is_valid_peer_id("nope_123456789012"));
        assert!(!is_valid_peer_id("peer_GGGGGGGGGGGG"));
    }
}
