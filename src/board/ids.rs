use rand::Rng;

/// Characters used for room codes. 0/O and 1/I are left out so codes can be
/// read aloud or copied from a screen without ambiguity.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LEN: usize = 6;

const ENTITY_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ENTITY_ID_LEN: usize = 12;

/// Generate a random room code. Uniqueness is checked by the registry.
pub fn new_room_code() -> String {
    random_string(ROOM_CODE_ALPHABET, ROOM_CODE_LEN)
}

/// Generate an opaque id for opinions and fallback client identities.
/// Not cryptographically secure.
pub fn new_entity_id() -> String {
    random_string(ENTITY_ID_ALPHABET, ENTITY_ID_LEN)
}

/// Room codes are stored and compared upper-cased.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}
