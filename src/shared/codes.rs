use rand::Rng;

pub const MAX_ROOM_CODE_LENGTH: usize = 16;
/// Prefix marking generated solo/single-player room codes.
pub const SINGLE_PLAYER_PREFIX: &str = "SP";

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SP_CODE_SUFFIX_LENGTH: usize = 6;

/// Uppercases and strips a caller-supplied multi-room code down to the
/// characters the room table accepts.
pub fn normalize_room_code(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .map(|ch| ch.to_ascii_uppercase())
        .take(MAX_ROOM_CODE_LENGTH)
        .collect()
}

pub fn generate_single_player_code(rng: &mut impl Rng) -> String {
    let mut code = String::with_capacity(SINGLE_PLAYER_PREFIX.len() + SP_CODE_SUFFIX_LENGTH);
    code.push_str(SINGLE_PLAYER_PREFIX);
    for _ in 0..SP_CODE_SUFFIX_LENGTH {
        code.push(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char);
    }
    code
}

pub fn is_single_player_code(code: &str) -> bool {
    code.starts_with(SINGLE_PLAYER_PREFIX)
}
