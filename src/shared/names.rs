pub const MAX_PLAYER_NAME_LENGTH: usize = 20;

/// Collapses whitespace runs, strips control characters, and caps the length.
/// Returns the fallback when nothing printable remains.
pub fn sanitize_player_name(name: &str, fallback: &str) -> String {
    let cleaned = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>();
    if cleaned.is_empty() {
        return fallback.to_string();
    }
    cleaned.chars().take(MAX_PLAYER_NAME_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_caps_length() {
        assert_eq!(sanitize_player_name("  Ada   Lovelace  ", "Player"), "Ada Lovelace");
        let long = "x".repeat(40);
        assert_eq!(sanitize_player_name(&long, "Player").len(), MAX_PLAYER_NAME_LENGTH);
    }

    #[test]
    fn empty_names_fall_back() {
        assert_eq!(sanitize_player_name("   ", "Player"), "Player");
        assert_eq!(sanitize_player_name("", "Guest"), "Guest");
    }
}
