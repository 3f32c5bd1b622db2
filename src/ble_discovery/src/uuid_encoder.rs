use std::fmt::Display;
use uuid::Uuid;

pub const NAMESPACE: Uuid = Uuid::from_u128(0xbb652ee7_940b_4ace_981f_9ce7889dae39);

/// Maps a name to a UUID. Canonical UUID strings (8-4-4-4-12 hex, any case) pass through,
/// everything else becomes a v5 UUID in `NAMESPACE`.
pub fn to_uuid(name: impl Display) -> Uuid {
    let name = name.to_string();

    if is_canonical_uuid(&name) {
        if let Ok(uuid) = Uuid::parse_str(&name) {
            return uuid;
        }
    }

    return Uuid::new_v5(&NAMESPACE, name.as_bytes());
}

pub fn is_canonical_uuid(text: &str) -> bool {
    if text.len() != 36 {
        return false;
    }

    return text.char_indices().all(|(index, character)| match index {
        8 | 13 | 18 | 23 => character == '-',
        _ => character.is_ascii_hexdigit()
    });
}
