use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng, RngCore};

/// Generate a session identifier: 16 random bytes as lowercase hex.
pub fn generate_sid() -> String {
    let mut bytes = [0u8; 16];
    thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Generate a request correlation identifier (`rid`): 36 alphanumeric chars.
pub fn generate_rid() -> String {
    token(36)
}

/// Generate an opaque per-client tag carried in the session request payload.
pub fn generate_client_tag() -> String {
    token(36)
}

fn token(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_is_32_hex_chars() {
        let sid = generate_sid();
        assert_eq!(sid.len(), 32);
        assert!(sid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn rid_is_36_alphanumeric_chars() {
        let rid = generate_rid();
        assert_eq!(rid.len(), 36);
        assert!(rid.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn client_tag_is_36_alphanumeric_chars() {
        let tag = generate_client_tag();
        assert_eq!(tag.len(), 36);
        assert!(tag.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn identifiers_do_not_repeat() {
        assert_ne!(generate_sid(), generate_sid());
        assert_ne!(generate_rid(), generate_rid());
    }
}
