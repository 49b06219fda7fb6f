//! Anti-forgery `state` values for the authorization redirect

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;

/// Random opaque value to pass as `state` and check on the redirect.
///
/// 32 random bytes, URL-safe base64 without padding (43 characters).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare a returned `state` against the one that was issued.
pub fn state_matches(expected: &str, received: Option<&str>) -> bool {
    match received {
        Some(received) => {
            !expected.is_empty()
                && expected.len() == received.len()
                && expected
                    .bytes()
                    .zip(received.bytes())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                    == 0
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_url_safe_and_fixed_length() {
        let state = generate_state();
        assert_eq!(state.len(), 43);
        assert!(
            state
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "state contains non-URL-safe characters: {state}"
        );
    }

    #[test]
    fn states_are_unique() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn matching() {
        assert!(state_matches("abc", Some("abc")));
        assert!(!state_matches("abc", Some("abd")));
        assert!(!state_matches("abc", Some("ab")));
        assert!(!state_matches("abc", None));
        assert!(!state_matches("", Some("")));
    }
}
