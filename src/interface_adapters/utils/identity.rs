// Process-local id/password generation for connections and lobbies.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// A process-unique id for one WebSocket connection's lifetime.
pub fn next_client_id() -> u64 {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_LEN: usize = 20;

/// A 20-character alphanumeric admin password handed back from
/// `create_lobby`, used to authorize `start_round` for that lobby.
pub fn generate_lobby_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique_and_increasing() {
        let first = next_client_id();
        let second = next_client_id();
        assert!(second > first);
    }

    #[test]
    fn password_has_expected_length_and_alphabet() {
        let password = generate_lobby_password();
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(password.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
    }
}
