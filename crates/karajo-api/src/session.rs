//! In-memory session store backing the `karajo` cookie. A session token is
//! a random 32-byte value, hex-encoded; holding the cookie is equivalent to
//! being logged in as the user recorded against that token.

use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;

pub const COOKIE_NAME: &str = "karajo";

#[derive(Default)]
pub struct SessionStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens.lock().expect("session mutex poisoned").insert(token.clone(), username.to_string());
        token
    }

    pub fn user_for(&self, token: &str) -> Option<String> {
        self.tokens.lock().expect("session mutex poisoned").get(token).cloned()
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.lock().expect("session mutex poisoned").remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_token_resolves_to_its_user() {
        let store = SessionStore::new();
        let token = store.create("admin");
        assert_eq!(store.user_for(&token), Some("admin".to_string()));
    }

    #[test]
    fn revoked_token_no_longer_resolves() {
        let store = SessionStore::new();
        let token = store.create("admin");
        store.revoke(&token);
        assert_eq!(store.user_for(&token), None);
    }
}
