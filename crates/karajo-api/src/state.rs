use crate::session::SessionStore;
use karajo_core::{Env, Manager};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub env: Arc<Env>,
    pub manager: Arc<Manager>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(env: Arc<Env>, manager: Arc<Manager>) -> Self {
        Self { env, manager, sessions: Arc::new(SessionStore::new()) }
    }
}
