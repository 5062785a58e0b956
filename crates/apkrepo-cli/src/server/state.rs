//! Shared handler state.

use std::sync::Arc;

use apkrepo_core::Repository;

#[derive(Debug, Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
}

impl AppState {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo: Arc::new(repo),
        }
    }
}
