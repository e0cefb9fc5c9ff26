use std::collections::HashMap;
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use serde::Deserialize;

use crate::config::Config;
use crate::dataset::{Dataset, LoadError};
use crate::filters::FilterSelection;

/// Session used when a request carries no `sessionId`.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    /// Filled by the first request that needs data; a failed load stays failed.
    pub dataset: OnceCell<Result<Arc<Dataset>, LoadError>>,
    pub sessions: HashMap<String, FilterSelection>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(DEFAULT_SESSION.to_string(), FilterSelection::default());
        Self {
            config,
            dataset: OnceCell::new(),
            sessions,
        }
    }
}
