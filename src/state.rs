// src/state.rs
// Application state - the composition root wiring every component together.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::CONFIG;
use crate::hardware::HardwareMonitor;
use crate::memory::MemoryStore;
use crate::model::http::{HttpChatModel, HttpEmbeddingModel};
use crate::model::ChatModel;
use crate::queue::PriorityQueue;
use crate::search::SearchClient;
use crate::session::manager::SessionManager;
use crate::session::store::SessionStore;
use crate::types::Job;
use crate::worker::InferenceWorker;

#[derive(Clone)]
pub struct AppState {
    pub sqlite_pool: SqlitePool,
    pub queue: Arc<PriorityQueue<Job>>,
    pub worker: Arc<InferenceWorker>,
    pub hardware: Arc<HardwareMonitor>,
    pub memory: Arc<MemoryStore>,
    pub session_manager: Arc<SessionManager>,
    pub search: Arc<SearchClient>,
}

impl AppState {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        CONFIG.validate()?;

        info!("connecting to embedding/model endpoints at {}", CONFIG.model_base_url);
        let chat_model: Arc<dyn ChatModel> = Arc::new(HttpChatModel::new(
            CONFIG.model_base_url.clone(),
            CONFIG.model_api_key.clone(),
            CONFIG.model_name.clone(),
        ));
        let embedder = Arc::new(HttpEmbeddingModel::new(
            CONFIG.embedding_base_url.clone(),
            CONFIG.embedding_api_key.clone(),
            CONFIG.embedding_model_name.clone(),
            CONFIG.embedding_dim,
        ));

        let hardware = Arc::new(HardwareMonitor::spawn(CONFIG.gpu_probe_binary.clone()));
        let queue = Arc::new(PriorityQueue::new(CONFIG.queue.clone()));
        let worker = Arc::new(InferenceWorker::new(
            queue.clone(),
            chat_model,
            hardware.clone(),
            pool.clone(),
        ));

        let memory = Arc::new(MemoryStore::new(&CONFIG.qdrant_url, CONFIG.memory.collection.clone(), embedder).await?);

        let session_store = Arc::new(SessionStore::new(pool.clone()));
        let session_manager = Arc::new(SessionManager::new(
            session_store,
            memory.clone(),
            worker.clone(),
            CONFIG.priorities.background,
        ));

        let search = Arc::new(SearchClient::new(
            CONFIG.search_api_key.clone(),
            CONFIG.search.clone(),
            "search_usage.json",
        ));

        Ok(Self {
            sqlite_pool: pool,
            queue,
            worker,
            hardware,
            memory,
            session_manager,
            search,
        })
    }
}
