// src/memory/mod.rs
// Vector memory facade: embed+upsert and k-NN recall with a distance cutoff.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use anyhow::{Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dim(&self) -> u64;
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryMatch {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
    pub distance: f32,
}

pub struct MemoryStore {
    client: Qdrant,
    collection: String,
    embedder: std::sync::Arc<dyn EmbeddingModel>,
}

impl MemoryStore {
    pub async fn new(
        url: &str,
        collection: impl Into<String>,
        embedder: std::sync::Arc<dyn EmbeddingModel>,
    ) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .context("failed to connect to qdrant")?;
        let collection = collection.into();

        let store = Self {
            client,
            collection,
            embedder,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        if !self.client.collection_exists(&self.collection).await? {
            info!("creating qdrant collection: {}", self.collection);
            self.client
                .create_collection(CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.embedder.dim(), Distance::Euclid),
                ))
                .await
                .context("failed to create memory collection")?;
        }
        Ok(())
    }

    /// Embed `text` and upsert it. `doc_id`, when provided, is authoritative
    /// and overwrites any existing point with that id.
    pub async fn memorize(
        &self,
        text: &str,
        source: &str,
        metadata: Option<serde_json::Value>,
        doc_id: Option<String>,
    ) -> Result<String> {
        let embedding = self.embedder.embed(text).await?;
        let id = doc_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = metadata {
            map.insert("source".to_string(), serde_json::Value::String(source.to_string()));
            map.insert(
                "timestamp".to_string(),
                serde_json::Value::Number(serde_json::Number::from(chrono::Utc::now().timestamp())),
            );
        }

        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("document".to_string(), text.to_string().into());
        payload.insert("source".to_string(), source.to_string().into());
        payload.insert("metadata_json".to_string(), metadata.to_string().into());
        payload.insert("doc_id".to_string(), id.clone().into());

        let point = PointStruct::new(numeric_point_id(&id), embedding, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .context("failed to upsert memory point")?;

        debug!(doc_id = %id, "memorized entry");
        Ok(id)
    }

    /// Up to `k` documents whose distance to `query`'s embedding is
    /// strictly less than `threshold`, ordered nearest-first.
    pub async fn recall(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<String>> {
        Ok(self
            .recall_with_metadata(query, k, Some(threshold), None)
            .await?
            .into_iter()
            .map(|m| m.document)
            .collect())
    }

    pub async fn recall_with_metadata(
        &self,
        query: &str,
        k: usize,
        threshold: Option<f32>,
        source: Option<&str>,
    ) -> Result<Vec<MemoryMatch>> {
        let embedding = self.embedder.embed(query).await?;

        // Over-fetch since the threshold filter is applied client-side below;
        // qdrant's score_threshold direction varies by distance metric and
        // we want the exact "raw euclidean distance < threshold" semantics.
        let fetch_limit = (k.max(1) * 4).min(200) as u64;

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, embedding, fetch_limit).with_payload(true),
            )
            .await
            .context("failed to search memory collection")?;

        let mut matches: Vec<MemoryMatch> = results
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                let document = payload.get("document")?.as_str()?.to_string();
                let point_source = payload.get("source").and_then(|v| v.as_str());
                let doc_id = payload.get("doc_id").and_then(|v| v.as_str()).map(str::to_string);

                if let Some(want) = source {
                    if point_source != Some(want) {
                        return None;
                    }
                }

                let metadata = payload
                    .get("metadata_json")
                    .and_then(|v| v.as_str())
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(serde_json::Value::Null);

                let distance = point.score;
                if let Some(t) = threshold {
                    if distance >= t {
                        return None;
                    }
                }

                Some(MemoryMatch {
                    id: doc_id.unwrap_or_else(|| {
                        point.id.map(|id| format!("{:?}", id)).unwrap_or_default()
                    }),
                    document,
                    metadata,
                    distance,
                })
            })
            .collect();

        matches.truncate(k);
        Ok(matches)
    }
}

fn numeric_point_id(id: &str) -> u64 {
    id.parse().unwrap_or_else(|_| {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    })
}
