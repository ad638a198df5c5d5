//! Azure AI Search [`IndexStore`].
//!
//! Talks to the REST API directly:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upsert | `POST /indexes/{name}/docs/index` with `mergeOrUpload` |
//! | metadata-only | same endpoint with `merge` (vector untouched) |
//! | delete | same endpoint with `delete` |
//! | create index | `PUT /indexes/{name}` |
//!
//! Search document keys may only contain letters, digits, `_`, `-` and
//! `=`, while item ids are Terraform addresses or page titles, so the key
//! is the URL-safe base64 of the id. The raw id is kept in `item_id`.

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use change_indexer_core::error::{ErrorKind, IndexerError, Result};
use change_indexer_core::fingerprint::Fingerprint;
use change_indexer_core::models::{IndexRecord, Metadata};
use change_indexer_core::store::IndexStore;

use crate::config::AzureSearchConfig;
use crate::http;

const VECTOR_PROFILE: &str = "vs-profile";
const VECTOR_ALGORITHM: &str = "vs-hnsw";

pub struct AzureSearchIndex {
    client: reqwest::Client,
    config: AzureSearchConfig,
    api_key: String,
    dims: usize,
}

/// Search document key for an item id.
pub fn document_key(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

impl AzureSearchIndex {
    pub fn new(config: &AzureSearchConfig, dims: usize, timeout_secs: u64) -> AnyResult<Self> {
        let api_key = http::api_key_from_env(&config.api_key_env)?;
        Ok(Self {
            client: http::client(timeout_secs)?,
            config: config.clone(),
            api_key,
            dims,
        })
    }

    fn index_url(&self) -> String {
        format!(
            "{}/indexes/{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index_name,
            self.config.api_version
        )
    }

    fn docs_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/index?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index_name,
            self.config.api_version
        )
    }

    /// Create the index if it does not exist. Returns `true` if created.
    pub async fn ensure_index(&self) -> AnyResult<bool> {
        let resp = self
            .client
            .get(self.index_url())
            .header("api-key", &self.api_key)
            .send()
            .await?;

        if resp.status().is_success() {
            info!(index = %self.config.index_name, "search index already exists");
            return Ok(false);
        }
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Azure Search error {} checking index: {}", status, body);
        }

        let resp = self
            .client
            .put(self.index_url())
            .header("api-key", &self.api_key)
            .json(&index_definition(&self.config, self.dims))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Azure Search error {} creating index: {}", status, body);
        }
        info!(index = %self.config.index_name, dims = self.dims, "created search index");
        Ok(true)
    }

    async fn post_actions(&self, docs: Vec<Value>, tolerate_not_found: bool) -> Result<()> {
        let resp = self
            .client
            .post(self.docs_url())
            .header("api-key", &self.api_key)
            .json(&json!({ "value": docs }))
            .send()
            .await
            .map_err(|e| IndexerError::IndexWrite {
                kind: http::transport_kind(&e),
                message: e.to_string(),
            })?;

        let status = resp.status();
        // 207 carries per-document failures in the body.
        if status.is_success() {
            let body: Value = resp
                .json()
                .await
                .map_err(|e| IndexerError::index_transient(format!("unreadable response: {}", e)))?;
            return check_document_results(&body, tolerate_not_found);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(IndexerError::IndexWrite {
            kind: http::status_kind(status),
            message: format!("Azure Search error {}: {}", status, body),
        })
    }
}

/// Index schema: key, raw id, content, fingerprint, metadata, vector.
fn index_definition(config: &AzureSearchConfig, dims: usize) -> Value {
    let mut fields = vec![
        json!({ "name": "id", "type": "Edm.String", "key": true, "filterable": true }),
        json!({ "name": "item_id", "type": "Edm.String", "filterable": true }),
        json!({ "name": "content", "type": "Edm.String", "searchable": true }),
        json!({ "name": "fingerprint", "type": "Edm.String", "filterable": true }),
        json!({ "name": "metadata_json", "type": "Edm.String" }),
    ];
    for name in &config.metadata_fields {
        fields.push(json!({
            "name": name,
            "type": "Edm.String",
            "searchable": true,
            "filterable": true
        }));
    }
    fields.push(json!({
        "name": config.vector_field,
        "type": "Collection(Edm.Single)",
        "searchable": true,
        "dimensions": dims,
        "vectorSearchProfile": VECTOR_PROFILE
    }));

    json!({
        "name": config.index_name,
        "fields": fields,
        "vectorSearch": {
            "algorithms": [{
                "name": VECTOR_ALGORITHM,
                "kind": "hnsw",
                "hnswParameters": { "m": 4, "efConstruction": 400, "efSearch": 500, "metric": "cosine" }
            }],
            "profiles": [{ "name": VECTOR_PROFILE, "algorithm": VECTOR_ALGORITHM }]
        }
    })
}

/// Metadata fields shared by full upserts and metadata-only merges.
fn metadata_document(
    action: &str,
    id: &str,
    metadata: &Metadata,
    fingerprint: &Fingerprint,
    projected: &[String],
) -> Result<Map<String, Value>> {
    let mut doc = Map::new();
    doc.insert("@search.action".into(), json!(action));
    doc.insert("id".into(), json!(document_key(id)));
    doc.insert("item_id".into(), json!(id));
    doc.insert("fingerprint".into(), json!(fingerprint.as_str()));
    let metadata_json = serde_json::to_string(metadata)
        .map_err(|e| IndexerError::index_permanent(e.to_string()))?;
    doc.insert("metadata_json".into(), json!(metadata_json));
    for name in projected {
        match metadata.get(name) {
            Some(value) => {
                doc.insert(name.clone(), json!(value.to_string()));
            }
            None => debug!(item = id, field = %name, "metadata field missing, leaving empty"),
        }
    }
    Ok(doc)
}

fn upload_document(record: &IndexRecord, config: &AzureSearchConfig) -> Result<Value> {
    let mut doc = metadata_document(
        "mergeOrUpload",
        &record.id,
        &record.metadata,
        &record.fingerprint,
        &config.metadata_fields,
    )?;
    doc.insert("content".into(), json!(record.canonical_text));
    doc.insert(config.vector_field.clone(), json!(record.embedding));
    Ok(Value::Object(doc))
}

/// Turn per-document statuses into a single result.
fn check_document_results(body: &Value, tolerate_not_found: bool) -> Result<()> {
    let results = body
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| IndexerError::index_permanent("Azure Search response missing value array"))?;

    for result in results {
        if result.get("status").and_then(|s| s.as_bool()).unwrap_or(false) {
            continue;
        }
        let code = result
            .get("statusCode")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u16;
        if code == 404 && tolerate_not_found {
            continue;
        }
        let message = result
            .get("errorMessage")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        let kind = match reqwest::StatusCode::from_u16(code) {
            Ok(status) => http::status_kind(status),
            Err(_) => ErrorKind::Permanent,
        };
        return Err(IndexerError::IndexWrite {
            kind,
            message: format!("document rejected ({}): {}", code, message),
        });
    }
    Ok(())
}

#[async_trait]
impl IndexStore for AzureSearchIndex {
    async fn upsert(&self, record: &IndexRecord) -> Result<()> {
        if record.embedding.len() != self.dims {
            return Err(IndexerError::index_permanent(format!(
                "index field '{}' holds {}-dimensional vectors, got {}",
                self.config.vector_field,
                self.dims,
                record.embedding.len()
            )));
        }
        let doc = upload_document(record, &self.config)?;
        self.post_actions(vec![doc], false).await
    }

    async fn upsert_metadata(
        &self,
        id: &str,
        metadata: &Metadata,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        let doc = metadata_document("merge", id, metadata, fingerprint, &self.config.metadata_fields)?;
        self.post_actions(vec![Value::Object(doc)], false).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let doc = json!({ "@search.action": "delete", "id": document_key(id) });
        self.post_actions(vec![doc], true).await
    }
}
