//! Per-comment letter drafts kept in a hosted document store.

use std::{collections::HashMap, env, fmt, sync::Mutex};

use chrono::{DateTime, Utc};
use reqwest::{StatusCode, blocking::Client, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::domain::{AgendaRecord, TargetLanguage};

const DEFAULT_API_BASE: &str = "https://firestore.googleapis.com";
const DEFAULT_COLLECTION: &str = "agendas";

pub trait AgendaStore: Send + Sync {
    fn fetch(&self, comment_id: &str) -> Result<Option<AgendaRecord>, AgendaError>;
    fn store(&self, comment_id: &str, record: &AgendaRecord) -> Result<(), AgendaError>;
}

#[derive(Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub api_base: String,
}

impl fmt::Debug for FirestoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirestoreConfig")
            .field("project_id", &self.project_id)
            .field("collection", &self.collection)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl FirestoreConfig {
    /// `None` when no project is configured.
    pub fn from_env() -> Option<Self> {
        let project_id = env::var("FIRESTORE_PROJECT_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())?;
        Some(Self {
            project_id,
            api_key: env::var("FIRESTORE_API_KEY").ok().filter(|key| !key.is_empty()),
            collection: env::var("FIRESTORE_COLLECTION")
                .unwrap_or_else(|_| DEFAULT_COLLECTION.to_owned()),
            api_base: env::var("FIRESTORE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_owned()),
        })
    }
}

/// Firestore REST document access, one document per comment id.
pub struct FirestoreAgendaStore {
    collection_url: Url,
    api_key: Option<String>,
    client: Client,
}

impl FirestoreAgendaStore {
    pub fn new(config: &FirestoreConfig) -> Result<Self, AgendaError> {
        let raw = format!(
            "{}/v1/projects/{}/databases/(default)/documents/{}",
            config.api_base.trim_end_matches('/'),
            config.project_id,
            config.collection
        );
        let collection_url =
            Url::parse(&raw).map_err(|err| AgendaError::Endpoint(err.to_string()))?;
        let client = Client::builder().build()?;
        Ok(Self {
            collection_url,
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn document_url(&self, comment_id: &str) -> Result<Url, AgendaError> {
        let mut url = self.collection_url.clone();
        url.path_segments_mut()
            .map_err(|_| AgendaError::Endpoint(self.collection_url.to_string()))?
            .pop_if_empty()
            .push(comment_id);
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }
}

impl AgendaStore for FirestoreAgendaStore {
    fn fetch(&self, comment_id: &str) -> Result<Option<AgendaRecord>, AgendaError> {
        let response = self.client.get(self.document_url(comment_id)?).send()?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AgendaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let document: Document = response.json()?;
        Ok(Some(document.fields.into_record()))
    }

    fn store(&self, comment_id: &str, record: &AgendaRecord) -> Result<(), AgendaError> {
        let document = Document {
            fields: DocumentFields::from_record(record),
        };
        let response = self
            .client
            .patch(self.document_url(comment_id)?)
            .header(CONTENT_TYPE, "application/json")
            .json(&document)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AgendaError::Status {
                status: status.as_u16(),
                body,
            });
        }
        log::info!("Saved agenda for comment {comment_id}");
        Ok(())
    }
}

/// Keeps records for the lifetime of the process.
#[derive(Default)]
pub struct MemoryAgendaStore {
    records: Mutex<HashMap<String, AgendaRecord>>,
}

impl AgendaStore for MemoryAgendaStore {
    fn fetch(&self, comment_id: &str) -> Result<Option<AgendaRecord>, AgendaError> {
        let records = self.records.lock().map_err(|_| AgendaError::Poisoned)?;
        Ok(records.get(comment_id).cloned())
    }

    fn store(&self, comment_id: &str, record: &AgendaRecord) -> Result<(), AgendaError> {
        let mut records = self.records.lock().map_err(|_| AgendaError::Poisoned)?;
        records.insert(comment_id.to_owned(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AgendaError {
    #[error("Invalid document store endpoint: {0}")]
    Endpoint(String),
    #[error("Document store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Document store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Agenda store lock was poisoned")]
    Poisoned,
    #[error("Background worker disconnected before returning a result")]
    BackgroundWorkerGone,
}

// Firestore wire format ------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    fields: DocumentFields,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra_notes: Option<StringValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    letter: Option<StringValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_language: Option<StringValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<TimestampValue>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StringValue {
    string_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimestampValue {
    timestamp_value: DateTime<Utc>,
}

impl DocumentFields {
    fn from_record(record: &AgendaRecord) -> Self {
        let text = |value: &str| {
            Some(StringValue {
                string_value: value.to_owned(),
            })
        };
        Self {
            extra_notes: text(&record.extra_notes),
            letter: text(&record.letter),
            target_language: text(record.target_language.label()),
            updated_at: Some(TimestampValue {
                timestamp_value: record.updated_at,
            }),
        }
    }

    fn into_record(self) -> AgendaRecord {
        let text = |value: Option<StringValue>| value.map(|v| v.string_value).unwrap_or_default();
        let target_language = self
            .target_language
            .and_then(|value| TargetLanguage::from_label(&value.string_value))
            .unwrap_or_default();
        AgendaRecord {
            extra_notes: text(self.extra_notes),
            letter: text(self.letter),
            target_language,
            updated_at: self
                .updated_at
                .map(|value| value.timestamp_value)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    const DOC_PATH: &str = "/v1/projects/hotel-desk/databases/(default)/documents/agendas/101";

    fn config(base: &str) -> FirestoreConfig {
        FirestoreConfig {
            project_id: "hotel-desk".into(),
            api_key: Some("fs-key".into()),
            collection: "agendas".into(),
            api_base: base.to_owned(),
        }
    }

    fn record() -> AgendaRecord {
        AgendaRecord {
            extra_notes: "Fruit basket sent".into(),
            letter: "Dear Mr. Smith,".into(),
            target_language: TargetLanguage::German,
            updated_at: Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn memory_store_round_trips_per_comment() {
        let store = MemoryAgendaStore::default();
        assert_eq!(store.fetch("101").expect("fetch"), None);
        store.store("101", &record()).expect("store");
        assert_eq!(store.fetch("101").expect("fetch"), Some(record()));
        assert_eq!(store.fetch("102").expect("fetch"), None);
    }

    #[test]
    fn fetch_decodes_firestore_document() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", DOC_PATH)
            .match_query(Matcher::UrlEncoded("key".into(), "fs-key".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "name": "projects/hotel-desk/databases/(default)/documents/agendas/101",
                    "fields": {
                        "extraNotes": {"stringValue": "Fruit basket sent"},
                        "letter": {"stringValue": "Dear Mr. Smith,"},
                        "targetLanguage": {"stringValue": "German"},
                        "updatedAt": {"timestampValue": "2025-06-15T09:30:00Z"}
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create();

        let store = FirestoreAgendaStore::new(&config(&server.url())).expect("store");
        let fetched = store.fetch("101").expect("fetch");

        mock.assert();
        assert_eq!(fetched, Some(record()));
    }

    #[test]
    fn missing_document_is_none() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", DOC_PATH)
            .match_query(Matcher::Any)
            .with_status(404)
            .create();

        let store = FirestoreAgendaStore::new(&config(&server.url())).expect("store");
        assert_eq!(store.fetch("101").expect("fetch"), None);
    }

    #[test]
    fn store_patches_encoded_fields() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PATCH", DOC_PATH)
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "fields": {
                    "letter": {"stringValue": "Dear Mr. Smith,"},
                    "targetLanguage": {"stringValue": "German"}
                }
            })))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create();

        let store = FirestoreAgendaStore::new(&config(&server.url())).expect("store");
        store.store("101", &record()).expect("store");
        mock.assert();
    }

    #[test]
    fn store_surfaces_http_failure() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("PATCH", DOC_PATH)
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("denied")
            .create();

        let store = FirestoreAgendaStore::new(&config(&server.url())).expect("store");
        let result = store.store("101", &record());
        assert!(matches!(result, Err(AgendaError::Status { status: 403, .. })));
    }
}
