use reqwest::{
    StatusCode,
    blocking::Client,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::{
    domain::{Comment, DateRange, Settings},
    query::{CommentQuery, QueryContract, QueryPayload},
};

const USER_AGENT_HEADER: &str = "guest-letter/0.1";

pub fn build_client() -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(USER_AGENT_HEADER)
        .build()
        .map_err(FetchError::Http)
}

/// A comment query that passed the local checks and is ready to send.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    endpoint: Url,
    payload: QueryPayload,
}

impl FetchRequest {
    /// Validates settings and resolves the login token without touching the
    /// network. A separately provisioned raw token wins over the stored one.
    pub fn prepare(
        settings: &Settings,
        raw_token: Option<&str>,
        range: DateRange,
    ) -> Result<Self, FetchError> {
        let required = [
            ("Base URL", &settings.base_url),
            ("Hotel ID", &settings.hotel_id),
            ("Action", &settings.action),
            ("Object name", &settings.object_name),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(FetchError::Precondition(format!("{name} is not set")));
        }

        let endpoint = Url::parse(settings.base_url.trim())
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| {
                FetchError::Precondition("Base URL must be an absolute http(s) address".to_owned())
            })?;

        let token = raw_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .or_else(|| Some(settings.login_token.trim()).filter(|token| !token.is_empty()))
            .ok_or(FetchError::MissingToken)?;

        let payload = CommentQuery {
            hotel_id: &settings.hotel_id,
            start: range.start,
            end: range.end,
            action: settings.action.trim(),
            object_name: settings.object_name.trim(),
            login_token: token,
        }
        .build();

        Ok(Self { endpoint, payload })
    }

    pub fn payload(&self) -> &QueryPayload {
        &self.payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded(Vec<Comment>),
    Empty,
}

pub type FetchResult = Result<FetchOutcome, FetchError>;

pub fn fetch_comments(client: &Client, request: &FetchRequest) -> FetchResult {
    log::debug!(
        "Querying {} (contract v{})",
        request.payload().object,
        QueryContract::CURRENT.version
    );
    let response = client
        .post(request.endpoint.clone())
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .json(request.payload())
        .send()?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        log::info!("CRM rejected the login token ({status})");
        return Err(FetchError::SessionExpired(status.as_u16()));
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text()?;
    let outcome = unwrap_envelope(&body)?;
    match &outcome {
        FetchOutcome::Loaded(comments) => log::info!("Fetched {} comments", comments.len()),
        FetchOutcome::Empty => log::info!("CRM returned no comments for the range"),
    }
    Ok(outcome)
}

// Body must be JSON; an envelope without a usable first result set counts as
// an empty result rather than a failure.
fn unwrap_envelope(body: &str) -> FetchResult {
    let envelope: ResultEnvelope = serde_json::from_str(body)?;
    let rows = match envelope.result_sets {
        Some(Value::Array(mut sets)) if !sets.is_empty() => sets.swap_remove(0),
        _ => return Ok(FetchOutcome::Empty),
    };
    match rows {
        Value::Array(rows) if !rows.is_empty() => {
            let comments = rows
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<Comment>, _>>()?;
            Ok(FetchOutcome::Loaded(comments))
        }
        _ => Ok(FetchOutcome::Empty),
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Settings are incomplete: {0}")]
    Precondition(String),
    #[error("Login token is missing")]
    MissingToken,
    #[error("Session expired (HTTP {0}); enter a new login token")]
    SessionExpired(u16),
    #[error("CRM request failed with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("CRM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("CRM response could not be read: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Background worker disconnected before returning a result")]
    BackgroundWorkerGone,
}

// Response payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(rename = "ResultSets", default)]
    result_sets: Option<Value>,
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
