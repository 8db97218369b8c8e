//! Reply-letter drafting through a generative text API.

use std::{env, fmt, sync::Arc};

use reqwest::{blocking::Client, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::domain::{Comment, TargetLanguage};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// One-shot prompt in, text out.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, LetterError>;
}

#[derive(Clone)]
pub struct AssistantConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    /// Language staff read translations in.
    pub staff_language: TargetLanguage,
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("staff_language", &self.staff_language)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self, LetterError> {
        let api_key = env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LetterError::MissingApiKey)?;
        let staff_language = match env::var("STAFF_LANGUAGE") {
            Ok(raw) => TargetLanguage::from_label(&raw).unwrap_or_else(|| {
                log::warn!("Unknown STAFF_LANGUAGE {raw:?}; translating to Turkish");
                TargetLanguage::Turkish
            }),
            Err(_) => TargetLanguage::Turkish,
        };

        Ok(Self {
            api_key,
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned()),
            api_base: env::var("GEMINI_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_owned()),
            staff_language,
        })
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    api_key: String,
    endpoint: Url,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: &AssistantConfig) -> Result<Self, LetterError> {
        let raw = format!(
            "{}/v1beta/models/{}:generateContent",
            config.api_base.trim_end_matches('/'),
            config.model
        );
        let endpoint = Url::parse(&raw).map_err(|err| LetterError::Endpoint(err.to_string()))?;
        let client = Client::builder()
            .build()
            .map_err(LetterError::Http)?;

        Ok(Self {
            api_key: config.api_key.clone(),
            endpoint,
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String, LetterError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LetterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json()?;
        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

pub fn draft_prompt(comment: &Comment, extra_notes: &str, language: TargetLanguage) -> String {
    let answer = comment.answer.as_deref().unwrap_or("(no action recorded)");
    let notes = if extra_notes.trim().is_empty() {
        "(none)"
    } else {
        extra_notes.trim()
    };
    format!(
        "Act as the guest relations manager of a five-star hotel and write a courteous, \
professional letter to a guest.\n\
Guest name: {guest}\n\
Nationality: {nationality}\n\
Guest feedback: {feedback}\n\
Action taken by the hotel: {answer}\n\
Additional staff notes: {notes}\n\
Write the letter in {language}.\n\n\
Acknowledge the feedback with empathy and explain what the hotel has done about it. \
Return only the finished letter in paragraphs, with no placeholders.",
        guest = comment.guest_label(),
        nationality = comment.nationality,
        feedback = comment.comment,
        language = language.label(),
    )
}

pub fn translation_prompt(letter: &str, language: TargetLanguage) -> String {
    format!(
        "Translate this hotel guest letter into {}. Keep the courteous tone of a five-star \
hotel's guest relations team and return only the translation.\n\n{letter}",
        language.label()
    )
}

/// Drafts and translates reply letters with an injected generator.
#[derive(Clone)]
pub struct LetterAssistant {
    generator: Arc<dyn TextGenerator>,
    staff_language: TargetLanguage,
}

impl LetterAssistant {
    pub fn new(generator: Arc<dyn TextGenerator>, staff_language: TargetLanguage) -> Self {
        Self {
            generator,
            staff_language,
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self, LetterError> {
        let client = GeminiClient::new(config)?;
        Ok(Self::new(Arc::new(client), config.staff_language))
    }

    pub fn staff_language(&self) -> TargetLanguage {
        self.staff_language
    }

    pub fn draft(
        &self,
        comment: &Comment,
        extra_notes: &str,
        language: TargetLanguage,
    ) -> Result<String, LetterError> {
        self.run(&draft_prompt(comment, extra_notes, language))
    }

    /// Translates a drafted letter into the staff language.
    pub fn translate(&self, letter: &str) -> Result<String, LetterError> {
        if letter.trim().is_empty() {
            return Err(LetterError::NothingToTranslate);
        }
        self.run(&translation_prompt(letter, self.staff_language))
    }

    fn run(&self, prompt: &str) -> Result<String, LetterError> {
        let text = self.generator.generate(prompt)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LetterError::EmptyResponse);
        }
        Ok(text.to_owned())
    }
}

#[derive(Debug, Error)]
pub enum LetterError {
    #[error("GEMINI_API_KEY is not set; letter drafting is unavailable")]
    MissingApiKey,
    #[error("Invalid text API endpoint: {0}")]
    Endpoint(String),
    #[error("Text API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Text API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("The text API returned an empty letter")]
    EmptyResponse,
    #[error("Draft a letter before translating it")]
    NothingToTranslate,
    #[error("Background worker disconnected before returning a result")]
    BackgroundWorkerGone,
}
