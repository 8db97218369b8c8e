use std::fmt;

use chrono::{DateTime, Local, Months, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// Domain data structures shared across modules.

pub const DEFAULT_ACTION: &str = "Select";
pub const DEFAULT_OBJECT_NAME: &str = "QA_HOTEL_GUEST_COMMENT";

/// Connection settings for the CRM query endpoint.
///
/// Stored as one JSON record; every save replaces the record wholesale.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub base_url: String,
    // Older records used `token`.
    #[serde(default, alias = "token")]
    pub login_token: String,
    #[serde(default)]
    pub hotel_id: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_object_name")]
    pub object_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            login_token: String::new(),
            hotel_id: String::new(),
            action: default_action(),
            object_name: default_object_name(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("login_token", &"[REDACTED]")
            .field("hotel_id", &self.hotel_id)
            .field("action", &self.action)
            .field("object_name", &self.object_name)
            .finish()
    }
}

fn default_action() -> String {
    DEFAULT_ACTION.to_owned()
}

fn default_object_name() -> String {
    DEFAULT_OBJECT_NAME.to_owned()
}

/// Inclusive comment-date window. Start after end is passed through as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn ending_on(today: NaiveDate) -> Self {
        Self {
            start: today.checked_sub_months(Months::new(1)).unwrap_or(today),
            end: today,
        }
    }

    pub fn last_month() -> Self {
        Self::ending_on(Local::now().date_naive())
    }
}

/// One guest comment row as returned by the CRM. Read-only.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Comment {
    #[serde(rename = "COMMENTID", default, deserialize_with = "text")]
    pub comment_id: String,
    #[serde(rename = "HOTELID", default, deserialize_with = "text")]
    pub hotel_id: String,
    #[serde(rename = "COMMENTDATE", default, deserialize_with = "text")]
    pub comment_date: String,
    #[serde(rename = "COMMENT", default, deserialize_with = "text")]
    pub comment: String,
    #[serde(rename = "ANSWER", default, deserialize_with = "optional_text")]
    pub answer: Option<String>,
    #[serde(rename = "SOURCENAME", default, deserialize_with = "text")]
    pub source_name: String,
    #[serde(rename = "GROUPNAME", default, deserialize_with = "text")]
    pub group_name: String,
    #[serde(rename = "TAGS", default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,
    #[serde(rename = "GUESTNAME", default, deserialize_with = "text")]
    pub guest_name: String,
    #[serde(rename = "NATIONALITY", default, deserialize_with = "text")]
    pub nationality: String,
    #[serde(rename = "EMAIL", default, deserialize_with = "text")]
    pub email: String,
    #[serde(rename = "PHONE", default, deserialize_with = "text")]
    pub phone: String,
    #[serde(rename = "ROOMNO", default, deserialize_with = "text")]
    pub room_no: String,
    #[serde(rename = "CHECKIN", default, deserialize_with = "text")]
    pub check_in: String,
    #[serde(rename = "CHECKOUT", default, deserialize_with = "text")]
    pub check_out: String,
    #[serde(rename = "SCORE", default, deserialize_with = "text")]
    pub score: String,
    #[serde(rename = "ALLOWSMS", default, deserialize_with = "flag")]
    pub allow_sms: bool,
    #[serde(rename = "ALLOWWHATSAPP", default, deserialize_with = "flag")]
    pub allow_whatsapp: bool,
    #[serde(rename = "ALLOWEMAIL", default, deserialize_with = "flag")]
    pub allow_email: bool,
    #[serde(rename = "ALLOWPHONE", default, deserialize_with = "flag")]
    pub allow_phone: bool,
    #[serde(rename = "GDPRCONFIRMED", default, deserialize_with = "flag")]
    pub gdpr_confirmed: bool,
}

impl Comment {
    pub fn consent(&self) -> ConsentFlags {
        ConsentFlags {
            sms: self.allow_sms,
            whatsapp: self.allow_whatsapp,
            email: self.allow_email,
            phone: self.allow_phone,
            gdpr: self.gdpr_confirmed,
        }
    }

    pub fn guest_label(&self) -> &str {
        if self.guest_name.trim().is_empty() {
            "Guest"
        } else {
            &self.guest_name
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsentFlags {
    pub sms: bool,
    pub whatsapp: bool,
    pub email: bool,
    pub phone: bool,
    pub gdpr: bool,
}

impl ConsentFlags {
    /// Channel labels the guest agreed to be contacted on.
    pub fn granted(&self) -> Vec<&'static str> {
        [
            (self.sms, "SMS"),
            (self.whatsapp, "WhatsApp"),
            (self.email, "Email"),
            (self.phone, "Phone"),
            (self.gdpr, "GDPR"),
        ]
        .into_iter()
        .filter_map(|(on, label)| on.then_some(label))
        .collect()
    }
}

// The CRM is loose with scalar types: ids arrive as numbers or strings,
// flags as booleans, 0/1 or "0"/"1".

fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => value,
        Value::Null => String::new(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    })
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = text(deserializer)?;
    Ok((!value.trim().is_empty()).then_some(value))
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "e"
        ),
        _ => false,
    })
}

// Tags come either as a JSON array or as one comma-separated string.
fn tag_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<String> = match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(tag) => tag,
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(joined) => joined.split(',').map(str::to_owned).collect(),
        _ => Vec::new(),
    };
    Ok(raw
        .into_iter()
        .map(|tag| tag.trim().to_owned())
        .filter(|tag| !tag.is_empty())
        .collect())
}

/// Renders `YYYY-MM-DD` (optionally followed by a time) as `DD.MM.YYYY`.
pub fn display_date(raw: &str) -> String {
    let date_part = raw.split(' ').next().unwrap_or_default();
    let parts: Vec<&str> = date_part.split('-').collect();
    if let [year, month, day] = parts.as_slice() {
        return format!("{day}.{month}.{year}");
    }
    raw.to_owned()
}

/// Badge tone derived from the CRM's comment group label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupTone {
    Complaint,
    Praise,
    Suggestion,
    Neutral,
}

impl GroupTone {
    pub fn classify(group_name: &str) -> Self {
        let lower = group_name.to_lowercase();
        if lower.contains("temizlik") || lower.contains("housekeeping") {
            GroupTone::Complaint
        } else if lower.contains("restoran") || lower.contains("yemek") {
            GroupTone::Praise
        } else if lower.contains("öneri") {
            GroupTone::Suggestion
        } else {
            GroupTone::Neutral
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TargetLanguage {
    #[default]
    English,
    German,
    Russian,
    Turkish,
    French,
}

impl TargetLanguage {
    pub const ALL: [TargetLanguage; 5] = [
        TargetLanguage::English,
        TargetLanguage::German,
        TargetLanguage::Russian,
        TargetLanguage::Turkish,
        TargetLanguage::French,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TargetLanguage::English => "English",
            TargetLanguage::German => "German",
            TargetLanguage::Russian => "Russian",
            TargetLanguage::Turkish => "Turkish",
            TargetLanguage::French => "French",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|language| language.label().eq_ignore_ascii_case(label.trim()))
    }
}

/// Per-comment draft kept in the document store.
#[derive(Clone, Debug, PartialEq)]
pub struct AgendaRecord {
    pub extra_notes: String,
    pub letter: String,
    pub target_language: TargetLanguage,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_fill_missing_keys() {
        let settings: Settings = serde_json::from_str(r#"{"baseUrl":"https://crm.test"}"#)
            .expect("parse");
        assert_eq!(settings.base_url, "https://crm.test");
        assert_eq!(settings.login_token, "");
        assert_eq!(settings.action, DEFAULT_ACTION);
        assert_eq!(settings.object_name, DEFAULT_OBJECT_NAME);
    }

    #[test]
    fn settings_accept_legacy_token_key() {
        let settings: Settings =
            serde_json::from_str(r#"{"token":"abc","hotelId":"21390"}"#).expect("parse");
        assert_eq!(settings.login_token, "abc");
        assert_eq!(settings.hotel_id, "21390");
    }

    #[test]
    fn settings_debug_hides_token() {
        let settings = Settings {
            login_token: "secret-value".into(),
            ..Settings::default()
        };
        assert!(!format!("{settings:?}").contains("secret-value"));
    }

    #[test]
    fn date_range_spans_one_month_back() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 31).expect("date");
        let range = DateRange::ending_on(today);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2025, 2, 28).expect("date"));
        assert_eq!(range.end, today);
    }

    #[test]
    fn comment_tolerates_loose_scalar_types() {
        let row = serde_json::json!({
            "COMMENTID": 101,
            "HOTELID": "21390",
            "COMMENT": "Lovely stay",
            "ANSWER": null,
            "ALLOWSMS": 1,
            "ALLOWEMAIL": "0",
            "ALLOWWHATSAPP": true,
            "GDPRCONFIRMED": "1",
            "SCORE": 9.5
        });
        let comment: Comment = serde_json::from_value(row).expect("decode");
        assert_eq!(comment.comment_id, "101");
        assert_eq!(comment.answer, None);
        assert_eq!(comment.score, "9.5");
        assert_eq!(comment.consent().granted(), vec!["SMS", "WhatsApp", "GDPR"]);
        assert_eq!(comment.guest_label(), "Guest");
    }

    #[test]
    fn comment_tags_accept_array_or_joined_text() {
        let listed: Comment =
            serde_json::from_value(serde_json::json!({"TAGS": ["Temizlik", " Öneri ", null, 7]}))
                .expect("decode");
        assert_eq!(listed.tags, vec!["Temizlik", "Öneri", "7"]);

        let joined: Comment =
            serde_json::from_value(serde_json::json!({"TAGS": "Restoran, Havuz,,"}))
                .expect("decode");
        assert_eq!(joined.tags, vec!["Restoran", "Havuz"]);

        let missing: Comment = serde_json::from_value(serde_json::json!({})).expect("decode");
        assert!(missing.tags.is_empty());
    }

    #[test]
    fn display_date_reorders_iso_dates() {
        assert_eq!(display_date("2025-06-15"), "15.06.2025");
        assert_eq!(display_date("2025-06-15 10:22:00"), "15.06.2025");
        assert_eq!(display_date("15/06/2025"), "15/06/2025");
        assert_eq!(display_date(""), "");
    }

    #[test]
    fn group_tone_matches_keywords() {
        assert_eq!(GroupTone::classify("Housekeeping - Olumsuz"), GroupTone::Complaint);
        assert_eq!(GroupTone::classify("Restoran - Olumlu"), GroupTone::Praise);
        assert_eq!(GroupTone::classify("Öneri"), GroupTone::Suggestion);
        assert_eq!(GroupTone::classify("Front office"), GroupTone::Neutral);
    }

    #[test]
    fn target_language_round_trips_labels() {
        for language in TargetLanguage::ALL {
            assert_eq!(TargetLanguage::from_label(language.label()), Some(language));
        }
        assert_eq!(TargetLanguage::from_label("klingon"), None);
    }
}
