use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "_id")]
    pub id: String,
    pub issue_title: String,
    pub issue_text: String,
    pub created_by: String,
    pub assigned_to: String,
    pub status_text: String,
    pub open: bool,
    #[serde(with = "timestamp")]
    pub created_on: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_on: DateTime<Utc>,
    pub project: String,
}

/// Everything the caller decides about a new issue. The store assigns the
/// id, the timestamps and `open`.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub project: String,
    pub issue_title: String,
    pub issue_text: String,
    pub created_by: String,
    pub assigned_to: String,
    pub status_text: String,
}

/// Equality predicates for listing. `None` means "any value".
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub id: Option<String>,
    pub issue_title: Option<String>,
    pub issue_text: Option<String>,
    pub created_by: Option<String>,
    pub assigned_to: Option<String>,
    pub status_text: Option<String>,
    pub open: Option<bool>,
    pub created_on: Option<DateTime<Utc>>,
    pub updated_on: Option<DateTime<Utc>>,
}

/// Partial update. Empty strings in a request body deserialize to `None`,
/// so only fields that carry a value overwrite the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IssueUpdate {
    #[serde(default, deserialize_with = "non_empty")]
    pub issue_title: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub issue_text: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub assigned_to: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub status_text: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub open: Option<bool>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.issue_title.is_none()
            && self.issue_text.is_none()
            && self.created_by.is_none()
            && self.assigned_to.is_none()
            && self.status_text.is_none()
            && self.open.is_none()
    }
}

pub fn parse_flag(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!(
            "invalid boolean value '{other}': expected true/false, 1/0, or yes/no"
        )),
    }
}

pub(crate) fn non_empty<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(de)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// An `_id` from a request body. Non-string scalars keep their textual
/// form so they fail id validation downstream instead of the whole body.
pub(crate) fn lenient_id<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let id = match Option::<serde_json::Value>::deserialize(de)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };
    Ok(id.filter(|s| !s.is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Bool(bool),
    Text(String),
}

/// JSON clients send `open` as a boolean, HTML forms as a string.
pub(crate) fn flag<'de, D>(de: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FlagValue>::deserialize(de)? {
        None => Ok(None),
        Some(FlagValue::Bool(b)) => Ok(Some(b)),
        Some(FlagValue::Text(s)) if s.is_empty() => Ok(None),
        Some(FlagValue::Text(s)) => parse_flag(&s).map(Some).map_err(D::Error::custom),
    }
}

/// Issue timestamps: UTC, millisecond precision, RFC 3339 on the wire and
/// in the store.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}
