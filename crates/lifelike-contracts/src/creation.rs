use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{CreationSchemaError, ImportValidationError};

pub const FALLBACK_CREATION_NAME: &str = "New Creation";
pub const PROMPT_NAME_MAX_CHARS: usize = 20;
pub const EXPORT_FILE_SUFFIX: &str = "_artifact.json";

/// A generated artifact plus the media it was generated from.
///
/// Serializes to the persisted/export record shape:
/// `{id, name, html, originalImage?, timestamp}` with the timestamp as an
/// RFC 3339 UTC string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Creation {
    pub id: String,
    pub name: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Image,
    None,
}

impl Creation {
    /// Builds a fresh creation with a new id and the current time.
    pub fn new(name: impl Into<String>, html: impl Into<String>, original_image: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            html: html.into(),
            original_image,
            timestamp: Utc::now(),
        }
    }

    /// File name if one was uploaded, else the first characters of the
    /// prompt, else a fixed label.
    pub fn derive_name(file_name: Option<&str>, prompt: &str) -> String {
        if let Some(file_name) = file_name.filter(|value| !value.is_empty()) {
            return file_name.to_string();
        }
        if !prompt.is_empty() {
            return prompt.chars().take(PROMPT_NAME_MAX_CHARS).collect();
        }
        FALLBACK_CREATION_NAME.to_string()
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.original_image.as_deref() {
            Some(uri) if uri.starts_with("data:application/pdf") => SourceKind::Pdf,
            Some(_) => SourceKind::Image,
            None => SourceKind::None,
        }
    }

    pub fn export_file_name(&self) -> String {
        export_file_name(&self.name)
    }

    pub fn to_export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Lowercased name with every non-alphanumeric ASCII character replaced.
pub fn export_file_name(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}{EXPORT_FILE_SUFFIX}")
}

/// Loosely-typed creation record as found in imports, seeds and persisted
/// history. Only `html` and `name` are required; see [`Self::into_creation`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreationDescriptor {
    pub id: Option<String>,
    pub name: Option<String>,
    pub html: Option<String>,
    pub original_image: Option<String>,
    pub timestamp: Option<Value>,
}

impl CreationDescriptor {
    /// Only a JSON syntax error is `Malformed`. Text that parses but is not a
    /// creation object is a schema error.
    pub fn from_json(raw: &str) -> Result<Self, ImportValidationError> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_value(value)?)
    }

    pub fn from_value(value: Value) -> Result<Self, CreationSchemaError> {
        let Value::Object(mut record) = value else {
            return Err(CreationSchemaError::NotAnObject);
        };
        Ok(Self {
            id: text_field(&mut record, "id"),
            name: text_field(&mut record, "name"),
            html: text_field(&mut record, "html"),
            original_image: text_field(&mut record, "originalImage"),
            timestamp: record.remove("timestamp"),
        })
    }

    /// Validates required fields and fills in a fresh id and timestamp where
    /// the record omits them.
    pub fn into_creation(self) -> Result<Creation, CreationSchemaError> {
        let html = self
            .html
            .filter(|value| !value.is_empty())
            .ok_or(CreationSchemaError::MissingField("html"))?;
        let name = self
            .name
            .filter(|value| !value.is_empty())
            .ok_or(CreationSchemaError::MissingField("name"))?;
        let id = self
            .id
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Creation {
            id,
            name,
            html,
            original_image: self.original_image.filter(|value| !value.is_empty()),
            timestamp: parse_timestamp(self.timestamp.as_ref()),
        })
    }
}

/// Strings as-is, numbers stringified; any other shape reads as absent.
fn text_field(record: &mut Map<String, Value>, key: &str) -> Option<String> {
    match record.remove(key)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339 strings, naive ISO date-times and dates (read as UTC)
/// and epoch milliseconds. Missing or falsy values mean "now".
pub fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    let parsed = match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::String(raw)) if raw.trim().is_empty() => None,
        Some(Value::String(raw)) => {
            let parsed = parse_timestamp_text(raw.trim());
            if parsed.is_none() {
                tracing::warn!(timestamp = %raw, "unparseable creation timestamp; using now");
            }
            parsed
        }
        Some(Value::Number(number)) => {
            let millis = number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value.round() as i64))
                .unwrap_or_default();
            if millis == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(millis)
            }
        }
        Some(other) => {
            tracing::warn!(timestamp = %other, "unsupported creation timestamp type; using now");
            None
        }
    };
    parsed.unwrap_or_else(Utc::now)
}

fn parse_timestamp_text(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(timestamp))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::*;

    fn sample() -> Creation {
        Creation {
            id: "c-1".to_string(),
            name: "My Cool App!".to_string(),
            html: "<html><body>hi</body></html>".to_string(),
            original_image: Some("data:image/png;base64,AAAA".to_string()),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn derive_name_prefers_file_then_prompt_then_fallback() {
        assert_eq!(
            Creation::derive_name(Some("sketch.bmp"), "ignored"),
            "sketch.bmp"
        );
        assert_eq!(Creation::derive_name(None, "a calculator"), "a calculator");
        assert_eq!(
            Creation::derive_name(None, "an extremely detailed solar system"),
            "an extremely detaile"
        );
        assert_eq!(Creation::derive_name(Some(""), ""), FALLBACK_CREATION_NAME);
        assert_eq!(
            Creation::derive_name(None, "çàé日本語のテキストをここに書いてください"),
            "çàé日本語のテキストをここに書いてくだ"
        );
    }

    #[test]
    fn export_file_name_is_sanitized_and_lowercased() {
        assert_eq!(sample().export_file_name(), "my_cool_app__artifact.json");
        assert_eq!(export_file_name("Chess 2"), "chess_2_artifact.json");
        assert_eq!(export_file_name("naïve"), "na_ve_artifact.json");
    }

    #[test]
    fn export_record_shape() -> anyhow::Result<()> {
        let exported: Value = serde_json::from_str(&sample().to_export_json()?)?;
        assert_eq!(
            exported,
            json!({
                "id": "c-1",
                "name": "My Cool App!",
                "html": "<html><body>hi</body></html>",
                "originalImage": "data:image/png;base64,AAAA",
                "timestamp": "2025-03-01T12:30:00.000Z",
            })
        );

        let mut text_only = sample();
        text_only.original_image = None;
        let exported: Value = serde_json::from_str(&text_only.to_export_json()?)?;
        assert!(exported.get("originalImage").is_none());
        Ok(())
    }

    #[test]
    fn export_then_import_preserves_identity() -> anyhow::Result<()> {
        let original = sample();
        let restored = CreationDescriptor::from_json(&original.to_export_json()?)?.into_creation()?;
        assert_eq!(restored, original);
        Ok(())
    }

    #[test]
    fn descriptor_requires_html_and_name() -> anyhow::Result<()> {
        let missing_html = CreationDescriptor::from_value(json!({"name": "x"}))?;
        assert_eq!(
            missing_html.into_creation(),
            Err(CreationSchemaError::MissingField("html"))
        );

        let empty_name = CreationDescriptor::from_value(json!({"name": "", "html": "<p/>"}))?;
        assert_eq!(
            empty_name.into_creation(),
            Err(CreationSchemaError::MissingField("name"))
        );
        Ok(())
    }

    #[test]
    fn descriptor_fills_missing_id_and_timestamp() -> anyhow::Result<()> {
        let before = Utc::now();
        let creation = CreationDescriptor::from_value(json!({
            "name": "Chess",
            "html": "<canvas></canvas>",
            "id": "",
            "extra": "ignored",
        }))?
        .into_creation()?;
        assert!(!creation.id.is_empty());
        assert!(creation.timestamp >= before);
        assert_eq!(creation.source_kind(), SourceKind::None);
        Ok(())
    }

    #[test]
    fn descriptor_coerces_numbers_and_drops_other_shapes() -> anyhow::Result<()> {
        let creation = CreationDescriptor::from_value(json!({
            "id": 17,
            "name": "Chess",
            "html": "<p>c</p>",
            "originalImage": {"not": "a uri"},
        }))?
        .into_creation()?;
        assert_eq!(creation.id, "17");
        assert_eq!(creation.original_image, None);

        let nested_html = CreationDescriptor::from_value(json!({"name": "x", "html": ["<p/>"]}))?;
        assert_eq!(
            nested_html.into_creation(),
            Err(CreationSchemaError::MissingField("html"))
        );
        Ok(())
    }

    #[test]
    fn non_object_json_is_a_schema_error_not_malformed() {
        assert_eq!(
            CreationDescriptor::from_value(json!(42)),
            Err(CreationSchemaError::NotAnObject)
        );
        assert!(matches!(
            CreationDescriptor::from_json("[1, 2]"),
            Err(ImportValidationError::Schema(CreationSchemaError::NotAnObject))
        ));
        assert!(matches!(
            CreationDescriptor::from_json("{oops"),
            Err(ImportValidationError::Malformed(_))
        ));
    }

    #[test]
    fn timestamp_accepts_common_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap();
        assert_eq!(
            parse_timestamp(Some(&json!("2024-06-02T08:00:00.000Z"))),
            expected
        );
        assert_eq!(
            parse_timestamp(Some(&json!("2024-06-02T10:00:00+02:00"))),
            expected
        );
        assert_eq!(parse_timestamp(Some(&json!("2024-06-02T08:00:00"))), expected);
        assert_eq!(parse_timestamp(Some(&json!("2024-06-02T08:00"))), expected);
        assert_eq!(
            parse_timestamp(Some(&json!("2024-06-02"))),
            Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp(Some(&json!(expected.timestamp_millis()))),
            expected
        );

        let before = Utc::now();
        assert!(parse_timestamp(Some(&json!("yesterday-ish"))) >= before);
        assert!(parse_timestamp(Some(&json!(0))) >= before);
        assert!(parse_timestamp(None) >= before);
    }

    #[test]
    fn source_kind_follows_data_uri_prefix() {
        let mut creation = sample();
        assert_eq!(creation.source_kind(), SourceKind::Image);
        creation.original_image = Some("data:application/pdf;base64,JVBERi0=".to_string());
        assert_eq!(creation.source_kind(), SourceKind::Pdf);
    }
}
