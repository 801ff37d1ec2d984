use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::WS_MAX_MESSAGE_SIZE;

/// Server-assigned identifier of an uploaded map.
///
/// The server emits database ids as JSON numbers, but the identifier is
/// opaque to the client, so strings are accepted too. Whatever form the
/// server used is echoed back in [`SubscribeRequest`]; correlation goes
/// through [`UploadId::key`], so `42` and `"42"` name the same upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadId {
    Number(u64),
    Text(String),
}

impl UploadId {
    /// Canonical text used to correlate push messages with uploads.
    pub fn key(&self) -> String {
        match self {
            UploadId::Number(n) => n.to_string(),
            UploadId::Text(s) => s.clone(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, UploadId::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadId::Number(n) => write!(f, "{n}"),
            UploadId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for UploadId {
    fn from(n: u64) -> Self {
        UploadId::Number(n)
    }
}

impl From<&str> for UploadId {
    fn from(s: &str) -> Self {
        UploadId::Text(s.to_string())
    }
}

impl From<String> for UploadId {
    fn from(s: String) -> Self {
        UploadId::Text(s)
    }
}

/// JSON body returned by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UploadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    /// Identifier to track, if the server enabled live progress for this
    /// upload. A blank string counts as absent.
    pub fn upload_id(&self) -> Option<&UploadId> {
        self.id.as_ref().filter(|id| !id.is_blank())
    }

    /// Server-supplied failure reason, ignoring blank strings.
    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// Client → server: start forwarding progress for `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "m")]
    pub target: UploadId,
}

impl SubscribeRequest {
    pub fn new(target: UploadId) -> Self {
        Self { target }
    }

    /// Encodes the request as a text frame payload.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server → client: `target` has reached `ratio` in post-processing `phase`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(rename = "m")]
    pub target: UploadId,
    #[serde(rename = "t")]
    pub phase: String,
    #[serde(rename = "p")]
    pub ratio: f64,
}

impl ProgressUpdate {
    /// Decodes a text frame, rejecting oversized frames and non-finite
    /// ratios. Ratios outside `[0, 1]` are clamped.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > WS_MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(text.len()));
        }
        let mut update: ProgressUpdate = serde_json::from_str(text)?;
        if !update.ratio.is_finite() {
            return Err(ProtocolError::InvalidRatio);
        }
        update.ratio = update.ratio.clamp(0.0, 1.0);
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_response_with_string_id() {
        let resp: UploadResponse =
            serde_json::from_str(r#"{"success":true,"name":"de_dust2.bsp","id":"42"}"#).unwrap();
        assert!(resp.success);
        assert_eq!(resp.name.as_deref(), Some("de_dust2.bsp"));
        assert_eq!(resp.upload_id(), Some(&UploadId::Text("42".into())));
    }

    #[test]
    fn upload_response_with_numeric_id() {
        let resp: UploadResponse = serde_json::from_str(r#"{"success":true,"id":7}"#).unwrap();
        assert_eq!(resp.upload_id(), Some(&UploadId::Number(7)));
        assert_eq!(resp.upload_id().unwrap().key(), "7");
    }

    #[test]
    fn upload_response_blank_id_is_absent() {
        let resp: UploadResponse = serde_json::from_str(r#"{"success":true,"id":"  "}"#).unwrap();
        assert!(resp.upload_id().is_none());
    }

    #[test]
    fn upload_response_failure() {
        let resp: UploadResponse =
            serde_json::from_str(r#"{"success":false,"error":"File already exists."}"#).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error_message(), Some("File already exists."));
        assert!(resp.upload_id().is_none());
    }

    #[test]
    fn upload_response_requires_success_flag() {
        assert!(serde_json::from_str::<UploadResponse>(r#"{"id":"1"}"#).is_err());
    }

    #[test]
    fn subscribe_echoes_id_form() {
        let text = SubscribeRequest::new(UploadId::Number(42)).to_json().unwrap();
        assert_eq!(text, r#"{"m":42}"#);

        let text = SubscribeRequest::new("42".into()).to_json().unwrap();
        assert_eq!(text, r#"{"m":"42"}"#);
    }

    #[test]
    fn numeric_and_text_ids_share_a_key() {
        assert_eq!(UploadId::Number(42).key(), UploadId::from("42").key());
    }

    #[test]
    fn progress_update_parses_short_fields() {
        let update = ProgressUpdate::parse(r#"{"m":"42","t":"compression","p":0.5}"#).unwrap();
        assert_eq!(update.target, UploadId::from("42"));
        assert_eq!(update.phase, "compression");
        assert!((update.ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_update_clamps_ratio() {
        let update = ProgressUpdate::parse(r#"{"m":1,"t":"x","p":1.7}"#).unwrap();
        assert_eq!(update.ratio, 1.0);
        let update = ProgressUpdate::parse(r#"{"m":1,"t":"x","p":-0.2}"#).unwrap();
        assert_eq!(update.ratio, 0.0);
    }

    #[test]
    fn progress_update_rejects_missing_fields() {
        assert!(ProgressUpdate::parse(r#"{"m":"42","p":0.5}"#).is_err());
        assert!(ProgressUpdate::parse(r#"{"t":"compression","p":0.5}"#).is_err());
        assert!(ProgressUpdate::parse("not json").is_err());
    }

    #[test]
    fn progress_update_rejects_oversized_frame() {
        let huge = "x".repeat(WS_MAX_MESSAGE_SIZE + 1);
        assert!(matches!(
            ProgressUpdate::parse(&huge),
            Err(ProtocolError::TooLarge(_))
        ));
    }
}
