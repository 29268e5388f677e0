//! JSON request and response bodies.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rollcall_core::{StoreError, StudentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image is empty")]
    EmptyImage,
    #[error(transparent)]
    StudentId(#[from] StoreError),
}

/// Student identifiers arrive as JSON strings or integers and are echoed
/// back in the form they arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStudentId {
    Text(String),
    Number(i64),
}

impl RawStudentId {
    pub fn validate(&self) -> Result<StudentId, PayloadError> {
        let raw = match self {
            RawStudentId::Text(s) => s.clone(),
            RawStudentId::Number(n) => n.to_string(),
        };
        Ok(StudentId::parse(raw)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub student_id: RawStudentId,
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub student_id: RawStudentId,
}

impl RegisterResponse {
    pub fn registered(student_id: RawStudentId) -> Self {
        Self {
            status: "success",
            message: "Face registered successfully",
            student_id,
        }
    }
}

/// `/verify` body. The shape depends on the configured match strategy.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VerifyResponse {
    Scan {
        status: &'static str,
        verified: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        student_id: Option<String>,
        /// Raw distance under the configured metric; lower is closer.
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<&'static str>,
    },
    Search {
        status: &'static str,
        matched: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        student_id: Option<String>,
    },
}

/// Decode a base64 image, tolerating a `data:<mime>;base64,` prefix and
/// whitespace anywhere in the body (MIME-style line wrapping included).
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, PayloadError> {
    let trimmed = encoded.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,").map_or(trimmed, |(_, data)| data),
        None => trimmed,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact)?;
    if bytes.is_empty() {
        return Err(PayloadError::EmptyImage);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_decode_plain_and_data_url() {
        assert_eq!(decode_image("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_image("  aGVsbG8=\n").unwrap(), b"hello");
        assert_eq!(decode_image("data:image/jpeg;base64,aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_line_wrapped() {
        let data: Vec<u8> = (0..=255u8).collect();
        let encoded = STANDARD.encode(&data);
        let wrapped: Vec<String> = encoded
            .as_bytes()
            .chunks(76)
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect();

        assert_eq!(decode_image(&wrapped.join("\n")).unwrap(), data);
        assert_eq!(decode_image(&wrapped.join("\r\n")).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_garbage_and_empty() {
        assert!(matches!(decode_image("not base64!!"), Err(PayloadError::Base64(_))));
        assert!(matches!(decode_image(""), Err(PayloadError::EmptyImage)));
        assert!(matches!(
            decode_image("data:image/png;base64,"),
            Err(PayloadError::EmptyImage)
        ));
    }

    fn register_request(student_id: Value) -> RegisterRequest {
        serde_json::from_value(json!({"student_id": student_id, "image": ""})).unwrap()
    }

    #[test]
    fn test_student_id_string_or_number() {
        let req = register_request(json!(2024001));
        assert_eq!(req.student_id.validate().unwrap().as_str(), "2024001");

        let req = register_request(json!("s-7"));
        assert_eq!(req.student_id.validate().unwrap().as_str(), "s-7");

        let req = register_request(json!("../x"));
        assert!(req.student_id.validate().is_err());

        let bad = json!({"student_id": true, "image": ""});
        assert!(serde_json::from_value::<RegisterRequest>(bad).is_err());
    }

    #[test]
    fn test_register_response_echoes_id_as_sent() {
        let numeric = serde_json::to_value(RegisterResponse::registered(RawStudentId::Number(17)));
        assert_eq!(numeric.unwrap()["student_id"], json!(17));

        let text = RegisterResponse::registered(RawStudentId::Text("17".into()));
        assert_eq!(serde_json::to_value(text).unwrap()["student_id"], json!("17"));
    }

    #[test]
    fn test_verify_response_shapes() {
        let scan = serde_json::to_value(VerifyResponse::Scan {
            status: "success",
            verified: false,
            student_id: None,
            confidence: None,
            message: Some("No matching face found"),
        })
        .unwrap();
        assert_eq!(
            scan,
            json!({"status": "success", "verified": false, "message": "No matching face found"})
        );

        let search = serde_json::to_value(VerifyResponse::Search {
            status: "success",
            matched: true,
            student_id: Some("7".into()),
        })
        .unwrap();
        assert_eq!(search, json!({"status": "success", "matched": true, "student_id": "7"}));
    }
}
