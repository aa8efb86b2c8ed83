//! Recipient signing session.
//!
//! Per-recipient client flow:
//! `loading -> fields_pending -> signing(field) -> fields_complete -> submitted`.
//!
//! Only one field is being captured at a time (modal capture). Nothing is
//! written server-side until the whole batch is submitted; abandoning the
//! session at any earlier point has no effect.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use esign_types::{ToolType, ToolValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    FieldsPending,
    Signing,
    FieldsComplete,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is {0:?}, expected {1:?}")]
    WrongPhase(SessionPhase, SessionPhase),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("capture source does not fit a {0} field")]
    IncompatibleCapture(ToolType),
}

/// Where a signature value comes from. All three image sources normalize to
/// the same opaque payload before submission.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// The recipient's previously saved signature (they are also a
    /// registered user). Already a data URL.
    Saved { data_url: String },
    /// A freshly drawn stroke, exported by the canvas as a data URL.
    Drawn { data_url: String },
    /// An uploaded image file.
    Upload { bytes: Vec<u8>, mime: String },
    /// Typed text for email / full-name fields.
    Typed { text: String },
}

impl CaptureSource {
    fn normalize(self, tool_type: ToolType) -> Result<ToolValue, SessionError> {
        match (self, tool_type.takes_signature_image()) {
            (Self::Saved { data_url } | Self::Drawn { data_url }, true) => {
                Ok(ToolValue::SignatureImage(data_url))
            }
            (Self::Upload { bytes, mime }, true) => Ok(ToolValue::SignatureImage(format!(
                "data:{mime};base64,{}",
                BASE64.encode(bytes)
            ))),
            (Self::Typed { text }, false) => Ok(ToolValue::Text(text)),
            _ => Err(SessionError::IncompatibleCapture(tool_type)),
        }
    }
}

/// One field the recipient still has to fill, plus its captured value once
/// they have.
#[derive(Debug, Clone)]
pub struct SessionField {
    pub tool_id: String,
    pub tool_type: ToolType,
    pub label: String,
    pub captured: Option<ToolValue>,
}

/// One entry of the batched sign request sent at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSubmission {
    pub tool_id: String,
    pub value: ToolValue,
}

#[derive(Debug, Clone)]
pub struct SigningSession {
    phase: SessionPhase,
    fields: Vec<SessionField>,
    active: Option<usize>,
}

impl SigningSession {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Loading,
            fields: Vec::new(),
            active: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn fields(&self) -> &[SessionField] {
        &self.fields
    }

    /// Document and field data arrived from the published-document fetch.
    pub fn loaded(&mut self, fields: Vec<SessionField>) -> Result<(), SessionError> {
        self.expect(SessionPhase::Loading)?;
        let all_captured = fields.iter().all(|f| f.captured.is_some());
        self.phase = if !fields.is_empty() && all_captured {
            SessionPhase::FieldsComplete
        } else {
            SessionPhase::FieldsPending
        };
        self.fields = fields;
        Ok(())
    }

    /// The recipient selected one of their pending fields for capture.
    pub fn begin(&mut self, tool_id: &str) -> Result<(), SessionError> {
        self.expect(SessionPhase::FieldsPending)?;
        let idx = self
            .fields
            .iter()
            .position(|f| f.tool_id == tool_id)
            .ok_or_else(|| SessionError::UnknownField(tool_id.to_string()))?;
        self.active = Some(idx);
        self.phase = SessionPhase::Signing;
        Ok(())
    }

    /// Capture a value for the active field and leave the modal.
    pub fn capture(&mut self, source: CaptureSource) -> Result<(), SessionError> {
        self.expect(SessionPhase::Signing)?;
        let idx = self
            .active
            .take()
            .ok_or(SessionError::WrongPhase(self.phase, SessionPhase::Signing))?;
        let value = source.normalize(self.fields[idx].tool_type)?;
        self.fields[idx].captured = Some(value);

        self.phase = if self.fields.iter().all(|f| f.captured.is_some()) {
            SessionPhase::FieldsComplete
        } else {
            SessionPhase::FieldsPending
        };
        Ok(())
    }

    /// Back out of the capture modal without keeping anything.
    pub fn cancel_capture(&mut self) -> Result<(), SessionError> {
        self.expect(SessionPhase::Signing)?;
        self.active = None;
        self.phase = SessionPhase::FieldsPending;
        Ok(())
    }

    /// The batched submission body. Only available once every field holds a
    /// captured value; the server applies these in one request.
    pub fn submission(&self) -> Result<Vec<FieldSubmission>, SessionError> {
        if self.phase != SessionPhase::FieldsComplete {
            return Err(SessionError::WrongPhase(
                self.phase,
                SessionPhase::FieldsComplete,
            ));
        }
        Ok(self
            .fields
            .iter()
            .filter_map(|f| {
                f.captured.as_ref().map(|value| FieldSubmission {
                    tool_id: f.tool_id.clone(),
                    value: value.clone(),
                })
            })
            .collect())
    }

    /// The server accepted the batch. Terminal.
    pub fn mark_submitted(&mut self) -> Result<(), SessionError> {
        self.expect(SessionPhase::FieldsComplete)?;
        self.phase = SessionPhase::Submitted;
        Ok(())
    }

    fn expect(&self, phase: SessionPhase) -> Result<(), SessionError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(SessionError::WrongPhase(self.phase, phase))
        }
    }
}

impl Default for SigningSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: &str, tool_type: ToolType) -> SessionField {
        SessionField {
            tool_id: id.into(),
            tool_type,
            label: String::new(),
            captured: None,
        }
    }

    fn drawn() -> CaptureSource {
        CaptureSource::Drawn {
            data_url: "data:image/png;base64,iVBOR".into(),
        }
    }

    #[test]
    fn full_session_walk() {
        let mut session = SigningSession::new();
        session
            .loaded(vec![
                field("t1", ToolType::RecipientSignature),
                field("t2", ToolType::RecipientFullname),
            ])
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::FieldsPending);

        session.begin("t1").unwrap();
        assert_eq!(session.phase(), SessionPhase::Signing);
        session.capture(drawn()).unwrap();
        assert_eq!(session.phase(), SessionPhase::FieldsPending);

        session.begin("t2").unwrap();
        session
            .capture(CaptureSource::Typed {
                text: "Ann Example".into(),
            })
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::FieldsComplete);

        let batch = session.submission().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].value, ToolValue::Text("Ann Example".into()));

        session.mark_submitted().unwrap();
        assert_eq!(session.phase(), SessionPhase::Submitted);
        assert!(session.mark_submitted().is_err());
    }

    #[test]
    fn only_one_field_captures_at_a_time() {
        let mut session = SigningSession::new();
        session
            .loaded(vec![
                field("t1", ToolType::RecipientSignature),
                field("t2", ToolType::RecipientSignature),
            ])
            .unwrap();
        session.begin("t1").unwrap();
        // Cannot begin a second capture while the modal is open.
        assert!(matches!(
            session.begin("t2"),
            Err(SessionError::WrongPhase(SessionPhase::Signing, _))
        ));
    }

    #[test]
    fn cancel_capture_discards_nothing_captured() {
        let mut session = SigningSession::new();
        session
            .loaded(vec![field("t1", ToolType::RecipientSignature)])
            .unwrap();
        session.begin("t1").unwrap();
        session.cancel_capture().unwrap();
        assert_eq!(session.phase(), SessionPhase::FieldsPending);
        assert!(session.fields()[0].captured.is_none());
        assert!(session.submission().is_err());
    }

    #[test]
    fn upload_normalizes_to_data_url() {
        let value = CaptureSource::Upload {
            bytes: vec![0x89, 0x50, 0x4E, 0x47],
            mime: "image/png".into(),
        }
        .normalize(ToolType::RecipientInitial)
        .unwrap();
        match value {
            ToolValue::SignatureImage(url) => {
                assert!(url.starts_with("data:image/png;base64,"));
            }
            other => panic!("expected signature image, got {other:?}"),
        }
    }

    #[test]
    fn typed_text_rejected_for_signature_fields() {
        let result = CaptureSource::Typed {
            text: "Ann".into(),
        }
        .normalize(ToolType::RecipientSignature);
        assert!(matches!(result, Err(SessionError::IncompatibleCapture(_))));
    }

    #[test]
    fn empty_field_list_stays_pending() {
        // A recipient with nothing to sign never reaches fields_complete.
        let mut session = SigningSession::new();
        session.loaded(vec![]).unwrap();
        assert_eq!(session.phase(), SessionPhase::FieldsPending);
        assert!(session.submission().is_err());
    }
}
