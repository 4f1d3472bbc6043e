//! Wire message envelope
//!
//! Every inbound payload is classified exactly once by `Message::decode`:
//! control tokens by their literal text, JSON objects by their discriminating
//! key. Handlers then dispatch with a single `match`.

use crate::core::model::{AllocationResult, Confirmation, ConfirmationVerb, Request};
use serde_json::Value;
use thiserror::Error;

pub const PING_SERVER: &str = "PING_SERVER";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const PONG: &str = "PONG";
pub const RESET_SEMESTER: &str = "RESET_SEMESTRE";
pub const SEMESTER_RESET_OK: &str = "SEMESTRE_RESET_OK";
pub const SEMESTER_UNCHANGED: &str = "SEMESTRE_SIN_CAMBIOS";
pub const SIMULATE_FAILURE: &str = "SIMULAR_FALLA";
pub const FAILURE_SIMULATED: &str = "FALLA_SIMULADA";
pub const ACTIVATE_REPLICA: &str = "ACTIVAR_REPLICA";
pub const REPLICA_ACTIVATED: &str = "REPLICA_ACTIVADA";
pub const REPLICA_NOT_ENABLED: &str = "REPLICA_NO_HABILITADA";
/// Broker worker readiness token
pub const READY: &str = "READY";

/// Protocol-level failures: framing, encoding and unknown payloads
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid semester in '{0}'")]
    InvalidSemester(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Unexpected {0} message")]
    Unexpected(&'static str),
}

/// Every message either side of the wire can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    Heartbeat,
    Pong,
    ResetSemester(u32),
    SemesterResetOk(u32),
    SemesterUnchanged(u32),
    SimulateFailure,
    FailureSimulated,
    ActivateReplica,
    ReplicaActivated,
    ReplicaNotEnabled,
    Ready,
    Request(Request),
    Result(AllocationResult),
    Confirmation(Confirmation),
    /// Fixed acknowledgement of a confirmation
    Ack(ConfirmationVerb),
}

impl Message {
    /// Classify a payload. Surrounding whitespace is ignored.
    pub fn decode(payload: &str) -> Result<Self, ProtocolError> {
        let text = payload.trim();

        match text {
            PING_SERVER => return Ok(Message::Ping),
            HEARTBEAT => return Ok(Message::Heartbeat),
            PONG => return Ok(Message::Pong),
            SIMULATE_FAILURE => return Ok(Message::SimulateFailure),
            FAILURE_SIMULATED => return Ok(Message::FailureSimulated),
            ACTIVATE_REPLICA => return Ok(Message::ActivateReplica),
            REPLICA_ACTIVATED => return Ok(Message::ReplicaActivated),
            REPLICA_NOT_ENABLED => return Ok(Message::ReplicaNotEnabled),
            READY => return Ok(Message::Ready),
            _ => {}
        }

        if let Some(verb) = [ConfirmationVerb::Accept, ConfirmationVerb::Reject]
            .into_iter()
            .find(|verb| verb.ack() == text)
        {
            return Ok(Message::Ack(verb));
        }

        if let Some((token, arg)) = text.split_once(':') {
            let parse = || {
                arg.trim()
                    .parse::<u32>()
                    .map_err(|_| ProtocolError::InvalidSemester(text.to_string()))
            };
            match token {
                RESET_SEMESTER => return parse().map(Message::ResetSemester),
                SEMESTER_RESET_OK => return parse().map(Message::SemesterResetOk),
                SEMESTER_UNCHANGED => return parse().map(Message::SemesterUnchanged),
                _ => {}
            }
        }

        if text.starts_with('{') {
            return Self::decode_json(text);
        }

        Err(ProtocolError::UnknownMessage(preview(text)))
    }

    fn decode_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let object = match value.as_object() {
            Some(object) => object,
            None => return Err(ProtocolError::UnknownMessage(preview(text))),
        };

        if object.contains_key("encabezado") {
            Ok(Message::Confirmation(serde_json::from_value(value)?))
        } else if object.contains_key("infoGeneral") {
            Ok(Message::Result(serde_json::from_value(value)?))
        } else if object.contains_key("programa") {
            Ok(Message::Request(serde_json::from_value(value)?))
        } else {
            Err(ProtocolError::UnknownMessage(preview(text)))
        }
    }

    /// Wire text for this message
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let text = match self {
            Message::Ping => PING_SERVER.to_string(),
            Message::Heartbeat => HEARTBEAT.to_string(),
            Message::Pong => PONG.to_string(),
            Message::ResetSemester(n) => format!("{}:{}", RESET_SEMESTER, n),
            Message::SemesterResetOk(n) => format!("{}:{}", SEMESTER_RESET_OK, n),
            Message::SemesterUnchanged(n) => format!("{}:{}", SEMESTER_UNCHANGED, n),
            Message::SimulateFailure => SIMULATE_FAILURE.to_string(),
            Message::FailureSimulated => FAILURE_SIMULATED.to_string(),
            Message::ActivateReplica => ACTIVATE_REPLICA.to_string(),
            Message::ReplicaActivated => REPLICA_ACTIVATED.to_string(),
            Message::ReplicaNotEnabled => REPLICA_NOT_ENABLED.to_string(),
            Message::Ready => READY.to_string(),
            Message::Request(request) => serde_json::to_string(request)?,
            Message::Result(result) => serde_json::to_string(result)?,
            Message::Confirmation(confirmation) => serde_json::to_string(confirmation)?,
            Message::Ack(verb) => verb.ack().to_string(),
        };
        Ok(text)
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping => "ping",
            Message::Heartbeat => "heartbeat",
            Message::Pong => "pong",
            Message::ResetSemester(_) => "reset_semester",
            Message::SemesterResetOk(_) => "semester_reset_ok",
            Message::SemesterUnchanged(_) => "semester_unchanged",
            Message::SimulateFailure => "simulate_failure",
            Message::FailureSimulated => "failure_simulated",
            Message::ActivateReplica => "activate_replica",
            Message::ReplicaActivated => "replica_activated",
            Message::ReplicaNotEnabled => "replica_not_enabled",
            Message::Ready => "ready",
            Message::Request(_) => "request",
            Message::Result(_) => "result",
            Message::Confirmation(_) => "confirmation",
            Message::Ack(_) => "ack",
        }
    }

    /// Liveness tokens update link health and are never matched to requests
    #[inline]
    pub fn is_liveness(&self) -> bool {
        matches!(self, Message::Ping | Message::Heartbeat | Message::Pong)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::AllocationOutcome;

    #[test]
    fn test_decode_control_tokens() {
        assert_eq!(Message::decode("PING_SERVER").unwrap(), Message::Ping);
        assert_eq!(Message::decode("HEARTBEAT").unwrap(), Message::Heartbeat);
        assert_eq!(Message::decode(" PONG\n").unwrap(), Message::Pong);
        assert_eq!(Message::decode("SIMULAR_FALLA").unwrap(), Message::SimulateFailure);
        assert_eq!(Message::decode("ACTIVAR_REPLICA").unwrap(), Message::ActivateReplica);
        assert_eq!(
            Message::decode("REPLICA_NO_HABILITADA").unwrap(),
            Message::ReplicaNotEnabled
        );
        assert_eq!(Message::decode("READY").unwrap(), Message::Ready);
        assert_eq!(
            Message::decode("CONFIRMADO RECHAZO").unwrap(),
            Message::Ack(ConfirmationVerb::Reject)
        );
    }

    #[test]
    fn test_decode_semester_tokens() {
        assert_eq!(Message::decode("RESET_SEMESTRE:2").unwrap(), Message::ResetSemester(2));
        assert_eq!(
            Message::decode("SEMESTRE_RESET_OK:2").unwrap(),
            Message::SemesterResetOk(2)
        );
        assert_eq!(
            Message::decode("SEMESTRE_SIN_CAMBIOS:1").unwrap(),
            Message::SemesterUnchanged(1)
        );
        assert!(matches!(
            Message::decode("RESET_SEMESTRE:dos"),
            Err(ProtocolError::InvalidSemester(_))
        ));
    }

    #[test]
    fn test_decode_json_by_key() {
        let request = Request::new("Ingenieria", "Sistemas", 1, 5, 2);
        let text = Message::Request(request.clone()).encode().unwrap();
        assert_eq!(Message::decode(&text).unwrap(), Message::Request(request));

        let result = AllocationResult::from_outcome(AllocationOutcome::new(2, 0, 5), "Sistemas");
        let text = Message::Result(result.clone()).encode().unwrap();
        assert_eq!(Message::decode(&text).unwrap(), Message::Result(result.clone()));

        let confirmation = Confirmation::new(ConfirmationVerb::Accept, "Sistemas", result);
        let text = Message::Confirmation(confirmation.clone()).encode().unwrap();
        assert_eq!(
            Message::decode(&text).unwrap(),
            Message::Confirmation(confirmation)
        );
    }

    #[test]
    fn test_decode_rejects_unknown() {
        assert!(matches!(
            Message::decode("HOLA"),
            Err(ProtocolError::UnknownMessage(_))
        ));
        assert!(matches!(
            Message::decode(r#"{"foo": 1}"#),
            Err(ProtocolError::UnknownMessage(_))
        ));
        assert!(matches!(Message::decode("{not json"), Err(ProtocolError::Json(_))));
        // Request shape with a missing field
        assert!(matches!(
            Message::decode(r#"{"programa":"X"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_encode_semester_tokens() {
        assert_eq!(Message::ResetSemester(3).encode().unwrap(), "RESET_SEMESTRE:3");
        assert_eq!(Message::SemesterUnchanged(3).encode().unwrap(), "SEMESTRE_SIN_CAMBIOS:3");
    }

    #[test]
    fn test_liveness_classification() {
        assert!(Message::Pong.is_liveness());
        assert!(Message::Heartbeat.is_liveness());
        assert!(!Message::Ready.is_liveness());
    }
}
