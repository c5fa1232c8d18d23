//! Signaling Protocol
//!
//! Defines the events exchanged between clients and the coordinator, and the
//! length-prefixed JSON framing they travel in.
//!
//! Every frame is an envelope `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sent to a caller whose callee has no live connection
pub const USER_NOT_ONLINE: &str = "User is not online";

/// Chat-message notification. Relayed to clients exactly as received.
///
/// Only the two participant ids are typed. Everything else (text, file
/// attachment fields, timestamps) stays raw JSON, nulls included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ChatMessage {
    pub fn text(sender_id: &str, receiver_id: &str, message: &str) -> Self {
        let mut body = Map::new();
        body.insert("message".to_string(), Value::String(message.to_string()));
        Self {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            body,
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }

    /// Message text, if the client sent a string
    pub fn message(&self) -> Option<&str> {
        self.field("message")
    }

    pub fn file_name(&self) -> Option<&str> {
        self.field("fileName")
    }
}

/// Events a client sends to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum InboundEvent {
    AddUser(String),
    SendMsg(ChatMessage),
    CallUser {
        from_user_id: String,
        to_user_id: String,
        offer: Value,
    },
    AnswerCall {
        from_user_id: String,
        to_user_id: String,
        answer: Value,
    },
    IceCandidate {
        from_user_id: String,
        to_user_id: String,
        candidate: Value,
    },
    EndCall {
        from_user_id: String,
        to_user_id: String,
    },
}

/// Events the coordinator sends to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum OutboundEvent {
    OnlineUsers(Vec<String>),
    ShareMsg(ChatMessage),
    IncomingCall {
        from_user_id: String,
        offer: Value,
    },
    CallAnswered {
        from_user_id: String,
        answer: Value,
    },
    IceCandidate {
        from_user_id: String,
        candidate: Value,
    },
    CallEnded {
        from_user_id: String,
    },
    CallUnavailable {
        to_user_id: String,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame too large ({size} bytes, limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("Missing event name")]
    MissingEventName,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl InboundEvent {
    /// Event names this coordinator understands
    pub const KINDS: &'static [&'static str] = &[
        "addUser",
        "sendMsg",
        "callUser",
        "answerCall",
        "iceCandidate",
        "endCall",
    ];

    /// Decode one frame body.
    ///
    /// Returns `Ok(None)` for well-formed envelopes naming an event this
    /// coordinator doesn't know, so newer clients never break older servers.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let kind = match value.get("event").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Err(ProtocolError::MissingEventName),
        };
        if !Self::KINDS.contains(&kind.as_str()) {
            log::debug!("Ignoring unknown event kind {:?}", kind);
            return Ok(None);
        }

        let event: Self = serde_json::from_value(value)?;
        event.validate()?;
        Ok(Some(event))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::AddUser(_) => "addUser",
            InboundEvent::SendMsg(_) => "sendMsg",
            InboundEvent::CallUser { .. } => "callUser",
            InboundEvent::AnswerCall { .. } => "answerCall",
            InboundEvent::IceCandidate { .. } => "iceCandidate",
            InboundEvent::EndCall { .. } => "endCall",
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let ids: Vec<(&str, &str)> = match self {
            InboundEvent::AddUser(user_id) => vec![("userId", user_id.as_str())],
            InboundEvent::SendMsg(msg) => vec![
                ("senderId", msg.sender_id.as_str()),
                ("receiverId", msg.receiver_id.as_str()),
            ],
            InboundEvent::CallUser {
                from_user_id,
                to_user_id,
                ..
            }
            | InboundEvent::AnswerCall {
                from_user_id,
                to_user_id,
                ..
            }
            | InboundEvent::IceCandidate {
                from_user_id,
                to_user_id,
                ..
            }
            | InboundEvent::EndCall {
                from_user_id,
                to_user_id,
            } => vec![
                ("fromUserId", from_user_id.as_str()),
                ("toUserId", to_user_id.as_str()),
            ],
        };

        for (field, id) in ids {
            if id.trim().is_empty() {
                return Err(ProtocolError::InvalidPayload(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::OnlineUsers(_) => "onlineUsers",
            OutboundEvent::ShareMsg(_) => "shareMsg",
            OutboundEvent::IncomingCall { .. } => "incomingCall",
            OutboundEvent::CallAnswered { .. } => "callAnswered",
            OutboundEvent::IceCandidate { .. } => "iceCandidate",
            OutboundEvent::CallEnded { .. } => "callEnded",
            OutboundEvent::CallUnavailable { .. } => "callUnavailable",
        }
    }

    /// Serialize the event to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize an event from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Create a framed event with length prefix
    pub fn to_framed(&self) -> Result<Vec<u8>, serde_json::Error> {
        to_framed(self)
    }
}

/// Serialize with a 4-byte big-endian length prefix
pub fn to_framed<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let data = serde_json::to_vec(message)?;
    let len = (data.len() as u32).to_be_bytes();
    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len);
    framed.extend_from_slice(&data);
    Ok(framed)
}

/// Read one frame body. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e.into());
    }

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > max_len {
        return Err(ProtocolError::FrameTooLarge {
            size: msg_len,
            limit: max_len,
        });
    }

    let mut msg_buf = vec![0u8; msg_len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = to_framed(message)?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_add_user() {
        let bytes = br#"{"event":"addUser","data":"u1"}"#;
        let event = InboundEvent::decode(bytes).unwrap().unwrap();
        assert_eq!(event, InboundEvent::AddUser("u1".to_string()));
    }

    #[test]
    fn test_decode_call_user_keeps_offer_opaque() {
        let bytes = json!({
            "event": "callUser",
            "data": {
                "fromUserId": "a",
                "toUserId": "b",
                "offer": {"type": "offer", "sdp": "v=0\r\n"}
            }
        })
        .to_string();

        match InboundEvent::decode(bytes.as_bytes()).unwrap().unwrap() {
            InboundEvent::CallUser {
                from_user_id,
                to_user_id,
                offer,
            } => {
                assert_eq!(from_user_id, "a");
                assert_eq!(to_user_id, "b");
                assert_eq!(offer["sdp"], "v=0\r\n");
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let bytes = br#"{"event":"typing","data":{"fromUserId":"a"}}"#;
        assert!(InboundEvent::decode(bytes).unwrap().is_none());
    }

    #[test]
    fn test_missing_event_name_is_malformed() {
        let result = InboundEvent::decode(br#"{"data":"u1"}"#);
        assert!(matches!(result, Err(ProtocolError::MissingEventName)));
    }

    #[test]
    fn test_missing_payload_field_is_malformed() {
        let bytes = br#"{"event":"endCall","data":{"fromUserId":"a"}}"#;
        assert!(matches!(
            InboundEvent::decode(bytes),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_missing_offer_is_malformed() {
        let bytes = br#"{"event":"callUser","data":{"fromUserId":"a","toUserId":"b"}}"#;
        assert!(InboundEvent::decode(bytes).is_err());
    }

    #[test]
    fn test_empty_id_is_malformed() {
        let bytes = br#"{"event":"iceCandidate","data":{"fromUserId":"a","toUserId":"","candidate":{}}}"#;
        assert!(matches!(
            InboundEvent::decode(bytes),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_chat_message_preserves_extra_fields() {
        let bytes = json!({
            "event": "sendMsg",
            "data": {
                "senderId": "a",
                "receiverId": "b",
                "message": "",
                "fileUrl": "/uploads/cat.png",
                "fileType": "image/png",
                "fileName": "cat.png",
                "time": "10:42"
            }
        })
        .to_string();

        let msg = match InboundEvent::decode(bytes.as_bytes()).unwrap().unwrap() {
            InboundEvent::SendMsg(msg) => msg,
            other => panic!("Wrong event: {:?}", other),
        };
        assert_eq!(msg.file_name(), Some("cat.png"));

        let out = serde_json::to_value(OutboundEvent::ShareMsg(msg)).unwrap();
        assert_eq!(out["event"], "shareMsg");
        assert_eq!(out["data"]["time"], "10:42");
        assert_eq!(out["data"]["fileUrl"], "/uploads/cat.png");
        assert_eq!(out["data"]["senderId"], "a");
    }

    #[test]
    fn test_message_text_is_optional() {
        let bytes = br#"{"event":"sendMsg","data":{"senderId":"a","receiverId":"b"}}"#;
        match InboundEvent::decode(bytes).unwrap().unwrap() {
            InboundEvent::SendMsg(msg) => {
                assert_eq!(msg.message(), None);
                assert!(msg.body.is_empty());
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    fn relayed_data(data: Value) -> Value {
        let bytes = json!({"event": "sendMsg", "data": data}).to_string();
        let msg = match InboundEvent::decode(bytes.as_bytes()).unwrap().unwrap() {
            InboundEvent::SendMsg(msg) => msg,
            other => panic!("Wrong event: {:?}", other),
        };
        let out = serde_json::to_value(OutboundEvent::ShareMsg(msg)).unwrap();
        assert_eq!(out["event"], "shareMsg");
        out["data"].clone()
    }

    #[test]
    fn test_null_file_fields_are_relayed_unchanged() {
        let data = json!({
            "senderId": "a",
            "receiverId": "b",
            "message": "hi",
            "fileUrl": null,
            "fileType": null,
            "fileName": null
        });
        assert_eq!(relayed_data(data.clone()), data);
    }

    #[test]
    fn test_null_message_is_relayed_unchanged() {
        let data = json!({
            "senderId": "a",
            "receiverId": "b",
            "message": null,
            "fileUrl": "/uploads/report.pdf"
        });
        assert_eq!(relayed_data(data.clone()), data);
    }

    #[test]
    fn test_kinds_match_kind_names() {
        let samples = [
            InboundEvent::AddUser("a".to_string()),
            InboundEvent::SendMsg(ChatMessage::text("a", "b", "hi")),
            InboundEvent::CallUser {
                from_user_id: "a".to_string(),
                to_user_id: "b".to_string(),
                offer: json!({}),
            },
            InboundEvent::AnswerCall {
                from_user_id: "b".to_string(),
                to_user_id: "a".to_string(),
                answer: json!({}),
            },
            InboundEvent::IceCandidate {
                from_user_id: "a".to_string(),
                to_user_id: "b".to_string(),
                candidate: json!({}),
            },
            InboundEvent::EndCall {
                from_user_id: "a".to_string(),
                to_user_id: "b".to_string(),
            },
        ];

        let kinds: Vec<&str> = samples.iter().map(InboundEvent::kind).collect();
        assert_eq!(kinds, InboundEvent::KINDS);
        for event in &samples {
            let wire = serde_json::to_value(event).unwrap();
            assert_eq!(wire["event"], event.kind());
        }
    }

    #[test]
    fn test_outbound_wire_names() {
        let msg = OutboundEvent::CallUnavailable {
            to_user_id: "b".to_string(),
            message: USER_NOT_ONLINE.to_string(),
        };
        let json = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""event":"callUnavailable""#));
        assert!(json.contains(r#""toUserId":"b""#));

        let online = serde_json::to_value(OutboundEvent::OnlineUsers(vec!["u1".into()])).unwrap();
        assert_eq!(online, json!({"event": "onlineUsers", "data": ["u1"]}));
    }

    #[test]
    fn test_framed_message() {
        let msg = OutboundEvent::CallEnded {
            from_user_id: "a".to_string(),
        };
        let framed = msg.to_framed().unwrap();

        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]);
        assert_eq!(len as usize, framed.len() - 4);
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut data = (2048u32).to_be_bytes().to_vec();
        data.extend_from_slice(&[b' '; 16]);
        let mut reader: &[u8] = &data;

        let result = read_frame(&mut reader, 1024).await;
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size: 2048, limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_frame() {
        let event = InboundEvent::EndCall {
            from_user_id: "a".to_string(),
            to_user_id: "b".to_string(),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &event).await.unwrap();

        let mut reader: &[u8] = &buf;
        let body = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(InboundEvent::decode(&body).unwrap(), Some(event));
    }
}
