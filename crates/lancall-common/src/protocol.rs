//! Wire message types for the direct signaling channel.
//!
//! Each frame body is a UTF-8 JSON object carrying a `type` discriminator.
//! The envelope formats match the peer on the other end of the wire:
//!
//! | type                | fields                                              |
//! |---------------------|-----------------------------------------------------|
//! | `offer`             | `content`: raw SDP string                           |
//! | `answer`            | `content`: raw SDP string                           |
//! | `candidate`         | `content`: JSON string `{sdpMid, sdpMLineIndex, sdp}` |
//! | `remove-candidates` | `candidates`: array of candidate objects            |
//! | `heartbeat`         | none                                                |
//!
//! Unknown `type` values decode to [`SignalMessage::Unknown`] and are
//! dropped by the receiver; they are not an error.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// An opaque ICE candidate record, relayed between media engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: i32,
    pub sdp: String,
}

/// A decoded signaling frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Remote session description offer.
    Offer { sdp: String },
    /// Remote session description answer.
    Answer { sdp: String },
    /// A single remote ICE candidate.
    Candidate(IceCandidate),
    /// Batch removal of previously signaled candidates.
    RemoveCandidates(Vec<IceCandidate>),
    /// Keep-alive frame, inert on receive.
    Heartbeat,
    /// Recognized frame with an unrecognized tag; dropped, never an error.
    Unknown(String),
}

impl SignalMessage {
    /// Wire tag for this message.
    pub fn tag(&self) -> &str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate(_) => "candidate",
            Self::RemoveCandidates(_) => "remove-candidates",
            Self::Heartbeat => "heartbeat",
            Self::Unknown(tag) => tag,
        }
    }

    /// Serialize into the JSON envelope carried inside a frame.
    ///
    /// [`SignalMessage::Unknown`] is receive-only and refuses to encode.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Offer { sdp } => json!({ "type": "offer", "content": sdp }),
            Self::Answer { sdp } => json!({ "type": "answer", "content": sdp }),
            Self::Candidate(candidate) => {
                let content = serde_json::to_string(candidate)
                    .map_err(|err| Error::protocol(format!("candidate encode: {err}")))?;
                json!({ "type": "candidate", "content": content })
            }
            Self::RemoveCandidates(candidates) => {
                json!({ "type": "remove-candidates", "candidates": candidates })
            }
            Self::Heartbeat => json!({ "type": "heartbeat" }),
            Self::Unknown(tag) => {
                return Err(Error::state(format!("cannot encode unknown type {tag:?}")));
            }
        };
        serde_json::to_string(&value).map_err(|err| Error::protocol(err))
    }

    /// Decode the JSON envelope of one frame.
    ///
    /// Fails with [`Error::Protocol`] on invalid JSON or a missing `type`
    /// field; an unrecognized `type` decodes to [`SignalMessage::Unknown`].
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::protocol("missing type"));
        }
        let value: Value = serde_json::from_slice(payload)
            .map_err(|err| Error::protocol(format!("invalid JSON: {err}")))?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("missing type"))?;

        match tag {
            "offer" => Ok(Self::Offer {
                sdp: content_string(&value)?,
            }),
            "answer" => Ok(Self::Answer {
                sdp: content_string(&value)?,
            }),
            "candidate" => {
                let content = content_string(&value)?;
                let candidate: IceCandidate = serde_json::from_str(&content)
                    .map_err(|err| Error::protocol(format!("bad candidate: {err}")))?;
                Ok(Self::Candidate(candidate))
            }
            "remove-candidates" => {
                let candidates = value
                    .get("candidates")
                    .cloned()
                    .ok_or_else(|| Error::protocol("remove-candidates missing candidates"))?;
                let candidates: Vec<IceCandidate> = serde_json::from_value(candidates)
                    .map_err(|err| Error::protocol(format!("bad candidate list: {err}")))?;
                Ok(Self::RemoveCandidates(candidates))
            }
            "heartbeat" => Ok(Self::Heartbeat),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

fn content_string(value: &Value) -> Result<String> {
    value
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::protocol("missing content"))
}

/// Rewrite an answer SDP so media flows both ways.
///
/// Some engines produce `a=inactive`/`a=recvonly` answers when the remote
/// offer arrived before local tracks were attached.
pub fn force_sendrecv(sdp: &str) -> String {
    sdp.replace("a=inactive", "a=sendrecv")
        .replace("a=recvonly", "a=sendrecv")
}
