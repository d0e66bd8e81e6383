//! Session-setup payloads forwarded through the relay.
//!
//! The relay treats these as opaque JSON. Clients parse them into [`Signal`]
//! and drop anything that does not fit.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A session description or a transport candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    /// Offer or answer
    Description(SessionDescription),
    /// Transport candidate
    Candidate(Candidate),
}

impl Signal {
    /// Parse an opaque relay payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignal`] if the payload is neither a
    /// description nor a candidate.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidSignal(e.to_string()))
    }

    /// Convert to the opaque form sent through the relay.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Sent by the side initiating the session
    Offer,
    /// Reply to an offer
    Answer,
}

/// Offer or answer produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Transport-specific body
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One way of reaching the local side of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Transport-specific candidate line
    pub candidate: String,
    /// Media stream id, if any
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Media line index, if any
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

impl Candidate {
    /// Candidate with no media identification.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_description() {
        let signal = Signal::from_value(json!({"type": "answer", "sdp": "v=0"})).unwrap();
        assert_eq!(signal, Signal::Description(SessionDescription::answer("v=0")));
    }

    #[test]
    fn test_parse_candidate() {
        let signal = Signal::from_value(json!({
            "candidate": "tcp 192.168.1.4 40000",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }))
        .unwrap();
        match signal {
            Signal::Candidate(c) => {
                assert_eq!(c.candidate, "tcp 192.168.1.4 40000");
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_m_line_index, Some(0));
            }
            Signal::Description(d) => panic!("parsed as description: {d:?}"),
        }

        let bare = Signal::from_value(json!({"candidate": "tcp 10.0.0.1 1"})).unwrap();
        assert_eq!(bare, Signal::Candidate(Candidate::new("tcp 10.0.0.1 1")));
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            Signal::from_value(json!({"type": "pranswer", "sdp": "x"})),
            Err(Error::InvalidSignal(_))
        ));
        assert!(Signal::from_value(json!(42)).is_err());
    }

    #[test]
    fn test_description_wire_shape() {
        let value = Signal::Description(SessionDescription::offer("body"))
            .to_value()
            .unwrap();
        assert_eq!(value, json!({"type": "offer", "sdp": "body"}));
    }
}
