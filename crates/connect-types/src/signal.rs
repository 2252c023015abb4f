use serde::{Deserialize, Serialize};

/// Call signalling payload relayed through a conversation's message channel.
///
/// The chat core does not interpret these; it seals the serialized form like
/// any other message body and hands it back to the call collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal_type")]
pub enum CallSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
    Hangup,
}

impl CallSignal {
    pub fn to_content(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_content(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_content_is_tagged_json() {
        let signal = CallSignal::IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let content = signal.to_content().unwrap();
        assert!(content.contains(r#""signal_type":"IceCandidate""#));
        assert_eq!(CallSignal::from_content(&content).unwrap(), signal);
    }
}
