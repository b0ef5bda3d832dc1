//! The three learning-service exchanges and their frame sequences.
//!
//! | Exchange | Frames | Response |
//! |---|---|---|
//! | query | header, per arm `[plan, arm config]`, buffer state, metadata, final | `u32` arm index |
//! | predict | header, plan, buffer state, metadata, arm config, final | `f64` latency |
//! | reward | header, plan, buffer state, metadata, arm config, reward, final | none |
//!
//! Response values are little-endian. Length prefixes are big-endian.

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;

use crate::error::Result;

/// Which exchange a message belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Exchange {
    Query,
    Predict,
    Reward,
}

impl Exchange {
    /// Value of the header frame's `"type"` field.
    pub fn kind(self) -> &'static str {
        match self {
            Exchange::Query => "query",
            Exchange::Predict => "predict",
            Exchange::Reward => "reward",
        }
    }

    /// Bytes the service sends back.
    pub fn response_len(self) -> usize {
        match self {
            Exchange::Query => 4,
            Exchange::Predict => 8,
            Exchange::Reward => 0,
        }
    }

    fn header(self) -> Bytes {
        Bytes::from(json!({ "type": self.kind() }).to_string())
    }
}

fn final_frame() -> Bytes {
    Bytes::from(json!({ "final": true }).to_string())
}

#[derive(Serialize)]
struct RewardFrame {
    reward: f64,
    pid: u32,
}

/// A complete, ready-to-send frame sequence.
#[derive(Clone, Debug)]
pub struct Message {
    exchange: Exchange,
    frames: Vec<Bytes>,
}

impl Message {
    /// Ask the service to pick one of the given `(plan, arm config)` pairs.
    ///
    /// Pass `null` plan JSON for arms that failed so indices stay aligned.
    pub fn query<I>(arms: I, buffer_state: &str, metadata: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut frames = vec![Exchange::Query.header()];
        for (plan, config) in arms {
            frames.push(Bytes::from(plan));
            frames.push(Bytes::from(config));
        }
        frames.push(Bytes::copy_from_slice(buffer_state.as_bytes()));
        frames.push(Bytes::copy_from_slice(metadata.as_bytes()));
        frames.push(final_frame());
        Self {
            exchange: Exchange::Query,
            frames,
        }
    }

    /// Ask the service for a latency prediction of one plan.
    pub fn predict(plan: &str, buffer_state: &str, metadata: &str, arm_config: &str) -> Self {
        let frames = vec![
            Exchange::Predict.header(),
            Bytes::copy_from_slice(plan.as_bytes()),
            Bytes::copy_from_slice(buffer_state.as_bytes()),
            Bytes::copy_from_slice(metadata.as_bytes()),
            Bytes::copy_from_slice(arm_config.as_bytes()),
            final_frame(),
        ];
        Self {
            exchange: Exchange::Predict,
            frames,
        }
    }

    /// Report the observed latency of an executed plan.
    pub fn reward(
        plan: &str,
        buffer_state: &str,
        metadata: &str,
        arm_config: &str,
        reward_ms: f64,
        pid: u32,
    ) -> Result<Self> {
        let reward = serde_json::to_vec(&RewardFrame {
            reward: reward_ms,
            pid,
        })?;
        let frames = vec![
            Exchange::Reward.header(),
            Bytes::copy_from_slice(plan.as_bytes()),
            Bytes::copy_from_slice(buffer_state.as_bytes()),
            Bytes::copy_from_slice(metadata.as_bytes()),
            Bytes::copy_from_slice(arm_config.as_bytes()),
            Bytes::from(reward),
            final_frame(),
        ];
        Ok(Self {
            exchange: Exchange::Reward,
            frames,
        })
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Frame payloads in send order.
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub(crate) fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// Total bytes on the wire including length prefixes.
    pub fn wire_len(&self) -> usize {
        self.frames
            .iter()
            .map(|f| super::frame::PREFIX_LEN + f.len())
            .sum()
    }
}

/// Decode the query response.
pub fn decode_arm_index(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Decode the predict response.
pub fn decode_prediction(bytes: [u8; 8]) -> f64 {
    f64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(message: &Message) -> Vec<String> {
        message
            .frames()
            .iter()
            .map(|f| String::from_utf8(f.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_query_frames() {
        let message = Message::query(
            vec![
                ("{\"Plan\":1}".to_string(), "{\"index\":0}".to_string()),
                ("null".to_string(), "{\"index\":1}".to_string()),
            ],
            "{\"buffers\":{}}",
            "{}",
        );
        assert_eq!(
            texts(&message),
            vec![
                r#"{"type":"query"}"#,
                r#"{"Plan":1}"#,
                r#"{"index":0}"#,
                "null",
                r#"{"index":1}"#,
                r#"{"buffers":{}}"#,
                "{}",
                r#"{"final":true}"#,
            ]
        );
        assert_eq!(message.exchange().response_len(), 4);
    }

    #[test]
    fn test_predict_frames() {
        let message = Message::predict("P", "B", "M", "C");
        assert_eq!(
            texts(&message),
            vec![r#"{"type":"predict"}"#, "P", "B", "M", "C", r#"{"final":true}"#]
        );
    }

    #[test]
    fn test_reward_frames() {
        let message = Message::reward("P", "B", "M", "C", 12.5, 4242).unwrap();
        let frames = texts(&message);
        assert_eq!(frames.len(), 7);
        assert_eq!(frames[0], r#"{"type":"reward"}"#);
        assert_eq!(frames[5], r#"{"reward":12.5,"pid":4242}"#);
        assert_eq!(frames[6], r#"{"final":true}"#);
        assert_eq!(message.exchange().response_len(), 0);
    }

    #[test]
    fn test_wire_len() {
        let message = Message::predict("", "", "", "");
        let payload: usize = message.frames().iter().map(|f| f.len()).sum();
        assert_eq!(message.wire_len(), payload + 6 * 4);
    }

    #[test]
    fn test_response_decoding() {
        assert_eq!(decode_arm_index([3, 0, 0, 0]), 3);
        assert_eq!(decode_arm_index([0, 1, 0, 0]), 256);
        assert_eq!(decode_prediction(42.5f64.to_le_bytes()), 42.5);
        assert!(decode_prediction(f64::NAN.to_le_bytes()).is_nan());
    }
}
