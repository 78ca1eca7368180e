//! Reward event payload and record projection.

use serde::{Deserialize, Serialize};

/// A reward grant published by a producer.
///
/// `amount` is a base-10 integer string so that values above `u64::MAX`
/// survive JSON transport. `token` is informational; the relayer always mints
/// on the token contract it is configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardGranted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub amount: String,
    pub receiver: String,
    pub latitude: f64,
    pub longitude: f64,
    pub data: String,
}

impl RewardGranted {
    /// Decode an event from a raw message payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encode the event as a message payload.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A persisted reward as seen from outside the relayer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardView {
    pub id: i64,
    pub token: String,
    pub amount: String,
    pub receiver: String,
    pub latitude: f64,
    pub longitude: f64,
    pub tx_hash: Option<String>,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_without_token() {
        let payload = br#"{
            "amount": "340282366920938463463374607431768211456",
            "receiver": "0x00000000000000000000000000000000000000bb",
            "latitude": -23.5505,
            "longitude": -46.6333,
            "data": "sensor-7"
        }"#;
        let event = RewardGranted::decode(payload).unwrap();
        assert_eq!(event.token, None);
        assert_eq!(event.amount, "340282366920938463463374607431768211456");
        assert_eq!(event.latitude, -23.5505);
    }

    #[test]
    fn test_decode_rejects_numeric_amount() {
        let payload = br#"{
            "amount": 100,
            "receiver": "0x00000000000000000000000000000000000000bb",
            "latitude": 1.0,
            "longitude": 2.0,
            "data": "x"
        }"#;
        assert!(RewardGranted::decode(payload).is_err());
    }

    #[test]
    fn test_encode_omits_missing_token() {
        let event = RewardGranted {
            token: None,
            amount: "1".to_string(),
            receiver: "0x00000000000000000000000000000000000000bb".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            data: "x".to_string(),
        };
        let json = String::from_utf8(event.encode().unwrap()).unwrap();
        assert!(!json.contains("token"));
    }
}
