//! The bridge envelope around every payload sent over MQTT.
//!
//! ```text
//! byte 0      flag: 0 = no timestamp, 1 = timestamp follows
//! bytes 1..9  timestamp (only when flag = 1), see Stamp::to_bytes
//! rest        serialized bus message, untouched
//! ```
//!
//! The payload is opaque to the bridge; only its boundaries matter.

use rosmqtt_types::{BridgeError, Stamp};

const FLAG_UNSTAMPED: u8 = 0;
const FLAG_STAMPED: u8 = 1;

/// A decoded envelope borrowing its payload from the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub stamp: Option<Stamp>,
    pub payload: &'a [u8],
}

pub fn encode(payload: &[u8], stamp: Option<Stamp>) -> Vec<u8> {
    let header_len = 1 + stamp.map_or(0, |_| Stamp::ENCODED_LEN);
    let mut out = Vec::with_capacity(header_len + payload.len());
    match stamp {
        Some(stamp) => {
            out.push(FLAG_STAMPED);
            out.extend_from_slice(&stamp.to_bytes());
        }
        None => out.push(FLAG_UNSTAMPED),
    }
    out.extend_from_slice(payload);
    out
}

pub fn decode(bytes: &[u8]) -> Result<Envelope<'_>, BridgeError> {
    let (&flag, rest) = bytes
        .split_first()
        .ok_or_else(|| BridgeError::MalformedEnvelope("empty message".to_string()))?;
    match flag {
        FLAG_UNSTAMPED => Ok(Envelope {
            stamp: None,
            payload: rest,
        }),
        FLAG_STAMPED => {
            if rest.len() < Stamp::ENCODED_LEN {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "stamped envelope holds {} timestamp bytes, expected {}",
                    rest.len(),
                    Stamp::ENCODED_LEN
                )));
            }
            let (raw, payload) = rest.split_at(Stamp::ENCODED_LEN);
            let mut stamp = [0u8; Stamp::ENCODED_LEN];
            stamp.copy_from_slice(raw);
            Ok(Envelope {
                stamp: Some(Stamp::from_bytes(stamp)),
                payload,
            })
        }
        other => Err(BridgeError::MalformedEnvelope(format!(
            "unknown flag byte {other:#04x}"
        ))),
    }
}
