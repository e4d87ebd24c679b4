//! Message values and chunk trailers.

use serde_json::Value;

use crate::error::{FramingErrorKind, RpcError};

/// Trailer byte closing every chunk on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Trailer {
    /// More chunks of the same message follow.
    Continue = 0x00,
    /// Final chunk, payload is raw bytes.
    EndBytes = 0x01,
    /// Final chunk, payload is UTF-8 text.
    EndText = 0x02,
    /// Final chunk, payload is compact JSON.
    EndJson = 0x03,
}

impl Trailer {
    /// Parse a trailer byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Continue),
            0x01 => Some(Self::EndBytes),
            0x02 => Some(Self::EndText),
            0x03 => Some(Self::EndJson),
            _ => None,
        }
    }

    /// Whether this trailer ends a message.
    pub fn is_terminal(self) -> bool {
        self != Self::Continue
    }
}

/// One decoded unit exchanged above the frame codec.
///
/// The three kinds are mutually exclusive per message; the final
/// chunk's trailer is the only type tag on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    Bytes(Vec<u8>),
    Text(String),
    /// A JSON list or map. Scalars are rejected when sending.
    Json(Value),
}

impl MessageValue {
    /// Short name of the value kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Json(Value::Array(_)) => "list",
            Self::Json(Value::Object(_)) => "map",
            Self::Json(_) => "json scalar",
        }
    }

    /// Encode into a wire payload and the trailer that tags it.
    pub(crate) fn to_payload(&self) -> Result<(Vec<u8>, Trailer), RpcError> {
        match self {
            Self::Bytes(bytes) => Ok((bytes.clone(), Trailer::EndBytes)),
            Self::Text(text) => Ok((text.as_bytes().to_vec(), Trailer::EndText)),
            Self::Json(value @ (Value::Array(_) | Value::Object(_))) => {
                Ok((serde_json::to_vec(value)?, Trailer::EndJson))
            }
            Self::Json(_) => Err(RpcError::Framing {
                kind: FramingErrorKind::UnsupportedValueType {
                    type_name: self.kind().to_string(),
                },
            }),
        }
    }

    /// Decode a reassembled payload according to its terminal trailer.
    pub(crate) fn from_payload(payload: Vec<u8>, trailer: Trailer) -> Result<Self, RpcError> {
        match trailer {
            Trailer::EndBytes => Ok(Self::Bytes(payload)),
            Trailer::EndText => String::from_utf8(payload)
                .map(Self::Text)
                .map_err(|_| RpcError::Framing {
                    kind: FramingErrorKind::InvalidUtf8,
                }),
            Trailer::EndJson => match serde_json::from_slice(&payload) {
                Ok(value @ (Value::Array(_) | Value::Object(_))) => Ok(Self::Json(value)),
                Ok(_) => Err(RpcError::Framing {
                    kind: FramingErrorKind::InvalidJson {
                        message: "expected a list or map".to_string(),
                    },
                }),
                Err(e) => Err(RpcError::Framing {
                    kind: FramingErrorKind::InvalidJson {
                        message: e.to_string(),
                    },
                }),
            },
            Trailer::Continue => Err(RpcError::Framing {
                kind: FramingErrorKind::MalformedChunk {
                    message: "message ended on a continuation trailer".to_string(),
                },
            }),
        }
    }

    /// Borrow the raw bytes, if this is a bytes message.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Borrow the text, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for MessageValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for MessageValue {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for MessageValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for MessageValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}
