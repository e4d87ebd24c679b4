//! Wire protocol module.
//!
//! Defines the chunked frame codec and the envelope messages carried on it.
//!
//! ## Wire Format
//!
//! Messages are sequences of chunks, each followed by one trailer byte:
//! ```text
//! [payload <= chunk_size][trailer: 0x00 continue | 0x01 bytes | 0x02 text | 0x03 json]
//! ```

mod envelope;
mod value;
mod wire;

pub use envelope::{
    Envelope, Verb, VERB_DEL_ATTR, VERB_ERROR, VERB_EXIST_ATTR, VERB_GET_ATTR, VERB_GET_ATTR_STR,
    VERB_RETURN, VERB_SET_ATTR, VERB_STOP,
};
pub use value::{MessageValue, Trailer};
pub use wire::{
    encode_message, write_message, Expect, FrameReader, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
};
