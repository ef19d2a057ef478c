#![forbid(unsafe_code)]

//! VideoCore mailbox property-message codec.
//!
//! The firmware's property interface exchanges a single buffer of native-endian `u32` words:
//!
//! ```text
//! word[0]   total size in bytes
//! word[1]   request/response code
//! word[2..] tag records: tag id, value buffer size, request size / response indicator, values
//! word[n]   end tag (0)
//! ```
//!
//! This crate only ever composes messages with exactly one tag, so the tag's value buffer always
//! starts at [`PAYLOAD_OFFSET_WORDS`]. Messages live in a fixed 32-word buffer; nothing here
//! allocates.

mod error;
mod message;
mod tag;

pub use crate::error::PropertyError;
pub use crate::message::{
    PropertyMessage, PropertyResponse, END_TAG, MAX_VALUE_WORDS, MESSAGE_CAPACITY_WORDS,
    PAYLOAD_OFFSET_WORDS, REQUEST_CODE, RESPONSE_PARSE_ERROR, RESPONSE_SUCCESS, TAG_RESPONSE_BIT,
};
pub use crate::tag::PropertyTag;
