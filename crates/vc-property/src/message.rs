use core::fmt;

use crate::error::PropertyError;
use crate::tag::PropertyTag;

/// Fixed working buffer size. Tag payloads used here never exceed 6 words.
pub const MESSAGE_CAPACITY_WORDS: usize = 32;

/// `word[1]` value when submitting a request.
pub const REQUEST_CODE: u32 = 0x0000_0000;
/// `word[1]` value written by firmware after processing the buffer.
pub const RESPONSE_SUCCESS: u32 = 0x8000_0000;
/// `word[1]` value written by firmware when the buffer could not be parsed.
pub const RESPONSE_PARSE_ERROR: u32 = 0x8000_0001;
/// Set in a tag's third word once firmware has filled in the response.
pub const TAG_RESPONSE_BIT: u32 = 0x8000_0000;
pub const END_TAG: u32 = 0x0000_0000;

/// Word index of the first value word of the (single) tag.
pub const PAYLOAD_OFFSET_WORDS: usize = 5;
/// Largest value buffer that still leaves room for the end tag.
pub const MAX_VALUE_WORDS: usize = MESSAGE_CAPACITY_WORDS - PAYLOAD_OFFSET_WORDS - 1;

const SIZE_WORD: usize = 0;
const CODE_WORD: usize = 1;
const TAG_ID_WORD: usize = 2;
const VALUE_SIZE_WORD: usize = 3;
const TAG_STATUS_WORD: usize = 4;

/// One property-interface buffer holding a single tag.
///
/// The buffer is 16-byte aligned so it can also be handed to the raw mailbox registers, which
/// use the low 4 bits of the address for the channel number.
#[repr(C, align(16))]
#[derive(Clone, PartialEq, Eq)]
pub struct PropertyMessage {
    words: [u32; MESSAGE_CAPACITY_WORDS],
    len: usize,
}

impl PropertyMessage {
    /// Compose a request for one of the known tags, reserving the firmware's response size.
    pub fn request(tag: PropertyTag, payload: &[u32]) -> Result<Self, PropertyError> {
        Self::with_value_buffer(tag.id(), payload, tag.response_words())
    }

    /// Compose a request for an arbitrary tag id.
    ///
    /// The value buffer is sized to `max(payload.len(), response_words)` words; any words past the
    /// request payload are zeroed.
    pub fn with_value_buffer(
        tag: u32,
        payload: &[u32],
        response_words: usize,
    ) -> Result<Self, PropertyError> {
        let value_words = payload.len().max(response_words);
        let words = PAYLOAD_OFFSET_WORDS + value_words + 1;
        if words > MESSAGE_CAPACITY_WORDS {
            return Err(PropertyError::Overflow {
                tag,
                words,
                capacity: MESSAGE_CAPACITY_WORDS,
            });
        }

        let mut msg = Self {
            words: [0; MESSAGE_CAPACITY_WORDS],
            len: 0,
        };
        msg.push(0);
        msg.push(REQUEST_CODE);
        msg.push(tag);
        msg.push((value_words * 4) as u32);
        msg.push((payload.len() * 4) as u32);
        for &word in payload {
            msg.push(word);
        }
        for _ in payload.len()..value_words {
            msg.push(0);
        }
        msg.push(END_TAG);
        msg.words[SIZE_WORD] = (msg.len * 4) as u32;
        Ok(msg)
    }

    fn push(&mut self, word: u32) {
        self.words[self.len] = word;
        self.len += 1;
    }

    pub fn tag(&self) -> u32 {
        self.words[TAG_ID_WORD]
    }

    pub fn size_bytes(&self) -> u32 {
        self.words[SIZE_WORD]
    }

    pub fn code(&self) -> u32 {
        self.words[CODE_WORD]
    }

    pub fn len_words(&self) -> usize {
        self.len
    }

    /// The composed words, header through end tag.
    pub fn as_words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    /// Native-endian byte image of [`Self::as_words`], as the firmware sees it.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        self.as_words().iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    /// Raw pointer to the first word, for handing the buffer to the kernel driver.
    pub fn as_mut_ptr(&mut self) -> *mut u32 {
        self.words.as_mut_ptr()
    }

    /// Value buffer size from `word[3]`; a response can rewrite it, so it is capped.
    fn value_words(&self) -> usize {
        ((self.words[VALUE_SIZE_WORD] / 4) as usize).min(MAX_VALUE_WORDS)
    }

    /// The tag's whole value buffer. Before a transaction this holds the request payload; after
    /// a failed transaction its contents are meaningless.
    pub fn payload(&self) -> &[u32] {
        &self.words[PAYLOAD_OFFSET_WORDS..PAYLOAD_OFFSET_WORDS + self.value_words()]
    }

    /// The request payload as composed (valid only before the buffer is sent).
    pub fn request_payload(&self) -> &[u32] {
        let request_words = (self.words[TAG_STATUS_WORD] & !TAG_RESPONSE_BIT) as usize / 4;
        &self.payload()[..request_words.min(self.value_words())]
    }

    /// Fill in a firmware response: values, tag response indicator, and the success code.
    ///
    /// Used by responders (the emulated firmware and tests). Values beyond the value buffer are
    /// dropped; the reported length is still `values.len() * 4`, matching firmware behaviour when
    /// the caller under-sized its buffer.
    pub fn complete(&mut self, values: &[u32]) {
        let capacity = self.value_words();
        for (slot, &value) in self.words[PAYLOAD_OFFSET_WORDS..PAYLOAD_OFFSET_WORDS + capacity]
            .iter_mut()
            .zip(values)
        {
            *slot = value;
        }
        self.words[TAG_STATUS_WORD] = TAG_RESPONSE_BIT | (values.len() * 4) as u32;
        self.words[CODE_WORD] = RESPONSE_SUCCESS;
    }

    /// Overwrite the response code (e.g. [`RESPONSE_PARSE_ERROR`]).
    pub fn set_code(&mut self, code: u32) {
        self.words[CODE_WORD] = code;
    }

    /// Validate the response header and return the tag's response values.
    ///
    /// Both the buffer-level success code and the tag-level response bit must be set; a buffer
    /// the firmware never touched is rejected rather than trusted.
    pub fn decode(&self) -> Result<PropertyResponse<'_>, PropertyError> {
        match self.code() {
            RESPONSE_SUCCESS => {}
            RESPONSE_PARSE_ERROR => return Err(PropertyError::ParseError),
            code => return Err(PropertyError::NotProcessed { code }),
        }

        let status = self.words[TAG_STATUS_WORD];
        if status & TAG_RESPONSE_BIT == 0 {
            return Err(PropertyError::TagNotAcknowledged { tag: self.tag() });
        }

        let len_bytes = status & !TAG_RESPONSE_BIT;
        let words = (len_bytes as usize).div_ceil(4).min(self.value_words());
        Ok(PropertyResponse {
            tag: self.tag(),
            len_bytes,
            values: &self.words[PAYLOAD_OFFSET_WORDS..PAYLOAD_OFFSET_WORDS + words],
        })
    }
}

impl fmt::Debug for PropertyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMessage")
            .field("tag", &format_args!("{:#010x}", self.tag()))
            .field("words", &format_args!("{:08x?}", self.as_words()))
            .finish()
    }
}

/// Response values of a successfully processed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyResponse<'a> {
    pub tag: u32,
    /// Response length reported by firmware (may exceed the value buffer).
    pub len_bytes: u32,
    pub values: &'a [u32],
}

impl<'a> PropertyResponse<'a> {
    /// Require at least `count` response words.
    pub fn expect_words(&self, count: usize) -> Result<&'a [u32], PropertyError> {
        if self.values.len() < count {
            return Err(PropertyError::TruncatedResponse {
                tag: self.tag,
                expected: count,
                found: self.values.len(),
            });
        }
        Ok(&self.values[..count])
    }

    pub fn word(&self, index: usize) -> Result<u32, PropertyError> {
        Ok(self.expect_words(index + 1)?[index])
    }
}
