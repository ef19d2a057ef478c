use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("property message for tag {tag:#010x} needs {words} words (capacity {capacity})")]
    Overflow {
        tag: u32,
        words: usize,
        capacity: usize,
    },

    #[error("firmware did not process the request (response code {code:#010x})")]
    NotProcessed { code: u32 },

    #[error("firmware failed to parse the request buffer")]
    ParseError,

    #[error("firmware did not acknowledge tag {tag:#010x}")]
    TagNotAcknowledged { tag: u32 },

    #[error("response for tag {tag:#010x} too short: expected {expected} words, found {found}")]
    TruncatedResponse {
        tag: u32,
        expected: usize,
        found: usize,
    },
}
