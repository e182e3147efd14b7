//! Responses handed to transfer listeners

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Whether the response code was in the accepted set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Accepted response
    Accepted,
    /// Any other response
    Declined,
}

/// Response body as stored for the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Nothing was read
    Empty,
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Decoded text
    Text(String),
    /// Path of the file the body was written to
    File(PathBuf),
}

impl ResponseBody {
    /// Number of bytes or characters held in memory, zero for files
    pub fn len(&self) -> usize {
        match self {
            Self::Empty | Self::File(_) => 0,
            Self::Bytes(bytes) => bytes.len(),
            Self::Text(text) => text.len(),
        }
    }

    /// Whether no body is held in memory
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Server response of one attempt
#[derive(Debug, Clone)]
pub struct Response {
    /// Accepted or declined
    pub status: ResponseStatus,
    /// Status code
    pub code: u16,
    /// Reason phrase
    pub message: String,
    /// Headers in received order
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: ResponseBody,
    /// Content type header, if any
    pub content_type: Option<String>,
    /// Content length, -1 when unknown
    pub content_length: i64,
    /// Parsed `Date` header
    pub date: Option<DateTime<Utc>>,
}

impl Response {
    /// Whether the response was accepted
    pub fn is_accepted(&self) -> bool {
        self.status == ResponseStatus::Accepted
    }

    /// First header value with this name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Parse an HTTP date such as `Tue, 15 Nov 1994 08:12:31 GMT`
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
