//! Assembled exposure images and their descriptive header.

use crate::data::RawFrame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Str(String),
}

impl HeaderValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            HeaderValue::Str(_) => None,
        }
    }

    /// String view of the value, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Int(v) => write!(f, "{v}"),
            HeaderValue::Float(v) => write!(f, "{v}"),
            HeaderValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<i32> for HeaderValue {
    fn from(v: i32) -> Self {
        HeaderValue::Int(v as i64)
    }
}

impl From<u32> for HeaderValue {
    fn from(v: u32) -> Self {
        HeaderValue::Int(v as i64)
    }
}

impl From<u16> for HeaderValue {
    fn from(v: u16) -> Self {
        HeaderValue::Int(v as i64)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Str(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Str(v.to_string())
    }
}

/// One header card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderCard {
    /// Keyword, e.g. `EXPTIME`
    pub key: String,
    /// Value
    pub value: HeaderValue,
    /// Comment
    pub comment: String,
}

/// Ordered list of header cards. Keys are unique; setting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitsHeader {
    cards: Vec<HeaderCard>,
}

impl FitsHeader {
    /// Empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a card, appending it if the key is new.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<HeaderValue>,
        comment: impl Into<String>,
    ) {
        let key = key.into();
        let card = HeaderCard {
            value: value.into(),
            comment: comment.into(),
            key,
        };
        match self.cards.iter_mut().find(|c| c.key == card.key) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.card(key).map(|c| &c.value)
    }

    /// Look up a whole card.
    pub fn card(&self, key: &str) -> Option<&HeaderCard> {
        self.cards.iter().find(|c| c.key == key)
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.card(key).is_some()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cards.iter().map(|c| c.key.as_str())
    }

    /// Cards in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HeaderCard> {
        self.cards.iter()
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the header has no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// A finished exposure: the frame plus its header.
#[derive(Debug, Clone)]
pub struct ExposureImage {
    /// Pixel data
    pub frame: RawFrame,
    /// Descriptive metadata
    pub header: FitsHeader,
}
