//! Best-effort decoding of a recommendation document that is still being
//! generated.
//!
//! The model streams `{"recommendations": [{"title", "year", "reason"}, ...]}`
//! a few characters at a time. After every fragment the whole buffer is parsed
//! with a parser that accepts an unterminated document and recovers the longest
//! prefix it can decode unambiguously:
//!
//! - an unterminated string counts with its content so far
//! - an unterminated array or object keeps the members decoded so far
//! - a number, literal or key cut off at the end of the buffer is treated as
//!   not yet present, since `20` may become `2024` and `tr` may become `true`
//!
//! An unterminated element is only reported once its `title`, `year` and
//! `reason` keys are all present, so a still-open tail has a final title and
//! year and at most a growing reason. Callers must still treat the tail as
//! provisional.

use crate::models::Recommendation;

/// Key holding the list in the expected document
const LIST_KEY: &str = "recommendations";

/// Accumulates streamed text and decodes the recommendation list it contains
///
/// Not thread safe: `feed` takes `&mut self` and never suspends.
#[derive(Debug, Default)]
pub struct IncrementalJsonDecoder {
    buffer: String,
    decoded: Vec<Recommendation>,
    complete: bool,
}

impl IncrementalJsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and returns the list decoded so far
    ///
    /// The returned list never shrinks between calls. When the buffer holds no
    /// decodable list yet, or has become malformed, the previous result is kept.
    pub fn feed(&mut self, fragment: &str) -> &[Recommendation] {
        self.buffer.push_str(fragment);
        self.reparse();
        &self.decoded
    }

    /// Final decode once the stream has ended
    ///
    /// Returns the last good list even if the document never closed.
    pub fn finish(&mut self) -> &[Recommendation] {
        self.reparse();
        if !self.complete {
            tracing::warn!(
                buffered = self.buffer.len(),
                decoded = self.decoded.len(),
                "Stream ended before the recommendation document was complete"
            );
        }
        &self.decoded
    }

    pub fn decoded(&self) -> &[Recommendation] {
        &self.decoded
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Whether the last parse saw a fully closed document
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn reparse(&mut self) {
        match decode_document(&self.buffer) {
            Ok(Some(document)) => {
                if document.items.len() < self.decoded.len() {
                    tracing::warn!(
                        previous = self.decoded.len(),
                        current = document.items.len(),
                        "Decoded list shrank, keeping previous result"
                    );
                    return;
                }
                self.decoded = document.items;
                self.complete = document.complete;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(offset = e.offset, "Buffered completion is malformed");
            }
        }
    }
}

struct DecodedDocument {
    items: Vec<Recommendation>,
    complete: bool,
}

fn decode_document(text: &str) -> Result<Option<DecodedDocument>, Malformed> {
    let Some(start) = text.find(['{', '[']) else {
        return Ok(None);
    };

    let mut parser = Parser::new(&text[start..]);
    let Some(root) = parser.parse_value()? else {
        return Ok(None);
    };

    let list = match &root {
        Partial::Object { fields, .. } => match lookup(fields, LIST_KEY) {
            Some(list @ Partial::Array { .. }) => list,
            _ => return Ok(None),
        },
        Partial::Array { .. } => &root,
        _ => return Ok(None),
    };

    let Partial::Array { items, closed } = list else {
        return Ok(None);
    };

    Ok(Some(DecodedDocument {
        items: items.iter().filter_map(recommendation_from).collect(),
        complete: *closed && root.is_closed(),
    }))
}

fn recommendation_from(item: &Partial) -> Option<Recommendation> {
    let Partial::Object { fields, closed } = item else {
        return None;
    };

    let title = match lookup(fields, "title") {
        Some(Partial::String {
            value,
            closed: true,
        }) => value.trim().to_string(),
        _ => return None,
    };
    if title.is_empty() {
        return None;
    }

    let year_field = lookup(fields, "year");
    let reason_field = lookup(fields, "reason");
    if !closed && (year_field.is_none() || reason_field.is_none()) {
        return None;
    }

    let year = year_field.and_then(|value| match value {
        Partial::Number(text) => text.parse::<i32>().ok(),
        Partial::String { value, .. } => value.trim().parse::<i32>().ok(),
        _ => None,
    });

    let reason = match reason_field {
        Some(Partial::String { value, .. }) => value.clone(),
        _ => String::new(),
    };

    Some(Recommendation {
        title,
        year,
        reason,
    })
}

fn lookup<'a>(fields: &'a [(String, Partial)], key: &str) -> Option<&'a Partial> {
    fields.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// A JSON value that may have been cut off by the end of the buffer
#[derive(Debug, Clone, PartialEq)]
enum Partial {
    Null,
    Bool(bool),
    /// Raw number text, only produced once the number is terminated
    Number(String),
    String {
        value: String,
        closed: bool,
    },
    Array {
        items: Vec<Partial>,
        closed: bool,
    },
    Object {
        fields: Vec<(String, Partial)>,
        closed: bool,
    },
}

impl Partial {
    fn is_closed(&self) -> bool {
        match self {
            Partial::String { closed, .. }
            | Partial::Array { closed, .. }
            | Partial::Object { closed, .. } => *closed,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Malformed {
    offset: usize,
}

/// Recursive-descent parser over a possibly unterminated document
///
/// Every `parse_*` returns `Ok(None)` when the input ends before the value's
/// type or extent can be known.
struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn malformed(&self) -> Malformed {
        Malformed { offset: self.pos }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> Result<Option<Partial>, Malformed> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(None),
            Some(b'{') => self.parse_object().map(Some),
            Some(b'[') => self.parse_array().map(Some),
            Some(b'"') => Ok(Some(self.parse_string()?)),
            Some(b't') => self.parse_literal("true", Partial::Bool(true)),
            Some(b'f') => self.parse_literal("false", Partial::Bool(false)),
            Some(b'n') => self.parse_literal("null", Partial::Null),
            Some(b'-' | b'0'..=b'9') => self.parse_number(),
            Some(_) => Err(self.malformed()),
        }
    }

    fn parse_literal(&mut self, word: &str, value: Partial) -> Result<Option<Partial>, Malformed> {
        let rest = &self.bytes[self.pos..];
        let word = word.as_bytes();
        if rest.len() < word.len() {
            if word.starts_with(rest) {
                self.pos = self.bytes.len();
                return Ok(None);
            }
            return Err(self.malformed());
        }
        if &rest[..word.len()] != word {
            return Err(self.malformed());
        }
        self.pos += word.len();
        Ok(Some(value))
    }

    fn parse_number(&mut self) -> Result<Option<Partial>, Malformed> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        if self.peek().is_none() {
            // The number may still be growing
            return Ok(None);
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| Malformed { offset: start })?;
        if text.parse::<f64>().is_err() {
            return Err(Malformed { offset: start });
        }
        Ok(Some(Partial::Number(text.to_string())))
    }

    fn parse_string(&mut self) -> Result<Partial, Malformed> {
        // Opening quote
        self.pos += 1;
        let mut value: Vec<u8> = Vec::new();

        loop {
            let Some(byte) = self.peek() else {
                return Ok(Partial::String {
                    value: String::from_utf8_lossy(&value).into_owned(),
                    closed: false,
                });
            };

            match byte {
                b'"' => {
                    self.pos += 1;
                    return Ok(Partial::String {
                        value: String::from_utf8_lossy(&value).into_owned(),
                        closed: true,
                    });
                }
                b'\\' => match self.parse_escape()? {
                    Some(decoded) => {
                        let mut buf = [0u8; 4];
                        value.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
                    }
                    None => {
                        // Escape cut off by the end of the buffer
                        self.pos = self.bytes.len();
                        return Ok(Partial::String {
                            value: String::from_utf8_lossy(&value).into_owned(),
                            closed: false,
                        });
                    }
                },
                _ => {
                    value.push(byte);
                    self.pos += 1;
                }
            }
        }
    }

    /// Decodes one escape sequence starting at the backslash
    fn parse_escape(&mut self) -> Result<Option<char>, Malformed> {
        let Some(kind) = self.bytes.get(self.pos + 1).copied() else {
            return Ok(None);
        };

        let simple = match kind {
            b'"' => Some('"'),
            b'\\' => Some('\\'),
            b'/' => Some('/'),
            b'b' => Some('\u{8}'),
            b'f' => Some('\u{c}'),
            b'n' => Some('\n'),
            b'r' => Some('\r'),
            b't' => Some('\t'),
            b'u' => None,
            _ => return Err(self.malformed()),
        };
        if let Some(c) = simple {
            self.pos += 2;
            return Ok(Some(c));
        }

        let Some(high) = self.hex_at(self.pos + 2)? else {
            return Ok(None);
        };

        if (0xD800..0xDC00).contains(&high) {
            // Surrogate pair: need `\uXXXX` for the low half as well
            let low_start = self.pos + 6;
            match (
                self.bytes.get(low_start).copied(),
                self.bytes.get(low_start + 1).copied(),
            ) {
                (None, _) | (Some(b'\\'), None) => return Ok(None),
                (Some(b'\\'), Some(b'u')) => {}
                _ => return Err(self.malformed()),
            }
            let Some(low) = self.hex_at(low_start + 2)? else {
                return Ok(None);
            };
            if !(0xDC00..0xE000).contains(&low) {
                return Err(self.malformed());
            }
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            self.pos = low_start + 6;
            return char::from_u32(code)
                .map(Some)
                .ok_or_else(|| self.malformed());
        }

        self.pos += 6;
        Ok(Some(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER)))
    }

    /// Reads four hex digits at `at`; `None` when the buffer ends first
    fn hex_at(&self, at: usize) -> Result<Option<u32>, Malformed> {
        let end = at + 4;
        let available = &self.bytes[at.min(self.bytes.len())..end.min(self.bytes.len())];
        if !available.iter().all(u8::is_ascii_hexdigit) {
            return Err(Malformed { offset: at });
        }
        if available.len() < 4 {
            return Ok(None);
        }
        let text = std::str::from_utf8(available).map_err(|_| Malformed { offset: at })?;
        u32::from_str_radix(text, 16)
            .map(Some)
            .map_err(|_| Malformed { offset: at })
    }

    fn parse_array(&mut self) -> Result<Partial, Malformed> {
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Partial::Array { items, closed: false }),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Partial::Array { items, closed: true });
                }
                _ => {}
            }

            match self.parse_value()? {
                Some(item) => items.push(item),
                None => return Ok(Partial::Array { items, closed: false }),
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Partial::Array { items, closed: false }),
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Partial::Array { items, closed: true });
                }
                Some(_) => return Err(self.malformed()),
            }
        }
    }

    fn parse_object(&mut self) -> Result<Partial, Malformed> {
        self.pos += 1;
        let mut fields = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Partial::Object { fields, closed: false }),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Partial::Object { fields, closed: true });
                }
                Some(b'"') => {}
                Some(_) => return Err(self.malformed()),
            }

            let key = match self.parse_string()? {
                Partial::String {
                    value,
                    closed: true,
                } => value,
                _ => return Ok(Partial::Object { fields, closed: false }),
            };

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Partial::Object { fields, closed: false }),
                Some(b':') => self.pos += 1,
                Some(_) => return Err(self.malformed()),
            }

            match self.parse_value()? {
                Some(value) => fields.push((key, value)),
                None => return Ok(Partial::Object { fields, closed: false }),
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Partial::Object { fields, closed: false }),
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Partial::Object { fields, closed: true });
                }
                Some(_) => return Err(self.malformed()),
            }
        }
    }
}
