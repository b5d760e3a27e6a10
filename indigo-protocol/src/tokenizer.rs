//! Byte-level lexer for the XML dialect spoken on INDIGO connections.
//!
//! The tokenizer pulls bytes from a blocking reader through a fixed buffer and
//! turns them into [`Event`]s. It knows nothing about the message grammar,
//! except that the grammar may arm it to treat the body of the element whose
//! start tag is currently open as a base64 BLOB payload (see
//! [`Tokenizer::expect_blob`]).
//!
//! The five predefined entities are expanded in attribute values and text.
//! Any other entity, and anything that merely starts like one, is kept verbatim.
use std::io::{ErrorKind, Read};

use crate::{
    blob::{self, BlobDecoder},
    error::ParseError,
    parser::ParserOptions,
    property::Version,
};

/// Longest tag or attribute name accepted.
pub const NAME_SIZE: usize = 128;
const ENTITY_SIZE: usize = 8;

/// A lexical event. Borrowed data is valid until the next call to
/// [`Tokenizer::next_event`].
#[derive(Debug, PartialEq)]
pub enum Event<'a> {
    BeginTag(&'a str),
    Attribute(&'a str, &'a str),
    /// Element content with surrounding whitespace removed; never empty
    Text(&'a str),
    /// A completely decoded BLOB payload
    Blob(Vec<u8>),
    /// The end of the element with the given name, also emitted for `<tag/>`
    EndTag(&'a str),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum LexState {
    Idle,
    TagOpen,
    Header,
    Header1,
    TagName,
    AttributeName1,
    AttributeName,
    AttributeEq,
    AttributeValue1,
    AttributeValue,
    EmptyTag,
    Text,
    EndTagName,
    EndTagSpace,
    Blob,
    BlobBulk,
    BlobEnd,
    Error,
}

impl LexState {
    fn name(&self) -> &'static str {
        match self {
            LexState::Idle => "Idle",
            LexState::TagOpen => "TagOpen",
            LexState::Header => "Header",
            LexState::Header1 => "Header1",
            LexState::TagName => "TagName",
            LexState::AttributeName1 => "AttributeName1",
            LexState::AttributeName => "AttributeName",
            LexState::AttributeEq => "AttributeEq",
            LexState::AttributeValue1 => "AttributeValue1",
            LexState::AttributeValue => "AttributeValue",
            LexState::EmptyTag => "EmptyTag",
            LexState::Text => "Text",
            LexState::EndTagName => "EndTagName",
            LexState::EndTagSpace => "EndTagSpace",
            LexState::Blob => "Blob",
            LexState::BlobBulk => "BlobBulk",
            LexState::BlobEnd => "BlobEnd",
            LexState::Error => "Error",
        }
    }
}

enum Pending {
    BeginTag,
    Attribute,
    Text,
    Blob(Vec<u8>),
    EndTag,
}

fn is_name_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.' | b':')
}

/// Interprets accumulated bytes as UTF-8. A multi-byte character cut off by
/// the text length limit is dropped.
fn as_str(bytes: &[u8]) -> &str {
    match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(error) => std::str::from_utf8(&bytes[..error.valid_up_to()]).unwrap_or_default(),
    }
}

pub struct Tokenizer<R> {
    reader: R,
    buffer: Box<[u8]>,
    pos: usize,
    end: usize,
    state: LexState,
    name: Vec<u8>,
    value: Vec<u8>,
    truncated: bool,
    quote: u8,
    entity: Vec<u8>,
    in_entity: bool,
    tags: Vec<String>,
    blob_request: Option<usize>,
    blob: Option<BlobDecoder>,
    version: Version,
    max_text_len: usize,
    max_blob_size: usize,
}

impl<R: Read> Tokenizer<R> {
    pub fn new(reader: R, options: &ParserOptions) -> Tokenizer<R> {
        Tokenizer {
            reader,
            buffer: vec![0; options.aligned_buffer_size()].into_boxed_slice(),
            pos: 0,
            end: 0,
            state: LexState::Idle,
            name: Vec::with_capacity(NAME_SIZE),
            value: Vec::new(),
            truncated: false,
            quote: b'"',
            entity: Vec::with_capacity(ENTITY_SIZE),
            in_entity: false,
            tags: Vec::new(),
            blob_request: None,
            blob: None,
            version: Version::default(),
            max_text_len: options.max_text_len,
            max_blob_size: options.max_blob_size,
        }
    }

    /// The protocol version that selects the BLOB transfer mode.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.tags.len()
    }

    /// Arms (or disarms) BLOB mode for the body of the element whose start tag
    /// is currently being read. `size` is the declared payload size in bytes.
    pub fn expect_blob(&mut self, size: Option<usize>) {
        self.blob_request = size;
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Returns the next event, or `None` once the reader is exhausted.
    ///
    /// After the first error every further call fails.
    pub fn next_event(&mut self) -> Result<Option<Event<'_>>, ParseError> {
        if self.state == LexState::Error {
            return Err(ParseError::InvalidFormat(
                "Tokenizer already failed".to_string(),
            ));
        }
        match self.advance() {
            Ok(Some(pending)) => {
                let event = self.event(pending);
                log::trace!("{:?}", event);
                Ok(Some(event))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                self.state = LexState::Error;
                Err(error)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<Pending>, ParseError> {
        loop {
            if self.pos == self.end && !self.fill()? {
                return Ok(None);
            }
            let byte = self.buffer[self.pos];
            self.pos += 1;
            if let Some(pending) = self.step(byte)? {
                if matches!(pending, Pending::Attribute | Pending::Text) {
                    self.replace_invalid_utf8();
                }
                return Ok(Some(pending));
            }
        }
    }

    fn fill(&mut self) -> Result<bool, ParseError> {
        loop {
            match self.reader.read(&mut self.buffer) {
                Ok(0) => return Ok(false),
                Ok(count) => {
                    self.pos = 0;
                    self.end = count;
                    return Ok(true);
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Values are passed through byte for byte, except that sequences which are
    /// not UTF-8 (a Latin-1 degree sign, say) become U+FFFD.
    fn replace_invalid_utf8(&mut self) {
        if let Err(error) = std::str::from_utf8(&self.value)
            && error.error_len().is_some()
        {
            let repaired = String::from_utf8_lossy(&self.value).into_owned();
            log::debug!("Value is not UTF-8, read as '{}'", repaired);
            self.value = repaired.into_bytes();
        }
    }

    fn event(&self, pending: Pending) -> Event<'_> {
        match pending {
            Pending::BeginTag => Event::BeginTag(as_str(&self.name)),
            Pending::Attribute => Event::Attribute(as_str(&self.name), as_str(&self.value)),
            Pending::Text => Event::Text(as_str(&self.value).trim()),
            Pending::Blob(data) => Event::Blob(data),
            Pending::EndTag => Event::EndTag(as_str(&self.name)),
        }
    }

    fn transition(&mut self, state: LexState) {
        log::trace!("{} -> {}", self.state.name(), state.name());
        self.state = state;
    }

    fn syntax(&self, byte: u8) -> ParseError {
        ParseError::Syntax {
            state: self.state.name(),
            byte,
        }
    }

    fn push_name(&mut self, byte: u8) -> Result<(), ParseError> {
        if self.name.len() == NAME_SIZE {
            return Err(ParseError::InvalidFormat(format!(
                "Name exceeds {} bytes",
                NAME_SIZE
            )));
        }
        self.name.push(byte);
        Ok(())
    }

    fn push_value(&mut self, byte: u8) {
        if self.value.len() < self.max_text_len {
            self.value.push(byte);
        } else if !self.truncated {
            self.truncated = true;
            log::warn!(
                "Value exceeds {} bytes, dropping the rest",
                self.max_text_len
            );
        }
    }

    fn clear_value(&mut self) {
        self.value.clear();
        self.truncated = false;
    }

    /// Handles a byte while an entity reference is open.
    /// Returns `false` if the byte terminated the reference without belonging to it.
    fn entity_byte(&mut self, byte: u8) -> bool {
        if byte == b';' {
            self.in_entity = false;
            let decoded = match self.entity.as_slice() {
                b"amp" => Some(b'&'),
                b"lt" => Some(b'<'),
                b"gt" => Some(b'>'),
                b"quot" => Some(b'"'),
                b"apos" => Some(b'\''),
                _ => None,
            };
            match decoded {
                Some(decoded) => self.push_value(decoded),
                None => {
                    self.flush_entity();
                    self.push_value(b';');
                }
            }
            return true;
        }
        if (byte.is_ascii_alphanumeric() || byte == b'#') && self.entity.len() < ENTITY_SIZE {
            self.entity.push(byte);
            return true;
        }
        self.in_entity = false;
        self.flush_entity();
        false
    }

    fn flush_entity(&mut self) {
        let entity = std::mem::take(&mut self.entity);
        self.push_value(b'&');
        entity.iter().for_each(|&b| self.push_value(b));
        self.entity = entity;
        self.entity.clear();
    }

    fn begin_entity(&mut self) {
        self.entity.clear();
        self.in_entity = true;
    }

    fn open_tag(&mut self) {
        let name = as_str(&self.name).to_string();
        self.tags.push(name);
        self.blob_request = None;
    }

    fn close_start_tag(&mut self) -> Result<(), ParseError> {
        match self.blob_request.take() {
            Some(size) => {
                if size > self.max_blob_size {
                    return Err(ParseError::TooManyBytes {
                        max: self.max_blob_size,
                        got: size,
                    });
                }
                self.blob = Some(BlobDecoder::new(size, self.buffer.len()));
                if self.version.has_bulk_blobs() {
                    self.transition(LexState::BlobBulk);
                } else {
                    self.transition(LexState::Blob);
                }
            }
            None => {
                self.clear_value();
                self.transition(LexState::Text);
            }
        }
        Ok(())
    }

    fn after_close(&mut self) -> Pending {
        self.clear_value();
        if self.tags.is_empty() {
            self.transition(LexState::Idle);
        } else {
            self.transition(LexState::Text);
        }
        Pending::EndTag
    }

    fn close_tag(&mut self) -> Result<Pending, ParseError> {
        match self.tags.pop() {
            Some(open) if open.as_bytes() == self.name.as_slice() => Ok(self.after_close()),
            Some(open) => Err(ParseError::InvalidFormat(format!(
                "Closing tag </{}> does not match <{}>",
                String::from_utf8_lossy(&self.name),
                open
            ))),
            None => Err(ParseError::InvalidFormat(format!(
                "Closing tag </{}> without open tag",
                String::from_utf8_lossy(&self.name)
            ))),
        }
    }

    fn close_empty_tag(&mut self) -> Pending {
        self.name.clear();
        if let Some(open) = self.tags.pop() {
            self.name.extend_from_slice(open.as_bytes());
        }
        self.after_close()
    }

    fn flush_text(&mut self) -> Option<Pending> {
        let text = self.value.trim_ascii();
        if text.is_empty() {
            None
        } else {
            Some(Pending::Text)
        }
    }

    fn step(&mut self, byte: u8) -> Result<Option<Pending>, ParseError> {
        if self.in_entity && self.entity_byte(byte) {
            return Ok(None);
        }
        match self.state {
            LexState::Idle => {
                if byte == b'<' {
                    self.transition(LexState::TagOpen);
                }
            }
            LexState::TagOpen => {
                if byte == b'/' {
                    self.name.clear();
                    self.transition(LexState::EndTagName);
                } else if is_name_start(byte) {
                    self.name.clear();
                    self.name.push(byte);
                    self.transition(LexState::TagName);
                } else if byte == b'?' && self.tags.is_empty() {
                    self.transition(LexState::Header);
                } else {
                    return Err(self.syntax(byte));
                }
            }
            LexState::Header => {
                if byte == b'?' {
                    self.transition(LexState::Header1);
                }
            }
            LexState::Header1 => match byte {
                b'>' => self.transition(LexState::Idle),
                b'?' => {}
                _ => self.transition(LexState::Header),
            },
            LexState::TagName => {
                if is_name_char(byte) {
                    self.push_name(byte)?;
                    return Ok(None);
                }
                let next = match byte {
                    b'/' => LexState::EmptyTag,
                    b'>' => LexState::Text,
                    _ if byte.is_ascii_whitespace() => LexState::AttributeName1,
                    _ => return Err(self.syntax(byte)),
                };
                self.open_tag();
                self.clear_value();
                self.transition(next);
                return Ok(Some(Pending::BeginTag));
            }
            LexState::AttributeName1 => {
                if byte.is_ascii_whitespace() {
                } else if is_name_start(byte) {
                    self.name.clear();
                    self.name.push(byte);
                    self.transition(LexState::AttributeName);
                } else if byte == b'/' {
                    self.transition(LexState::EmptyTag);
                } else if byte == b'>' {
                    self.close_start_tag()?;
                } else {
                    return Err(self.syntax(byte));
                }
            }
            LexState::AttributeName => {
                if is_name_char(byte) {
                    self.push_name(byte)?;
                } else if byte == b'=' {
                    self.transition(LexState::AttributeValue1);
                } else if byte.is_ascii_whitespace() {
                    self.transition(LexState::AttributeEq);
                } else {
                    return Err(self.syntax(byte));
                }
            }
            LexState::AttributeEq => {
                if byte == b'=' {
                    self.transition(LexState::AttributeValue1);
                } else if !byte.is_ascii_whitespace() {
                    return Err(self.syntax(byte));
                }
            }
            LexState::AttributeValue1 => {
                if byte == b'"' || byte == b'\'' {
                    self.quote = byte;
                    self.clear_value();
                    self.transition(LexState::AttributeValue);
                } else if !byte.is_ascii_whitespace() {
                    return Err(self.syntax(byte));
                }
            }
            LexState::AttributeValue => {
                if byte == self.quote {
                    self.transition(LexState::AttributeName1);
                    return Ok(Some(Pending::Attribute));
                } else if byte == b'&' {
                    self.begin_entity();
                } else if byte == b'<' {
                    return Err(self.syntax(byte));
                } else {
                    self.push_value(byte);
                }
            }
            LexState::EmptyTag => {
                if byte == b'>' {
                    return Ok(Some(self.close_empty_tag()));
                }
                return Err(self.syntax(byte));
            }
            LexState::Text => {
                if byte == b'<' {
                    self.transition(LexState::TagOpen);
                    return Ok(self.flush_text());
                } else if byte == b'&' {
                    self.begin_entity();
                } else {
                    self.push_value(byte);
                }
            }
            LexState::EndTagName => {
                if is_name_char(byte) {
                    self.push_name(byte)?;
                } else if byte == b'>' {
                    return self.close_tag().map(Some);
                } else if byte.is_ascii_whitespace() && !self.name.is_empty() {
                    self.transition(LexState::EndTagSpace);
                } else {
                    return Err(self.syntax(byte));
                }
            }
            LexState::EndTagSpace => {
                if byte == b'>' {
                    return self.close_tag().map(Some);
                } else if !byte.is_ascii_whitespace() {
                    return Err(self.syntax(byte));
                }
            }
            LexState::Blob => {
                if byte == b'<' {
                    self.transition(LexState::TagOpen);
                    return Ok(self
                        .blob
                        .take()
                        .and_then(BlobDecoder::finish)
                        .map(Pending::Blob));
                }
                if let Some(decoder) = self.blob.as_mut() {
                    decoder.push(byte);
                }
            }
            LexState::BlobBulk => {
                if !byte.is_ascii_whitespace() {
                    self.pos -= 1;
                    return self.read_bulk_blob();
                }
            }
            LexState::BlobEnd => {
                if byte == b'<' {
                    self.transition(LexState::TagOpen);
                } else if !byte.is_ascii_whitespace() {
                    return Err(self.syntax(byte));
                }
            }
            LexState::Error => return Err(self.syntax(byte)),
        }
        Ok(None)
    }

    /// Reads a length-declared payload straight from the buffer and the reader.
    fn read_bulk_blob(&mut self) -> Result<Option<Pending>, ParseError> {
        self.transition(LexState::BlobEnd);
        let Some(mut decoder) = self.blob.take() else {
            return Ok(None);
        };
        let mut remaining = blob::encoded_len(decoder.expected());
        let buffered = remaining.min(self.end - self.pos);
        decoder.extend(&self.buffer[self.pos..self.pos + buffered]);
        self.pos += buffered;
        remaining -= buffered;
        while remaining > 0 {
            let chunk = remaining.min(self.buffer.len());
            self.pos = 0;
            self.end = 0;
            self.reader.read_exact(&mut self.buffer[..chunk])?;
            decoder.extend(&self.buffer[..chunk]);
            remaining -= chunk;
        }
        Ok(decoder.finish().map(Pending::Blob))
    }
}
