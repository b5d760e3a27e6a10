//! Grammar of the protocol on top of the [`Tokenizer`].
//!
//! The grammar is a single state machine whose state is the production
//! currently being read, tagged with the message kind and phase. Lexical
//! events drive transitions; closing a top-level element yields a [`Message`].
//! Elements the grammar does not know are skipped together with their content.
use std::io::Read;

use crate::{
    error::ParseError,
    message::{Message, PropertyRequest},
    property::{
        BlobMode, BlobValue, Item, ItemValue, Permission, Property, PropertyKind,
        PropertyState, SwitchRule, TextValue, Version, parse_number,
    },
    tokenizer::{Event, Tokenizer},
};

/// Tuning knobs of a [`Parser`].
#[derive(Clone, Debug)]
pub struct ParserOptions {
    /// Size of the transport read buffer, also the scan-mode BLOB chunk
    pub buffer_size: usize,
    /// Upper bound of a single text or attribute value
    pub max_text_len: usize,
    /// Largest BLOB size accepted in a `size` attribute
    pub max_blob_size: usize,
    /// Joined with the `path` attribute of BLOB items to form their URL
    pub url_prefix: Option<String>,
    /// Appended to device names of def/set/del messages as `"<device> @ <suffix>"`
    pub host_suffix: Option<String>,
}

impl ParserOptions {
    pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024;
    pub const DEFAULT_MAX_TEXT_LEN: usize = 512 * 1024;
    pub const DEFAULT_MAX_BLOB_SIZE: usize = 1 << 30;

    /// The buffer size rounded down to a multiple of four.
    pub fn aligned_buffer_size(&self) -> usize {
        (self.buffer_size / 4 * 4).max(4)
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            max_text_len: Self::DEFAULT_MAX_TEXT_LEN,
            max_blob_size: Self::DEFAULT_MAX_BLOB_SIZE,
            url_prefix: None,
            host_suffix: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Verb {
    Def,
    Set,
    New,
}

impl Verb {
    fn item_prefix(&self) -> &'static str {
        match self {
            Verb::Def => "def",
            Verb::Set | Verb::New => "one",
        }
    }
}

/// Splits a vector element name such as `setNumberVector`.
fn parse_vector_tag(name: &str) -> Option<(Verb, PropertyKind)> {
    let (verb, rest) = if let Some(rest) = name.strip_prefix("def") {
        (Verb::Def, rest)
    } else if let Some(rest) = name.strip_prefix("set") {
        (Verb::Set, rest)
    } else if let Some(rest) = name.strip_prefix("new") {
        (Verb::New, rest)
    } else {
        return None;
    };
    let kind = PropertyKind::from_tag_name(rest.strip_suffix("Vector")?)?;
    if verb == Verb::New && kind == PropertyKind::Light {
        return None;
    }
    Some((verb, kind))
}

fn parse_number_or_zero(value: &str) -> f64 {
    parse_number(value).unwrap_or_else(|| {
        log::warn!("Invalid number '{}', using 0", value);
        0.0
    })
}

fn device_name(device: &str, host_suffix: Option<&str>) -> String {
    match host_suffix {
        Some(suffix) => format!("{} @ {}", device, suffix),
        None => device.to_string(),
    }
}

/// Production currently being read.
#[derive(Debug)]
enum Production {
    TopLevel,
    GetProperties {
        request: PropertyRequest,
        switch: Option<Version>,
    },
    EnableBlob {
        device: String,
        name: Option<String>,
        mode: Option<BlobMode>,
    },
    SwitchProtocol {
        version: Option<Version>,
    },
    DelProperty {
        device: String,
        name: Option<String>,
        message: Option<String>,
    },
    Message {
        device: Option<String>,
        message: Option<String>,
    },
    Vector {
        verb: Verb,
    },
    Item {
        verb: Verb,
    },
}

/// Incrementally filled property of the vector being read.
#[derive(Default)]
struct PropertyBuilder {
    property: Property,
    message: Option<String>,
}

impl PropertyBuilder {
    fn reset(&mut self, kind: PropertyKind, version: Version) {
        self.property = Property {
            kind,
            version,
            ..Default::default()
        };
        self.message = None;
    }

    fn begin_item(&mut self) {
        let value = ItemValue::empty(self.property.kind);
        self.property.items.push(Item::new(String::new(), value));
    }

    fn finish(&mut self) -> (Property, Option<String>) {
        (
            std::mem::take(&mut self.property),
            self.message.take(),
        )
    }

    fn set_vector_attribute(&mut self, name: &str, value: &str, host_suffix: Option<&str>) {
        let property = &mut self.property;
        match name {
            "device" => property.device = device_name(value, host_suffix),
            "name" => property.name = value.to_string(),
            "group" => property.group = value.to_string(),
            "label" => property.label = value.to_string(),
            "hints" => property.hints = value.to_string(),
            "state" => property.state = PropertyState::parse(value),
            "perm" => property.perm = Permission::parse(value),
            "rule" => property.rule = SwitchRule::parse(value),
            "token" => property.token = Some(value.to_string()),
            "message" => self.message = Some(value.to_string()),
            _ => log::trace!("Ignoring vector attribute {}", name),
        }
    }

    fn set_item_attribute(&mut self, name: &str, value: &str, options: &ParserOptions) {
        let Some(item) = self.property.items.last_mut() else {
            return;
        };
        match (name, &mut item.value) {
            ("name", _) => item.name = value.to_string(),
            ("label", _) => item.label = value.to_string(),
            ("hints", _) => item.hints = value.to_string(),
            ("min", ItemValue::Number(number)) => number.min = Some(parse_number_or_zero(value)),
            ("max", ItemValue::Number(number)) => number.max = Some(parse_number_or_zero(value)),
            ("step", ItemValue::Number(number)) => number.step = Some(parse_number_or_zero(value)),
            ("target", ItemValue::Number(number)) => {
                number.target = Some(parse_number_or_zero(value))
            }
            ("format", ItemValue::Number(number)) => number.format = value.to_string(),
            ("format", ItemValue::Blob(blob)) => blob.format = value.to_string(),
            ("size", ItemValue::Blob(blob)) => {
                blob.size = value.trim().parse().unwrap_or_else(|_| {
                    log::warn!("Invalid BLOB size '{}', using 0", value);
                    0
                })
            }
            ("path", ItemValue::Blob(blob)) => {
                blob.url = format!("{}{}", options.url_prefix.as_deref().unwrap_or(""), value)
            }
            ("url", ItemValue::Blob(blob)) => blob.url = value.to_string(),
            _ => log::trace!("Ignoring item attribute {}", name),
        }
    }

    fn set_item_text(&mut self, text: &str) {
        let Some(item) = self.property.items.last_mut() else {
            return;
        };
        match &mut item.value {
            ItemValue::Text(value) => *value = TextValue::new(text),
            ItemValue::Number(number) => number.value = parse_number_or_zero(text),
            ItemValue::Switch(on) => *on = text == "On",
            ItemValue::Light(state) => *state = PropertyState::parse(text),
            ItemValue::Blob(_) => log::debug!("Ignoring text in BLOB item {}", item.name),
        }
    }

    fn set_item_blob(&mut self, data: Vec<u8>) {
        if let Some(Item {
            value: ItemValue::Blob(blob),
            ..
        }) = self.property.items.last_mut()
        {
            blob.data = Some(data);
        }
    }

    /// Declared size of the BLOB item being read, if its body is a payload.
    fn pending_blob(&self) -> Option<usize> {
        match self.property.items.last() {
            Some(Item {
                value: ItemValue::Blob(BlobValue {
                    size, data: None, ..
                }),
                ..
            }) if *size > 0 => Some(*size),
            _ => None,
        }
    }
}

struct Grammar {
    production: Production,
    skip_depth: usize,
    builder: PropertyBuilder,
    version: Version,
    options: ParserOptions,
}

impl Grammar {
    fn new(options: ParserOptions) -> Grammar {
        Grammar {
            production: Production::TopLevel,
            skip_depth: 0,
            builder: PropertyBuilder::default(),
            version: Version::default(),
            options,
        }
    }

    fn pending_blob(&self) -> Option<usize> {
        match self.production {
            Production::Item {
                verb: Verb::Set | Verb::New,
            } if self.builder.property.kind == PropertyKind::Blob => self.builder.pending_blob(),
            _ => None,
        }
    }

    fn handle(&mut self, event: Event<'_>) -> Option<Message> {
        if self.skip_depth > 0 {
            match event {
                Event::BeginTag(_) => self.skip_depth += 1,
                Event::EndTag(_) => self.skip_depth -= 1,
                _ => {}
            }
            return None;
        }
        match event {
            Event::BeginTag(name) => {
                self.begin_tag(name);
                None
            }
            Event::Attribute(name, value) => {
                self.attribute(name, value);
                None
            }
            Event::Text(text) => {
                self.text(text);
                None
            }
            Event::Blob(data) => {
                if let Production::Item { .. } = self.production {
                    self.builder.set_item_blob(data);
                }
                None
            }
            Event::EndTag(_) => self.end_tag(),
        }
    }

    fn skip(&mut self, name: &str) {
        log::debug!("Skipping unexpected element <{}>", name);
        self.skip_depth = 1;
    }

    fn begin_tag(&mut self, name: &str) {
        match &self.production {
            Production::TopLevel => {
                self.production = match name {
                    "getProperties" => Production::GetProperties {
                        request: PropertyRequest::default(),
                        switch: None,
                    },
                    "enableBLOB" => Production::EnableBlob {
                        device: String::new(),
                        name: None,
                        mode: None,
                    },
                    "switchProtocol" => Production::SwitchProtocol { version: None },
                    "delProperty" => Production::DelProperty {
                        device: String::new(),
                        name: None,
                        message: None,
                    },
                    "message" => Production::Message {
                        device: None,
                        message: None,
                    },
                    _ => match parse_vector_tag(name) {
                        Some((verb, kind)) => {
                            self.builder.reset(kind, self.version);
                            Production::Vector { verb }
                        }
                        None => {
                            self.skip(name);
                            Production::TopLevel
                        }
                    },
                }
            }
            Production::Vector { verb } => {
                let verb = *verb;
                let expected = name
                    .strip_prefix(verb.item_prefix())
                    .and_then(PropertyKind::from_tag_name);
                if expected == Some(self.builder.property.kind) {
                    self.builder.begin_item();
                    self.production = Production::Item { verb };
                } else {
                    self.skip(name);
                }
            }
            _ => self.skip(name),
        }
    }

    fn attribute(&mut self, name: &str, value: &str) {
        let options = &self.options;
        match &mut self.production {
            Production::TopLevel => {}
            Production::GetProperties { request, switch } => match name {
                "device" => request.device = Some(value.to_string()),
                "name" => request.name = Some(value.to_string()),
                "version" => request.version = Version::parse(value),
                "switch" => *switch = Version::parse(value),
                _ => {}
            },
            Production::EnableBlob {
                device,
                name: property,
                ..
            } => match name {
                "device" => *device = value.to_string(),
                "name" if !value.is_empty() => *property = Some(value.to_string()),
                _ => {}
            },
            Production::SwitchProtocol { version } => {
                if name == "version" {
                    *version = Version::parse(value);
                }
            }
            Production::DelProperty {
                device,
                name: property,
                message,
            } => match name {
                "device" => *device = value.to_string(),
                "name" if !value.is_empty() => *property = Some(value.to_string()),
                "message" => *message = Some(value.to_string()),
                _ => {}
            },
            Production::Message { device, message } => match name {
                "device" => *device = Some(value.to_string()),
                "message" => *message = Some(value.to_string()),
                _ => {}
            },
            Production::Vector { verb } => {
                let host_suffix = match verb {
                    Verb::New => None,
                    Verb::Def | Verb::Set => options.host_suffix.as_deref(),
                };
                self.builder.set_vector_attribute(name, value, host_suffix)
            }
            Production::Item { .. } => self.builder.set_item_attribute(name, value, options),
        }
    }

    fn text(&mut self, text: &str) {
        match &mut self.production {
            Production::EnableBlob { mode, .. } => *mode = Some(BlobMode::parse(text)),
            Production::Item { .. } => self.builder.set_item_text(text),
            _ => log::trace!("Ignoring text outside of items"),
        }
    }

    fn end_tag(&mut self) -> Option<Message> {
        match std::mem::replace(&mut self.production, Production::TopLevel) {
            Production::TopLevel => None,
            Production::GetProperties { request, switch } => {
                Some(Message::GetProperties { request, switch })
            }
            Production::EnableBlob { device, name, mode } => match mode {
                Some(mode) => Some(Message::EnableBlob { device, name, mode }),
                None => {
                    log::debug!("enableBLOB for {} without a mode, ignoring it", device);
                    None
                }
            },
            Production::SwitchProtocol { version } => match version {
                Some(version) => Some(Message::SwitchProtocol { version }),
                None => {
                    log::warn!("switchProtocol without a valid version");
                    None
                }
            },
            Production::DelProperty {
                device,
                name,
                message,
            } => Some(Message::Delete {
                device: device_name(&device, self.options.host_suffix.as_deref()),
                name,
                message,
            }),
            Production::Message { device, message } => Some(Message::Notify { device, message }),
            Production::Vector { verb } => {
                let (property, message) = self.builder.finish();
                Some(match verb {
                    Verb::Def => Message::Define { property, message },
                    Verb::Set => Message::Update { property, message },
                    Verb::New => Message::Change { property },
                })
            }
            Production::Item { verb } => {
                self.production = Production::Vector { verb };
                None
            }
        }
    }
}

/// Reads [`Message`]s from a byte stream.
pub struct Parser<R> {
    tokenizer: Tokenizer<R>,
    grammar: Grammar,
}

impl<R: Read> Parser<R> {
    pub fn new(reader: R, options: ParserOptions) -> Parser<R> {
        Parser {
            tokenizer: Tokenizer::new(reader, &options),
            grammar: Grammar::new(options),
        }
    }

    /// The negotiated protocol version of the stream.
    pub fn version(&self) -> Version {
        self.grammar.version
    }

    /// Switches the stream to another protocol version. Takes effect for the
    /// next BLOB payload and the next property read.
    pub fn set_version(&mut self, version: Version) {
        self.grammar.version = version;
        self.tokenizer.set_version(version);
    }

    pub fn get_ref(&self) -> &R {
        self.tokenizer.get_ref()
    }

    pub fn into_inner(self) -> R {
        self.tokenizer.into_inner()
    }

    /// Reads until the next complete message. Returns `None` at the end of the stream.
    pub fn next_message(&mut self) -> Result<Option<Message>, ParseError> {
        loop {
            let Some(event) = self.tokenizer.next_event()? else {
                return Ok(None);
            };
            let is_attribute = matches!(event, Event::Attribute(..));
            let message = self.grammar.handle(event);
            if is_attribute {
                self.tokenizer.expect_blob(self.grammar.pending_blob());
            }
            if let Some(message) = message {
                log::debug!("Received {}", message.tag_name());
                return Ok(Some(message));
            }
        }
    }
}
