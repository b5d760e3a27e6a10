use std::fmt::Display;

/// Size of the inline text buffer of a text item, including the terminator
/// byte that legacy peers reserve. Longer text is kept in the overflow value.
pub const TEXT_VALUE_SIZE: usize = 512;

/// The version of the protocol.
/// A version always consists of a major and a minor part.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Version {
    major: usize,
    minor: usize,
}

impl Version {
    /// INDI compatible version 1.7 of the protocol
    pub const LEGACY: Version = Version { major: 1, minor: 7 };

    /// Version 2.0 of the protocol, with length-declared BLOB transfer
    pub const V2_0: Version = Version { major: 2, minor: 0 };

    pub const fn new(major: usize, minor: usize) -> Version {
        Version { major, minor }
    }

    /// Returns the latest supported version
    pub fn latest() -> Version {
        Version::V2_0
    }

    /// The major part of the version
    pub fn major(&self) -> usize {
        self.major
    }

    /// The minor part of the version
    pub fn minor(&self) -> usize {
        self.minor
    }

    /// Whether BLOB payloads are transferred with a declared length and
    /// decoded in bulk instead of being scanned for the closing tag.
    pub fn has_bulk_blobs(&self) -> bool {
        *self >= Version::V2_0
    }

    /// Parses a wire version string such as `"1.7"` or `"2.0"`.
    ///
    /// Every `1.x` version maps to [`Version::LEGACY`].
    pub fn parse(value: &str) -> Option<Version> {
        let (major, minor) = value.trim().split_once('.')?;
        let major = major.parse::<usize>().ok()?;
        let minor = minor.parse::<usize>().ok()?;
        match major {
            0 => None,
            1 => Some(Version::LEGACY),
            _ => Some(Version { major, minor }),
        }
    }
}

#[test]
fn version_ordering() {
    assert!(Version { major: 1, minor: 0 } < Version { major: 1, minor: 7 });
    assert!(Version::V2_0 > Version::LEGACY);
    assert!(Version::V2_0.has_bulk_blobs());
    assert!(!Version::LEGACY.has_bulk_blobs());
}

#[test]
fn version_parsing() {
    assert_eq!(Version::parse("1.7"), Some(Version::LEGACY));
    assert_eq!(Version::parse("1.0"), Some(Version::LEGACY));
    assert_eq!(Version::parse("2.0"), Some(Version::V2_0));
    assert_eq!(Version::parse("512"), None);
    assert_eq!(Version::parse("x.y"), None);
}

impl Default for Version {
    fn default() -> Self {
        Self::LEGACY
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The value type of a property. Fixed when the property is first defined.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum PropertyKind {
    #[default]
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl PropertyKind {
    /// The kind name as it appears inside element names, e.g. `Number` in `defNumberVector`.
    pub fn tag_name(&self) -> &'static str {
        match self {
            PropertyKind::Text => "Text",
            PropertyKind::Number => "Number",
            PropertyKind::Switch => "Switch",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        }
    }

    pub fn from_tag_name(name: &str) -> Option<PropertyKind> {
        match name {
            "Text" => Some(PropertyKind::Text),
            "Number" => Some(PropertyKind::Number),
            "Switch" => Some(PropertyKind::Switch),
            "Light" => Some(PropertyKind::Light),
            "BLOB" => Some(PropertyKind::Blob),
            _ => None,
        }
    }
}

/// Lifecycle state of a property, also used as the value of light items.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    /// Unknown values read as `Idle`.
    pub fn parse(value: &str) -> PropertyState {
        match value {
            "Ok" => PropertyState::Ok,
            "Busy" => PropertyState::Busy,
            "Alert" => PropertyState::Alert,
            _ => PropertyState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum Permission {
    #[default]
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl Permission {
    /// Unknown values read as `ReadOnly`.
    pub fn parse(value: &str) -> Permission {
        match value {
            "rw" => Permission::ReadWrite,
            "wo" => Permission::WriteOnly,
            _ => Permission::ReadOnly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadOnly => "ro",
            Permission::ReadWrite => "rw",
            Permission::WriteOnly => "wo",
        }
    }
}

/// Exclusivity rule of a switch property.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum SwitchRule {
    OneOfMany,
    AtMostOne,
    #[default]
    AnyOfMany,
}

impl SwitchRule {
    /// Unknown values read as `AnyOfMany`.
    pub fn parse(value: &str) -> SwitchRule {
        match value {
            "OneOfMany" => SwitchRule::OneOfMany,
            "AtMostOne" => SwitchRule::AtMostOne,
            _ => SwitchRule::AnyOfMany,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }

    /// Whether setting one switch clears all of its siblings.
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, SwitchRule::AnyOfMany)
    }
}

/// How BLOB payloads are delivered to a connection, as requested with `enableBLOB`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum BlobMode {
    #[default]
    Never,
    Also,
    Url,
}

impl BlobMode {
    /// Unknown values read as `Also`.
    pub fn parse(value: &str) -> BlobMode {
        match value {
            "Never" => BlobMode::Never,
            "URL" => BlobMode::Url,
            _ => BlobMode::Also,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlobMode::Never => "Never",
            BlobMode::Also => "Also",
            BlobMode::Url => "URL",
        }
    }
}

/// Value of a text item. Text longer than the inline limit is stored whole in
/// the overflow value, while the inline value keeps a truncated prefix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextValue {
    value: String,
    long_value: Option<String>,
}

impl TextValue {
    pub fn new(text: impl Into<String>) -> TextValue {
        let text = text.into();
        if text.len() < TEXT_VALUE_SIZE {
            return TextValue {
                value: text,
                long_value: None,
            };
        }
        let mut end = TEXT_VALUE_SIZE - 1;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        TextValue {
            value: text[..end].to_string(),
            long_value: Some(text),
        }
    }

    /// The complete text, whether it fits inline or not.
    pub fn as_str(&self) -> &str {
        self.long_value.as_deref().unwrap_or(&self.value)
    }

    /// The inline part of the text.
    pub fn inline(&self) -> &str {
        &self.value
    }

    pub fn overflow(&self) -> Option<&str> {
        self.long_value.as_deref()
    }
}

#[test]
fn long_text_overflows() {
    let short = TextValue::new("M31");
    assert_eq!(short.as_str(), "M31");
    assert!(short.overflow().is_none());

    let long = "é".repeat(400);
    let text = TextValue::new(long.clone());
    assert_eq!(text.as_str(), long);
    assert_eq!(text.overflow(), Some(long.as_str()));
    assert!(text.inline().len() < TEXT_VALUE_SIZE);
    assert!(long.starts_with(text.inline()));
}

/// Value of a number item.
///
/// `min`, `max` and `step` are `None` when the wire message did not carry the
/// attribute; a merge leaves the stored bound untouched in that case.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumberValue {
    pub value: f64,
    pub target: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub format: String,
}

impl NumberValue {
    pub fn new(value: f64) -> NumberValue {
        NumberValue {
            value,
            ..Default::default()
        }
    }

    /// The requested target, which follows the value unless given explicitly.
    pub fn target(&self) -> f64 {
        self.target.unwrap_or(self.value)
    }

    /// Whether the value lies outside of the known bounds.
    pub fn is_out_of_range(&self) -> bool {
        self.min.is_some_and(|min| self.value < min) || self.max.is_some_and(|max| self.value > max)
    }
}

/// Value of a BLOB item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlobValue {
    /// File type suffix such as `.fits` or `.jpeg`
    pub format: String,
    /// Where the payload can be downloaded from, for by-reference delivery
    pub url: String,
    /// Declared payload size in bytes
    pub size: usize,
    /// Decoded payload, exclusively owned by the item
    pub data: Option<Vec<u8>>,
}

impl BlobValue {
    /// Derives a format suffix from the URL's file extension, e.g. `.fits`.
    pub fn format_from_url(&self) -> Option<String> {
        let path = self.url.split(['?', '#']).next()?;
        let file = path.rsplit('/').next()?;
        let dot = file.rfind('.')?;
        (dot + 1 < file.len()).then(|| file[dot..].to_string())
    }
}

#[test]
fn blob_format_from_url() {
    let blob = BlobValue {
        url: "http://localhost:7624/blob/0x1234.fits?raw=1".to_string(),
        ..Default::default()
    };
    assert_eq!(blob.format_from_url().as_deref(), Some(".fits"));
    let blob = BlobValue {
        url: "http://localhost:7624/blob/image".to_string(),
        ..Default::default()
    };
    assert_eq!(blob.format_from_url(), None);
}

/// Kind-tagged value of an item.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemValue {
    Text(TextValue),
    Number(NumberValue),
    Switch(bool),
    Light(PropertyState),
    Blob(BlobValue),
}

impl ItemValue {
    /// The empty value of an item of the given kind.
    pub fn empty(kind: PropertyKind) -> ItemValue {
        match kind {
            PropertyKind::Text => ItemValue::Text(TextValue::default()),
            PropertyKind::Number => ItemValue::Number(NumberValue::default()),
            PropertyKind::Switch => ItemValue::Switch(false),
            PropertyKind::Light => ItemValue::Light(PropertyState::Idle),
            PropertyKind::Blob => ItemValue::Blob(BlobValue::default()),
        }
    }

    pub fn kind(&self) -> PropertyKind {
        match self {
            ItemValue::Text(_) => PropertyKind::Text,
            ItemValue::Number(_) => PropertyKind::Number,
            ItemValue::Switch(_) => PropertyKind::Switch,
            ItemValue::Light(_) => PropertyKind::Light,
            ItemValue::Blob(_) => PropertyKind::Blob,
        }
    }
}

/// One value slot within a property.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub name: String,
    pub label: String,
    pub hints: String,
    pub value: ItemValue,
}

impl Item {
    pub fn new(name: impl Into<String>, value: ItemValue) -> Item {
        Item {
            name: name.into(),
            label: String::new(),
            hints: String::new(),
            value,
        }
    }

    pub fn text(&self) -> Option<&TextValue> {
        match &self.value {
            ItemValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn number(&self) -> Option<&NumberValue> {
        match &self.value {
            ItemValue::Number(number) => Some(number),
            _ => None,
        }
    }

    pub fn switch(&self) -> Option<bool> {
        match self.value {
            ItemValue::Switch(on) => Some(on),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<PropertyState> {
        match self.value {
            ItemValue::Light(state) => Some(state),
            _ => None,
        }
    }

    pub fn blob(&self) -> Option<&BlobValue> {
        match &self.value {
            ItemValue::Blob(blob) => Some(blob),
            _ => None,
        }
    }
}

/// Identity of a property: the device it belongs to and its name.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PropertyKey {
    pub device: String,
    pub name: String,
}

/// A named, typed group of items of one device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Property {
    pub device: String,
    pub name: String,
    pub group: String,
    pub label: String,
    pub hints: String,
    pub kind: PropertyKind,
    pub state: PropertyState,
    pub perm: Permission,
    pub rule: SwitchRule,
    pub version: Version,
    /// Opaque access-control value of a change request
    pub token: Option<String>,
    pub items: Vec<Item>,
}

impl Property {
    pub fn new(kind: PropertyKind, device: impl Into<String>, name: impl Into<String>) -> Property {
        Property {
            device: device.into(),
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn key(&self) -> PropertyKey {
        PropertyKey {
            device: self.device.clone(),
            name: self.name.clone(),
        }
    }

    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn item_mut(&mut self, name: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.name == name)
    }

    /// Appends an item; items are never reordered.
    pub fn with_item(mut self, item: Item) -> Property {
        self.items.push(item);
        self
    }
}

/// Parses a number in decimal or sexagesimal notation (`"12:30:00"`, `"-5 30"`).
pub fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Ok(number) = value.parse::<f64>() {
        return Some(number);
    }
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let mut result = 0.0;
    let mut scale = 1.0;
    let mut parts = 0;
    for part in rest.split([':', ' ']).filter(|part| !part.is_empty()) {
        if parts == 3 {
            return None;
        }
        let part = part.parse::<f64>().ok()?;
        if part.is_sign_negative() {
            return None;
        }
        result += part / scale;
        scale *= 60.0;
        parts += 1;
    }
    if parts < 2 {
        return None;
    }
    Some(if negative { -result } else { result })
}
