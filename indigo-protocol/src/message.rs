use crate::property::{BlobMode, Property, Version};

/// Scope of a `getProperties` request. `None` fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyRequest {
    pub device: Option<String>,
    pub name: Option<String>,
    /// Protocol version announced by the requesting side
    pub version: Option<Version>,
}

impl PropertyRequest {
    pub fn all() -> PropertyRequest {
        PropertyRequest::default()
    }

    pub fn device(device: impl Into<String>) -> PropertyRequest {
        PropertyRequest {
            device: Some(device.into()),
            ..Default::default()
        }
    }

    /// Whether a property falls into the requested scope.
    pub fn matches(&self, property: &Property) -> bool {
        self.device.as_ref().is_none_or(|device| *device == property.device)
            && self.name.as_ref().is_none_or(|name| *name == property.name)
    }
}

/// A complete top-level message of the protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// `getProperties`: asks the receiver to enumerate its properties.
    /// `switch` requests an upgrade of the connection's protocol version.
    GetProperties {
        request: PropertyRequest,
        switch: Option<Version>,
    },
    /// `def*Vector`: a device announces a property.
    Define {
        property: Property,
        message: Option<String>,
    },
    /// `set*Vector`: a device reports changed state or values.
    Update {
        property: Property,
        message: Option<String>,
    },
    /// `new*Vector`: a client requests a change of values.
    Change { property: Property },
    /// `delProperty`: one property, or with `name` absent all properties of a device, are gone.
    Delete {
        device: String,
        name: Option<String>,
        message: Option<String>,
    },
    /// `message`: free text notification.
    Notify {
        device: Option<String>,
        message: Option<String>,
    },
    /// `enableBLOB`: BLOB delivery preference of the sender.
    EnableBlob {
        device: String,
        name: Option<String>,
        mode: BlobMode,
    },
    /// `switchProtocol`: the sender switched to another protocol version.
    SwitchProtocol { version: Version },
}

impl Message {
    /// The wire name of the top-level element.
    pub fn tag_name(&self) -> String {
        match self {
            Message::GetProperties { .. } => "getProperties".to_string(),
            Message::Define { property, .. } => format!("def{}Vector", property.kind.tag_name()),
            Message::Update { property, .. } => format!("set{}Vector", property.kind.tag_name()),
            Message::Change { property } => format!("new{}Vector", property.kind.tag_name()),
            Message::Delete { .. } => "delProperty".to_string(),
            Message::Notify { .. } => "message".to_string(),
            Message::EnableBlob { .. } => "enableBLOB".to_string(),
            Message::SwitchProtocol { .. } => "switchProtocol".to_string(),
        }
    }
}

#[test]
fn request_scope() {
    let property = Property::new(crate::property::PropertyKind::Text, "CCD", "INFO");
    assert!(PropertyRequest::all().matches(&property));
    assert!(PropertyRequest::device("CCD").matches(&property));
    assert!(!PropertyRequest::device("Mount").matches(&property));
    let request = PropertyRequest {
        device: Some("CCD".to_string()),
        name: Some("EXPOSURE".to_string()),
        version: None,
    };
    assert!(!request.matches(&property));
}
