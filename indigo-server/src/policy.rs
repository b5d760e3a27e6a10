use std::borrow::Cow;

use indigo_protocol::{BlobMode, ItemValue, Message, PropertyKind};

#[derive(Clone, Debug, PartialEq)]
struct BlobRecord {
    device: String,
    name: Option<String>,
    mode: BlobMode,
}

/// BLOB delivery preferences of one connection, as set with `enableBLOB`.
///
/// Records are kept newest first. Without a matching record BLOBs are not delivered.
#[derive(Clone, Debug, Default)]
pub struct BlobPolicy {
    records: Vec<BlobRecord>,
}

impl BlobPolicy {
    pub fn new() -> BlobPolicy {
        BlobPolicy::default()
    }

    /// Replaces the records covered by `(device, name)`. `None` is the wildcard name.
    pub fn set(&mut self, device: &str, name: Option<&str>, mode: BlobMode) {
        self.records.retain(|record| {
            record.device != device || (record.name.is_some() && record.name.as_deref() != name)
        });
        if mode != BlobMode::Never {
            self.records.insert(
                0,
                BlobRecord {
                    device: device.to_string(),
                    name: name.map(str::to_string),
                    mode,
                },
            );
        }
    }

    pub fn mode(&self, device: &str, name: &str) -> BlobMode {
        self.records
            .iter()
            .find(|record| {
                record.device == device && record.name.as_deref().is_none_or(|n| n == name)
            })
            .map_or(BlobMode::Never, |record| record.mode)
    }

    /// Applies the policy to an outgoing message. Returns `None` if the message
    /// must not be delivered.
    pub fn filter<'a>(&self, message: &'a Message) -> Option<Cow<'a, Message>> {
        let Message::Update { property, message: text } = message else {
            return Some(Cow::Borrowed(message));
        };
        if property.kind != PropertyKind::Blob {
            return Some(Cow::Borrowed(message));
        }
        match self.mode(&property.device, &property.name) {
            BlobMode::Never => None,
            BlobMode::Also => Some(Cow::Borrowed(message)),
            BlobMode::Url => {
                let mut property = property.clone();
                for item in &mut property.items {
                    if let ItemValue::Blob(blob) = &mut item.value
                        && !blob.url.is_empty()
                    {
                        blob.data = None;
                    }
                }
                Some(Cow::Owned(Message::Update {
                    property,
                    message: text.clone(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use indigo_protocol::{BlobValue, Item, Property};

    fn image(url: &str) -> Message {
        let blob = BlobValue {
            url: url.to_string(),
            size: 3,
            data: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        Message::Update {
            property: Property::new(PropertyKind::Blob, "CCD", "IMAGE")
                .with_item(Item::new("IMAGE", ItemValue::Blob(blob))),
            message: None,
        }
    }

    fn delivered_data(policy: &BlobPolicy, message: &Message) -> Option<Option<Vec<u8>>> {
        let filtered = policy.filter(message)?;
        let Message::Update { property, .. } = &*filtered else {
            panic!("expected Update");
        };
        Some(property.items[0].blob().and_then(|blob| blob.data.clone()))
    }

    #[test]
    fn never_by_default() {
        let policy = BlobPolicy::new();
        assert_eq!(policy.mode("CCD", "IMAGE"), BlobMode::Never);
        assert_eq!(delivered_data(&policy, &image("")), None);
    }

    #[test]
    fn specific_and_wildcard_records() {
        let mut policy = BlobPolicy::new();
        policy.set("CCD", Some("IMAGE"), BlobMode::Url);
        assert_eq!(policy.mode("CCD", "IMAGE"), BlobMode::Url);
        assert_eq!(policy.mode("CCD", "PREVIEW"), BlobMode::Never);
        policy.set("CCD", None, BlobMode::Also);
        assert_eq!(policy.mode("CCD", "PREVIEW"), BlobMode::Also);
        assert_eq!(policy.mode("CCD", "IMAGE"), BlobMode::Also);
        assert_eq!(policy.mode("Guider", "IMAGE"), BlobMode::Never);
        policy.set("CCD", Some("PREVIEW"), BlobMode::Url);
        assert_eq!(policy.mode("CCD", "PREVIEW"), BlobMode::Url);
        assert_eq!(policy.mode("CCD", "IMAGE"), BlobMode::Url);
        policy.set("CCD", Some("IMAGE"), BlobMode::Never);
        assert_eq!(policy.mode("CCD", "IMAGE"), BlobMode::Never);
        assert_eq!(policy.mode("CCD", "PREVIEW"), BlobMode::Url);
    }

    #[test]
    fn url_mode_strips_payload_only_with_url() {
        let mut policy = BlobPolicy::new();
        policy.set("CCD", None, BlobMode::Url);
        assert_eq!(delivered_data(&policy, &image("http://host/1.fits")), Some(None));
        assert_eq!(delivered_data(&policy, &image("")), Some(Some(vec![1, 2, 3])));
        policy.set("CCD", None, BlobMode::Also);
        assert_eq!(
            delivered_data(&policy, &image("http://host/1.fits")),
            Some(Some(vec![1, 2, 3]))
        );
    }

    #[test]
    fn other_messages_pass() {
        let policy = BlobPolicy::new();
        let message = Message::Notify {
            device: None,
            message: Some("hello".to_string()),
        };
        assert!(matches!(policy.filter(&message), Some(Cow::Borrowed(_))));
    }
}
