//! Devices and observers shared by the loopback tests.
use std::sync::{Arc, mpsc};

use indigo_protocol::{
    BlobValue, Item, ItemValue, Message, NumberValue, Permission, Property, PropertyKind,
    PropertyRequest, PropertyState, SwitchRule, TextValue, Version,
};
use indigo_server::{Bus, peer::Peer};
use parking_lot::Mutex;

pub const MOUNT: &str = "Mount Simulator";
pub const CCD: &str = "CCD Simulator";

/// A mount and a camera that answer change requests.
///
/// Changing `CCD_EXPOSURE` produces an image of `image_size` bytes.
pub struct Simulator {
    properties: Mutex<Vec<Property>>,
    image_size: usize,
}

impl Simulator {
    pub fn new(image_size: usize) -> Simulator {
        let mut coordinates = Property::new(PropertyKind::Number, MOUNT, "EQUATORIAL_COORDINATES");
        coordinates.group = "Main".to_string();
        coordinates.perm = Permission::ReadWrite;
        coordinates.state = PropertyState::Ok;
        let ra = NumberValue {
            value: 12.5,
            min: Some(0.0),
            max: Some(24.0),
            step: Some(0.0),
            format: "%10.6m".to_string(),
            ..Default::default()
        };
        let dec = NumberValue {
            min: Some(-90.0),
            max: Some(90.0),
            ..ra.clone()
        };
        let coordinates = coordinates
            .with_item(Item::new("RA", ItemValue::Number(ra)))
            .with_item(Item::new("DEC", ItemValue::Number(NumberValue { value: 45.0, ..dec })));

        let mut info = Property::new(PropertyKind::Text, MOUNT, "INFO");
        info.items
            .push(Item::new("MODEL", ItemValue::Text(TextValue::new("Simulator <v2>"))));

        let mut exposure = Property::new(PropertyKind::Number, CCD, "CCD_EXPOSURE");
        exposure.perm = Permission::ReadWrite;
        exposure
            .items
            .push(Item::new("EXPOSURE", ItemValue::Number(NumberValue::new(0.0))));

        let mut frame = Property::new(PropertyKind::Switch, CCD, "CCD_FRAME_TYPE");
        frame.perm = Permission::ReadWrite;
        frame.rule = SwitchRule::OneOfMany;
        frame.items.push(Item::new("LIGHT", ItemValue::Switch(true)));
        frame.items.push(Item::new("DARK", ItemValue::Switch(false)));

        let image = Property::new(PropertyKind::Blob, CCD, "CCD_IMAGE")
            .with_item(Item::new("IMAGE", ItemValue::empty(PropertyKind::Blob)));

        Simulator {
            properties: Mutex::new(vec![coordinates, info, exposure, frame, image]),
            image_size,
        }
    }

    /// The payload of every image the simulator produces.
    pub fn image(&self) -> Vec<u8> {
        (0..self.image_size).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn send(peer: &Peer, message: &Message) {
        if let Err(e) = peer.send(message) {
            log::warn!("Simulator cannot reach {}: {}", peer.name(), e);
        }
    }
}

impl Bus for Simulator {
    fn enumerate_properties(&self, peer: &Arc<Peer>, request: &PropertyRequest) {
        for property in self.properties.lock().iter().filter(|p| request.matches(p)) {
            let message = Message::Define {
                property: property.clone(),
                message: None,
            };
            Simulator::send(peer, &message);
        }
    }

    fn change_property(&self, peer: &Arc<Peer>, change: Property) {
        let mut properties = self.properties.lock();
        let Some(property) = properties
            .iter_mut()
            .find(|p| p.device == change.device && p.name == change.name)
        else {
            log::warn!("Simulator has no {}.{}", change.device, change.name);
            return;
        };
        if property.kind == PropertyKind::Switch && property.rule.is_exclusive() {
            for item in &mut property.items {
                item.value = ItemValue::Switch(false);
            }
        }
        for item in change.items {
            let Some(target) = property.item_mut(&item.name) else {
                continue;
            };
            match (&mut target.value, item.value) {
                (ItemValue::Number(number), ItemValue::Number(value)) => number.value = value.value,
                (value, new) => *value = new,
            }
        }
        property.state = PropertyState::Ok;
        let update = Message::Update {
            property: property.clone(),
            message: Some(format!("{} changed", property.name)),
        };
        Simulator::send(peer, &update);
        if property.name != "CCD_EXPOSURE" {
            return;
        }
        let blob = BlobValue {
            format: ".fits".to_string(),
            size: self.image_size,
            data: Some(self.image()),
            ..Default::default()
        };
        let mut image = Property::new(PropertyKind::Blob, CCD, "CCD_IMAGE")
            .with_item(Item::new("IMAGE", ItemValue::Blob(blob)));
        image.state = PropertyState::Ok;
        Simulator::send(peer, &Message::Update {
            property: image,
            message: None,
        });
    }
}

/// Observed by a [`Recorder`].
#[derive(Debug)]
pub enum Event {
    Defined(Arc<Property>),
    Updated(Arc<Property>),
    Deleted {
        device: String,
        name: Option<String>,
    },
}

/// Client side bus that requests every property when the connection starts and
/// forwards everything it observes to a channel.
pub struct Recorder {
    events: mpsc::Sender<Event>,
    switch: Option<Version>,
}

impl Recorder {
    pub fn new(switch: Option<Version>) -> (Recorder, mpsc::Receiver<Event>) {
        let (events, receiver) = mpsc::channel();
        (Recorder { events, switch }, receiver)
    }

    fn record(&self, event: Event) {
        if self.events.send(event).is_err() {
            log::debug!("Nobody is listening to the recorder");
        }
    }
}

impl Bus for Recorder {
    fn define_property(&self, _: &Arc<Peer>, property: &Arc<Property>, _: Option<&str>) {
        self.record(Event::Defined(Arc::clone(property)));
    }

    fn update_property(&self, _: &Arc<Peer>, property: &Arc<Property>, _: Option<&str>) {
        self.record(Event::Updated(Arc::clone(property)));
    }

    fn delete_property(
        &self,
        _: &Arc<Peer>,
        device: &str,
        property: Option<&Arc<Property>>,
        _: Option<&str>,
    ) {
        self.record(Event::Deleted {
            device: device.to_string(),
            name: property.map(|property| property.name.clone()),
        });
    }

    fn enumerate_properties(&self, peer: &Arc<Peer>, request: &PropertyRequest) {
        let message = Message::GetProperties {
            request: request.clone(),
            switch: self.switch,
        };
        if let Err(e) = peer.send(&message) {
            log::warn!("Requesting properties from {} failed: {}", peer.name(), e);
        }
    }
}
