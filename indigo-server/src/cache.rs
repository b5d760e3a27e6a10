use std::collections::BTreeMap;
use std::sync::Arc;

use indigo_protocol::{BlobValue, Item, ItemValue, NumberValue, Property, PropertyKey, PropertyKind};
use parking_lot::Mutex;

/// Mirror of every property a peer has defined on one connection.
///
/// Entries are unique per `(device, name)` and handed out as [`Arc`] snapshots.
/// A merge never mutates a snapshot somebody else still holds; it writes a
/// fresh copy into the cache instead.
#[derive(Debug, Default)]
pub struct PropertyCache {
    entries: Mutex<BTreeMap<PropertyKey, Arc<Property>>>,
}

impl PropertyCache {
    pub fn new() -> PropertyCache {
        PropertyCache::default()
    }

    /// Stores a definition. A known `(device, name)` is replaced in place.
    ///
    /// Returns `None` if the property was already defined with another kind.
    pub fn define(&self, property: Property) -> Option<Arc<Property>> {
        let mut entries = self.entries.lock();
        let key = property.key();
        if let Some(existing) = entries.get(&key)
            && existing.kind != property.kind
        {
            log::warn!(
                "Redefinition of {}.{} as {} rejected, it is a {} property",
                key.device,
                key.name,
                property.kind.tag_name(),
                existing.kind.tag_name()
            );
            return None;
        }
        let property = Arc::new(property);
        entries.insert(key, Arc::clone(&property));
        Some(property)
    }

    /// Merges an update into the cached definition and returns the result.
    ///
    /// Unknown properties and kind mismatches are ignored.
    pub fn update(&self, property: Property) -> Option<Arc<Property>> {
        let mut entries = self.entries.lock();
        let key = property.key();
        let Some(entry) = entries.get_mut(&key) else {
            log::debug!("Update of undefined property {}.{} ignored", key.device, key.name);
            return None;
        };
        if entry.kind != property.kind {
            log::warn!(
                "{} update of {}.{} ignored, it is a {} property",
                property.kind.tag_name(),
                key.device,
                key.name,
                entry.kind.tag_name()
            );
            return None;
        }
        let cached = Arc::make_mut(entry);
        cached.state = property.state;
        if cached.kind == PropertyKind::Switch && cached.rule.is_exclusive() {
            for item in &mut cached.items {
                item.value = ItemValue::Switch(false);
            }
        }
        for item in property.items {
            match cached.item_mut(&item.name) {
                Some(target) => merge_item(&key, target, item),
                None => log::debug!(
                    "Update of unknown item {} of {}.{} ignored",
                    item.name,
                    key.device,
                    key.name
                ),
            }
        }
        Some(Arc::clone(entry))
    }

    /// Removes one property, or every property of `device` when `name` is `None`.
    pub fn delete(&self, device: &str, name: Option<&str>) -> Vec<Arc<Property>> {
        let mut entries = self.entries.lock();
        if let Some(name) = name {
            let key = PropertyKey {
                device: device.to_string(),
                name: name.to_string(),
            };
            return entries.remove(&key).into_iter().collect();
        }
        let mut removed = Vec::new();
        entries.retain(|key, property| {
            if key.device == device {
                removed.push(Arc::clone(property));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Removes and returns every entry, ordered by device and name.
    pub fn drain(&self) -> Vec<Arc<Property>> {
        std::mem::take(&mut *self.entries.lock())
            .into_values()
            .collect()
    }

    pub fn get(&self, device: &str, name: &str) -> Option<Arc<Property>> {
        let key = PropertyKey {
            device: device.to_string(),
            name: name.to_string(),
        };
        self.entries.lock().get(&key).cloned()
    }

    /// Snapshots of every entry of one device.
    pub fn device(&self, device: &str) -> Vec<Arc<Property>> {
        self.entries
            .lock()
            .iter()
            .filter(|(key, _)| key.device == device)
            .map(|(_, property)| Arc::clone(property))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn merge_item(key: &PropertyKey, target: &mut Item, item: Item) {
    match (&mut target.value, item.value) {
        (ItemValue::Text(text), ItemValue::Text(value)) => *text = value,
        (ItemValue::Number(number), ItemValue::Number(value)) => merge_number(number, value),
        (ItemValue::Switch(on), ItemValue::Switch(value)) => *on = value,
        (ItemValue::Light(state), ItemValue::Light(value)) => *state = value,
        (ItemValue::Blob(blob), ItemValue::Blob(value)) => merge_blob(blob, value),
        (_, value) => {
            log::warn!(
                "{} value for item {} of {}.{} ignored",
                value.kind().tag_name(),
                target.name,
                key.device,
                key.name
            );
            return;
        }
    }
    if let ItemValue::Number(number) = &target.value
        && number.is_out_of_range()
    {
        log::warn!(
            "Value {} of {}.{}.{} is outside of [{}, {}]",
            number.value,
            key.device,
            key.name,
            target.name,
            number.min.unwrap_or(f64::NEG_INFINITY),
            number.max.unwrap_or(f64::INFINITY)
        );
    }
}

fn merge_number(number: &mut NumberValue, value: NumberValue) {
    number.value = value.value;
    number.target = value.target;
    if value.min.is_some() {
        number.min = value.min;
    }
    if value.max.is_some() {
        number.max = value.max;
    }
    if value.step.is_some() {
        number.step = value.step;
    }
    if !value.format.is_empty() {
        number.format = value.format;
    }
}

fn merge_blob(blob: &mut BlobValue, value: BlobValue) {
    if value.data.is_some() {
        *blob = value;
        return;
    }
    blob.url = value.url;
    blob.format = if value.format.is_empty() {
        blob.format_from_url().unwrap_or_default()
    } else {
        value.format
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use indigo_protocol::{PropertyState, SwitchRule, TextValue};
    use std::sync::Weak;

    fn coordinates(ra: f64) -> Property {
        let mut property = Property::new(PropertyKind::Number, "Mount", "EQUATORIAL_COORDINATES");
        property.state = PropertyState::Busy;
        property.with_item(Item::new("RA", ItemValue::Number(NumberValue::new(ra))))
    }

    fn bounded(ra: f64) -> Property {
        let mut property = coordinates(ra);
        if let ItemValue::Number(number) = &mut property.items[0].value {
            number.min = Some(0.0);
            number.max = Some(24.0);
            number.step = Some(0.5);
        }
        property
    }

    fn ra(cache: &PropertyCache) -> NumberValue {
        cache
            .get("Mount", "EQUATORIAL_COORDINATES")
            .and_then(|property| property.item("RA").and_then(|item| item.number()).cloned())
            .unwrap()
    }

    fn image(data: Option<Vec<u8>>, format: &str, url: &str) -> Property {
        let blob = BlobValue {
            format: format.to_string(),
            url: url.to_string(),
            size: data.as_ref().map_or(0, Vec::len),
            data,
        };
        Property::new(PropertyKind::Blob, "CCD", "CCD_IMAGE")
            .with_item(Item::new("IMAGE", ItemValue::Blob(blob)))
    }

    #[test]
    fn define_then_update() {
        let cache = PropertyCache::new();
        cache.define(bounded(12.5)).unwrap();
        let mut update = coordinates(13.0);
        update.state = PropertyState::Ok;
        let merged = cache.update(update.clone()).unwrap();
        assert_eq!(merged.state, PropertyState::Ok);
        assert_eq!(ra(&cache).value, 13.0);
        assert_eq!(ra(&cache).min, Some(0.0));
        assert_eq!(ra(&cache).max, Some(24.0));
        assert_eq!(ra(&cache).step, Some(0.5));

        let before = cache.get("Mount", "EQUATORIAL_COORDINATES").unwrap();
        cache.update(update).unwrap();
        let after = cache.get("Mount", "EQUATORIAL_COORDINATES").unwrap();
        assert_eq!(before, after);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn explicit_bounds_overwrite() {
        let cache = PropertyCache::new();
        cache.define(bounded(12.5)).unwrap();
        let mut update = coordinates(12.0);
        if let ItemValue::Number(number) = &mut update.items[0].value {
            number.max = Some(12.0);
        }
        cache.update(update).unwrap();
        assert_eq!(ra(&cache).min, Some(0.0));
        assert_eq!(ra(&cache).max, Some(12.0));
    }

    #[test]
    fn out_of_range_is_applied() {
        let cache = PropertyCache::new();
        cache.define(bounded(12.5)).unwrap();
        cache.update(coordinates(30.0)).unwrap();
        assert_eq!(ra(&cache).value, 30.0);
        assert_eq!(ra(&cache).target(), 30.0);
    }

    #[test]
    fn redefinition_in_place() {
        let cache = PropertyCache::new();
        cache.define(bounded(12.5)).unwrap();
        cache.define(coordinates(1.0)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(ra(&cache).value, 1.0);
        assert_eq!(ra(&cache).min, None);

        let text = Property::new(PropertyKind::Text, "Mount", "EQUATORIAL_COORDINATES");
        assert!(cache.define(text).is_none());
        assert_eq!(cache.get("Mount", "EQUATORIAL_COORDINATES").unwrap().kind, PropertyKind::Number);

        let mut other = coordinates(2.0);
        other.name = "HORIZONTAL_COORDINATES".to_string();
        cache.define(other).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn updates_of_unknown_properties_are_ignored() {
        let cache = PropertyCache::new();
        assert!(cache.update(coordinates(1.0)).is_none());
        cache.define(coordinates(1.0)).unwrap();
        let mut text = Property::new(PropertyKind::Text, "Mount", "EQUATORIAL_COORDINATES");
        text.items.push(Item::new("RA", ItemValue::Text(TextValue::new("12:00"))));
        assert!(cache.update(text).is_none());
        assert_eq!(ra(&cache).value, 1.0);
    }

    #[test]
    fn exclusive_switch_clears_siblings() {
        let switch = |rule: SwitchRule, items: &[(&str, bool)]| {
            let mut property = Property::new(PropertyKind::Switch, "Mount", "TRACK_RATE");
            property.rule = rule;
            for (name, on) in items {
                property.items.push(Item::new(*name, ItemValue::Switch(*on)));
            }
            property
        };
        let cache = PropertyCache::new();
        let all = [("SIDEREAL", true), ("SOLAR", false), ("LUNAR", false)];
        cache.define(switch(SwitchRule::OneOfMany, &all)).unwrap();
        let merged = cache
            .update(switch(SwitchRule::AnyOfMany, &[("LUNAR", true)]))
            .unwrap();
        let values: Vec<_> = merged.items.iter().map(|item| item.switch()).collect();
        assert_eq!(values, [Some(false), Some(false), Some(true)]);

        let cache = PropertyCache::new();
        cache.define(switch(SwitchRule::AnyOfMany, &all)).unwrap();
        let merged = cache
            .update(switch(SwitchRule::AnyOfMany, &[("LUNAR", true)]))
            .unwrap();
        let values: Vec<_> = merged.items.iter().map(|item| item.switch()).collect();
        assert_eq!(values, [Some(true), Some(false), Some(true)]);
    }

    #[test]
    fn snapshots_are_not_mutated() {
        let cache = PropertyCache::new();
        let defined = cache.define(coordinates(1.0)).unwrap();
        cache.update(coordinates(2.0)).unwrap();
        assert_eq!(defined.items[0].number().map(|n| n.value), Some(1.0));
        assert_eq!(ra(&cache).value, 2.0);
    }

    #[test]
    fn url_only_blob_keeps_payload() {
        let cache = PropertyCache::new();
        cache.define(image(None, "", "")).unwrap();
        cache
            .update(image(Some(vec![1, 2, 3]), ".raw", ""))
            .unwrap();
        let merged = cache
            .update(image(None, "", "http://host:7624/blob/0x10.fits"))
            .unwrap();
        let blob = merged.items[0].blob().unwrap();
        assert_eq!(blob.format, ".fits");
        assert_eq!(blob.url, "http://host:7624/blob/0x10.fits");
        assert_eq!(blob.data.as_deref(), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn delete_one_or_all() {
        let cache = PropertyCache::new();
        cache.define(coordinates(1.0)).unwrap();
        let mut other = coordinates(2.0);
        other.name = "HORIZONTAL_COORDINATES".to_string();
        cache.define(other).unwrap();
        cache.define(image(Some(vec![0; 16]), ".raw", "")).unwrap();

        let removed = cache.delete("Mount", Some("HORIZONTAL_COORDINATES"));
        assert_eq!(removed.len(), 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.delete("Mount", Some("HORIZONTAL_COORDINATES")).is_empty());

        cache.define(coordinates(3.0)).unwrap();
        let removed = cache.delete("Mount", None);
        assert_eq!(removed.len(), 1);
        assert!(cache.device("Mount").is_empty());
        assert_eq!(cache.device("CCD").len(), 1);
    }

    #[test]
    fn deleted_blobs_are_released() {
        let cache = PropertyCache::new();
        cache.define(image(None, "", "")).unwrap();
        cache
            .update(image(Some(vec![0xAA; 1024]), ".raw", ""))
            .unwrap();
        let mut second = image(Some(vec![0x55; 1024]), ".raw", "");
        second.name = "CCD_PREVIEW".to_string();
        cache.define(second).unwrap();

        let weak: Vec<Weak<Property>> = cache.device("CCD").iter().map(Arc::downgrade).collect();
        assert_eq!(weak.len(), 2);
        let removed = cache.delete("CCD", None);
        assert_eq!(removed.len(), 2);
        drop(removed);
        assert!(cache.is_empty());
        assert!(weak.iter().all(|weak| weak.upgrade().is_none()));
    }

    #[test]
    fn drain_empties_cache() {
        let cache = PropertyCache::new();
        cache.define(coordinates(1.0)).unwrap();
        cache.define(image(None, "", "")).unwrap();
        let drained = cache.drain();
        let devices: Vec<_> = drained.iter().map(|p| p.device.as_str()).collect();
        assert_eq!(devices, ["CCD", "Mount"]);
        assert!(cache.is_empty());
    }
}
