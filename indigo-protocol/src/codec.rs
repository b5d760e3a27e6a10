/// Wire serialisation of protocol messages
use std::{
    borrow::Cow,
    io::{self, Write},
};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;

use crate::{
    message::Message,
    property::{BlobValue, Item, ItemValue, Permission, Property, PropertyKind, Version},
};

/// Raw bytes per line of a legacy BLOB payload, giving 72 base64 characters.
const LEGACY_LINE_BYTES: usize = 54;

/// Applies the five markup escapes.
pub fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 16);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

fn write_optional(writer: &mut impl Write, name: &str, value: Option<&str>) -> io::Result<()> {
    match value {
        Some(value) => write!(writer, " {}='{}'", name, escape(value)),
        None => Ok(()),
    }
}

fn write_bound(writer: &mut impl Write, name: &str, value: Option<f64>) -> io::Result<()> {
    match value {
        Some(value) => write!(writer, " {}='{}'", name, value),
        None => Ok(()),
    }
}

fn write_item_body(writer: &mut impl Write, item: &Item) -> io::Result<()> {
    match &item.value {
        ItemValue::Text(text) => write!(writer, "{}", escape(text.as_str())),
        ItemValue::Number(number) => write!(writer, "{}", number.value),
        ItemValue::Switch(on) => writer.write_all(if *on { b"On" } else { b"Off" }),
        ItemValue::Light(state) => writer.write_all(state.as_str().as_bytes()),
        ItemValue::Blob(_) => Ok(()),
    }
}

fn write_blob_item(
    writer: &mut impl Write,
    item: &Item,
    blob: &BlobValue,
    version: Version,
) -> io::Result<()> {
    write!(
        writer,
        "<oneBLOB name='{}' format='{}'",
        escape(&item.name),
        escape(&blob.format)
    )?;
    let Some(data) = &blob.data else {
        if blob.url.is_empty() {
            return writer.write_all(b" size='0'/>\n");
        }
        return writeln!(writer, " url='{}'/>", escape(&blob.url));
    };
    write!(writer, " size='{}'>", data.len())?;
    if version.has_bulk_blobs() {
        let mut encoder = EncoderWriter::new(&mut *writer, &STANDARD);
        encoder.write_all(data)?;
        encoder.finish()?;
    } else {
        let mut line = [0_u8; LEGACY_LINE_BYTES / 3 * 4];
        writer.write_all(b"\n")?;
        for chunk in data.chunks(LEGACY_LINE_BYTES) {
            let len = STANDARD
                .encode_slice(chunk, &mut line)
                .map_err(io::Error::other)?;
            writer.write_all(&line[..len])?;
            writer.write_all(b"\n")?;
        }
    }
    writer.write_all(b"</oneBLOB>\n")
}

fn write_definition(
    writer: &mut impl Write,
    property: &Property,
    message: Option<&str>,
) -> io::Result<()> {
    let kind = property.kind.tag_name();
    write!(
        writer,
        "<def{}Vector device='{}' name='{}' group='{}' label='{}' state='{}'",
        kind,
        escape(&property.device),
        escape(&property.name),
        escape(&property.group),
        escape(&property.label),
        property.state.as_str()
    )?;
    if !property.hints.is_empty() {
        write!(writer, " hints='{}'", escape(&property.hints))?;
    }
    if property.kind != PropertyKind::Light {
        write!(writer, " perm='{}'", property.perm.as_str())?;
    }
    if property.kind == PropertyKind::Switch {
        write!(writer, " rule='{}'", property.rule.as_str())?;
    }
    write_optional(writer, "message", message)?;
    writer.write_all(b">\n")?;
    for item in &property.items {
        write!(
            writer,
            "<def{} name='{}' label='{}'",
            kind,
            escape(&item.name),
            escape(&item.label)
        )?;
        if !item.hints.is_empty() {
            write!(writer, " hints='{}'", escape(&item.hints))?;
        }
        if let ItemValue::Number(number) = &item.value {
            if !number.format.is_empty() {
                write!(writer, " format='{}'", escape(&number.format))?;
            }
            write_bound(writer, "min", number.min)?;
            write_bound(writer, "max", number.max)?;
            write_bound(writer, "step", number.step)?;
        }
        if property.kind == PropertyKind::Blob {
            writer.write_all(b"/>\n")?;
            continue;
        }
        writer.write_all(b">")?;
        write_item_body(writer, item)?;
        writeln!(writer, "</def{}>", kind)?;
    }
    writeln!(writer, "</def{}Vector>", kind)
}

fn write_items(
    writer: &mut impl Write,
    property: &Property,
    version: Version,
    with_bounds: bool,
) -> io::Result<()> {
    let kind = property.kind.tag_name();
    for item in &property.items {
        if let ItemValue::Blob(blob) = &item.value {
            write_blob_item(writer, item, blob, version)?;
            continue;
        }
        write!(writer, "<one{} name='{}'", kind, escape(&item.name))?;
        if let ItemValue::Number(number) = &item.value
            && with_bounds
        {
            write_bound(writer, "min", number.min)?;
            write_bound(writer, "max", number.max)?;
            write_bound(writer, "step", number.step)?;
            if version.has_bulk_blobs() && property.perm != Permission::ReadOnly {
                write!(writer, " target='{}'", number.target())?;
            }
        }
        writer.write_all(b">")?;
        write_item_body(writer, item)?;
        writeln!(writer, "</one{}>", kind)?;
    }
    Ok(())
}

impl Message {
    /// Serialises the message as it is sent to a peer speaking `version`.
    pub fn write_to(&self, writer: &mut impl Write, version: Version) -> io::Result<()> {
        match self {
            Message::GetProperties { request, switch } => {
                write!(
                    writer,
                    "<getProperties version='{}'",
                    request.version.unwrap_or(version)
                )?;
                write_optional(writer, "device", request.device.as_deref())?;
                write_optional(writer, "name", request.name.as_deref())?;
                if let Some(switch) = switch {
                    write!(writer, " switch='{}'", switch)?;
                }
                writer.write_all(b"/>\n")
            }
            Message::Define { property, message } => {
                write_definition(writer, property, message.as_deref())
            }
            Message::Update { property, message } => {
                let kind = property.kind.tag_name();
                write!(
                    writer,
                    "<set{}Vector device='{}' name='{}' state='{}'",
                    kind,
                    escape(&property.device),
                    escape(&property.name),
                    property.state.as_str()
                )?;
                write_optional(writer, "message", message.as_deref())?;
                writer.write_all(b">\n")?;
                write_items(writer, property, version, true)?;
                writeln!(writer, "</set{}Vector>", kind)
            }
            Message::Change { property } => {
                let kind = property.kind.tag_name();
                write!(
                    writer,
                    "<new{}Vector device='{}' name='{}'",
                    kind,
                    escape(&property.device),
                    escape(&property.name)
                )?;
                write_optional(writer, "token", property.token.as_deref())?;
                writer.write_all(b">\n")?;
                write_items(writer, property, version, false)?;
                writeln!(writer, "</new{}Vector>", kind)
            }
            Message::Delete {
                device,
                name,
                message,
            } => {
                write!(writer, "<delProperty device='{}'", escape(device))?;
                write_optional(writer, "name", name.as_deref())?;
                write_optional(writer, "message", message.as_deref())?;
                writer.write_all(b"/>\n")
            }
            Message::Notify { device, message } => {
                writer.write_all(b"<message")?;
                write_optional(writer, "device", device.as_deref())?;
                write_optional(writer, "message", message.as_deref())?;
                writer.write_all(b"/>\n")
            }
            Message::EnableBlob { device, name, mode } => {
                write!(writer, "<enableBLOB device='{}'", escape(device))?;
                write_optional(writer, "name", name.as_deref())?;
                writeln!(writer, ">{}</enableBLOB>", mode.as_str())
            }
            Message::SwitchProtocol { version } => {
                writeln!(writer, "<switchProtocol version='{}'/>", version)
            }
        }
    }
}

#[cfg(feature = "tokio")]
mod tokio_codec {
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::Encoder;

    use crate::{message::Message, property::Version};

    /// Encodes messages for a peer speaking a fixed protocol version.
    #[derive(Clone, Debug, Default)]
    pub struct MessageEncoder {
        pub version: Version,
    }

    impl Encoder<Message> for MessageEncoder {
        type Error = std::io::Error;

        fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
            item.write_to(&mut dst.writer(), self.version)
        }
    }

    #[test]
    fn encodes_into_bytes() {
        let mut encoder = MessageEncoder::default();
        let mut dst = BytesMut::new();
        encoder
            .encode(
                Message::SwitchProtocol {
                    version: Version::V2_0,
                },
                &mut dst,
            )
            .unwrap();
        assert_eq!(&dst[..], b"<switchProtocol version='2.0'/>\n");
    }
}

#[cfg(feature = "tokio")]
pub use tokio_codec::MessageEncoder;
