use std::io::Read;
use std::sync::Arc;

use indigo_protocol::{Message, ParseError, Parser, ParserOptions, PropertyRequest, Version};

use crate::{Bus, Role, cache::PropertyCache, peer::Peer};

/// How a connection ended.
#[derive(Debug)]
pub enum Outcome {
    /// The transport reached its end or failed.
    Closed,
    /// The peer sent input the parser could not accept.
    Aborted(ParseError),
}

impl Outcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted(_))
    }
}

/// Session state of one connection: the parser reading from the transport,
/// the peer handle writing to it and the cache of everything the peer defined.
pub struct Connection<B: Bus + ?Sized, R> {
    bus: Arc<B>,
    role: Role,
    parser: Parser<R>,
    peer: Arc<Peer>,
    cache: Arc<PropertyCache>,
}

impl<B: Bus + ?Sized, R: Read> Connection<B, R> {
    pub fn new(
        bus: Arc<B>,
        role: Role,
        reader: R,
        peer: Arc<Peer>,
        options: ParserOptions,
    ) -> Connection<B, R> {
        let mut parser = Parser::new(reader, options);
        parser.set_version(peer.version());
        Connection {
            bus,
            role,
            parser,
            peer,
            cache: Arc::new(PropertyCache::new()),
        }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// The cache of this connection. It stays usable after the connection ended.
    pub fn cache(&self) -> &Arc<PropertyCache> {
        &self.cache
    }

    /// Processes messages until the transport ends or the input is malformed,
    /// then reports every remaining device as deleted and closes the peer.
    pub fn run(mut self) -> Outcome {
        if self.role == Role::Device {
            self.bus
                .enumerate_properties(&self.peer, &PropertyRequest::all());
        }
        let outcome = loop {
            match self.parser.next_message() {
                Ok(Some(message)) => self.dispatch(message),
                Ok(None) => break Outcome::Closed,
                Err(ParseError::Io(e)) => {
                    log::info!("Connection to {} failed: {}", self.peer.name(), e);
                    break Outcome::Closed;
                }
                Err(e) => {
                    log::error!("Aborting connection to {}: {}", self.peer.name(), e);
                    break Outcome::Aborted(e);
                }
            }
        };
        self.teardown();
        outcome
    }

    fn dispatch(&mut self, message: Message) {
        match (self.role, message) {
            (_, Message::SwitchProtocol { version }) => self.switch_version(version),
            (Role::Device, Message::Define { property, message }) => {
                if let Some(property) = self.cache.define(property) {
                    self.bus
                        .define_property(&self.peer, &property, message.as_deref());
                }
            }
            (Role::Device, Message::Update { property, message }) => {
                if let Some(property) = self.cache.update(property) {
                    self.bus
                        .update_property(&self.peer, &property, message.as_deref());
                }
            }
            (Role::Device, Message::Delete { device, name, message }) => {
                let removed = self.cache.delete(&device, name.as_deref());
                if removed.is_empty() {
                    log::debug!("Nothing to delete for {} {:?}", device, name);
                }
                for property in &removed {
                    self.bus
                        .delete_property(&self.peer, &device, Some(property), message.as_deref());
                }
            }
            (Role::Device, Message::Notify { device, message }) => {
                self.bus
                    .send_message(&self.peer, device.as_deref(), message.as_deref());
            }
            (Role::Client, Message::GetProperties { request, switch }) => {
                if let Some(version) = request.version {
                    self.switch_version(version);
                }
                if let Some(version) = switch {
                    let version = version.min(Version::latest());
                    if version > self.parser.version() {
                        self.switch_version(version);
                        self.send(&Message::SwitchProtocol { version });
                    }
                }
                self.bus.enumerate_properties(&self.peer, &request);
            }
            (Role::Client, Message::Change { property }) => {
                self.bus.change_property(&self.peer, property);
            }
            (Role::Client, Message::EnableBlob { device, name, mode }) => {
                self.peer.set_blob_mode(&device, name.as_deref(), mode);
                self.bus
                    .enable_blob(&self.peer, &device, name.as_deref(), mode);
            }
            (role, message) => {
                log::debug!(
                    "Ignoring {} from {:?} peer {}",
                    message.tag_name(),
                    role,
                    self.peer.name()
                );
            }
        }
    }

    fn switch_version(&mut self, version: Version) {
        if version != self.parser.version() {
            log::debug!("Connection to {} switched to {}", self.peer.name(), version);
        }
        self.parser.set_version(version);
        self.peer.set_version(version);
    }

    fn send(&self, message: &Message) {
        if let Err(e) = self.peer.send(message) {
            log::warn!("Sending {} to {} failed: {}", message.tag_name(), self.peer.name(), e);
        }
    }

    fn teardown(&self) {
        let remaining = self.cache.drain();
        for device in remaining.chunk_by(|a, b| a.device == b.device) {
            let name = &device[0].device;
            log::debug!("Device {} of {} is gone", name, self.peer.name());
            self.bus.delete_property(&self.peer, name, None, None);
        }
        drop(remaining);
        self.peer.close();
    }
}
