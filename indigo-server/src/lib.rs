//! # INDIGO Server Library
//!
//! This crate provides the connection side of INDIGO property synchronisation: it reads
//! protocol messages from a peer, keeps a mirror of every property the peer announced,
//! and forwards everything to a caller supplied [`Bus`].
//!
//! ## Overview
//!
//! Each connection is served by a [`connection::Connection`] that owns
//!
//! - a streaming [`Parser`](indigo_protocol::Parser) reading from the transport,
//! - a [`cache::PropertyCache`] of the properties defined by the peer,
//! - a [`peer::Peer`] handle used to write back to the peer.
//!
//! When the transport ends, or the peer sends malformed input, the connection tears
//! down: every device still present in the cache is reported as deleted, so observers
//! never see a half removed device.
//!
//! ## Architecture
//!
//! - **[`Bus`] Trait**: Receives every definition, update, deletion and request a peer
//!   sends. Implementations own devices, forward to other connections, or record.
//! - **[`Role`]**: Whether the peer announces properties ([`Role::Device`]) or
//!   requests them ([`Role::Client`]). Messages that do not fit the role are ignored.
//! - **[`server::Server`]**: A TCP listener that serves every client connection on its
//!   own thread.
//!
//! ## Basic Usage
//!
//! ### Implementing a Bus
//!
//! ```ignore
//! use indigo_server::{Bus, peer::Peer};
//! use indigo_protocol::{Message, Property, PropertyRequest};
//! use std::sync::Arc;
//!
//! struct Focuser {
//!     position: Property,
//! }
//!
//! impl Bus for Focuser {
//!     fn enumerate_properties(&self, peer: &Arc<Peer>, request: &PropertyRequest) {
//!         if request.matches(&self.position) {
//!             let message = Message::Define { property: self.position.clone(), message: None };
//!             if let Err(e) = peer.send(&message) {
//!                 log::error!("Sending definition failed: {}", e);
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ### Starting the Server
//!
//! ```ignore
//! use indigo_server::server::Builder;
//!
//! let server = Builder::new().max_blob_size(64 << 20).build(Focuser::new());
//! server.listen("0.0.0.0:7624")?;
//! ```
//!
//! ## Thread Model
//!
//! A connection runs on a single thread and blocks on transport reads. The property
//! cache is protected by a mutex and can be inspected from other threads. [`Bus`]
//! callbacks are invoked after the cache lock is released and receive shared
//! snapshots of cache entries, so a callback may freely read the cache again.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics:
//! - `info`: connections accepted and finished
//! - `warn`: rejected redefinitions, out-of-range numbers
//! - `debug`: every message received and ignored messages
//! - `error`: connections aborted because of malformed input
use std::sync::Arc;

use indigo_protocol::{BlobMode, Property, PropertyRequest};

use crate::peer::Peer;

pub mod cache;
pub mod connection;
pub mod peer;
pub mod policy;
pub mod server;

/// Which side of the protocol the remote peer is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    /// The peer owns devices and announces their properties.
    Device,
    /// The peer is a client that requests properties and changes.
    Client,
}

/// Receiver of everything a peer sends.
///
/// Property arguments are snapshots of the connection's cache entries. They are
/// immutable; a later update of the same property produces a new snapshot.
pub trait Bus: Send + Sync {
    /// A device peer defined a property.
    fn define_property(&self, peer: &Arc<Peer>, property: &Arc<Property>, message: Option<&str>) {
        let _ = (peer, property, message);
    }

    /// A device peer changed state or values of a defined property.
    fn update_property(&self, peer: &Arc<Peer>, property: &Arc<Property>, message: Option<&str>) {
        let _ = (peer, property, message);
    }

    /// A device peer removed a property. `None` means all properties of `device`.
    fn delete_property(
        &self,
        peer: &Arc<Peer>,
        device: &str,
        property: Option<&Arc<Property>>,
        message: Option<&str>,
    ) {
        let _ = (peer, device, property, message);
    }

    /// A client peer requests new values. Owns any uploaded BLOB payload.
    fn change_property(&self, peer: &Arc<Peer>, property: Property) {
        log::debug!(
            "Change of {}.{} requested by {} was not handled",
            property.device,
            property.name,
            peer.name()
        );
    }

    /// The properties in `request` should be sent to `peer`.
    ///
    /// For device peers this is called once when the connection starts, with a
    /// request for everything. The bus answers it by asking the peer for its
    /// properties.
    fn enumerate_properties(&self, peer: &Arc<Peer>, request: &PropertyRequest) {
        let _ = (peer, request);
    }

    /// A client peer changed its BLOB delivery preference. The peer's policy
    /// is already updated when this is called.
    fn enable_blob(&self, peer: &Arc<Peer>, device: &str, name: Option<&str>, mode: BlobMode) {
        let _ = (peer, device, name, mode);
    }

    /// A device peer sent a free text message.
    fn send_message(&self, peer: &Arc<Peer>, device: Option<&str>, message: Option<&str>) {
        let _ = (peer, device, message);
    }
}
