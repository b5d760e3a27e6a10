//! # INDIGO Client
//!
//! A Rust client library for connecting to INDIGO and INDI servers and mirroring the
//! properties of the devices they host.
//!
//! ## Overview
//!
//! This crate provides a thin client on top of the
//! [`indigo_server`](https://docs.rs/indigo-server/) connection loop. The client writes
//! requests to the server and runs the connection loop in the device role: every
//! definition, update and deletion the server announces is mirrored in a property cache
//! and forwarded to a caller supplied [`Bus`].
//!
//! ## Protocol Support
//!
//! - **getProperties**: Request the properties of all or one device, optionally switching
//!   the connection to protocol version 2.0
//! - **new*Vector**: Request a change of values, including BLOB uploads
//! - **enableBLOB**: Select how BLOB payloads are delivered to this client
//!
//! For detailed protocol information, see the [`indigo_protocol`](https://docs.rs/indigo-protocol/) crate.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use indigo_client::IndigoClient;
//! use indigo_protocol::{BlobMode, PropertyRequest, Version};
//! use std::sync::Arc;
//!
//! let client = IndigoClient::connect("127.0.0.1:7624")?;
//! client.get_properties(PropertyRequest::all(), Some(Version::V2_0))?;
//! client.enable_blob("CCD Imager Simulator", None, BlobMode::Also)?;
//!
//! // Blocks until the server disconnects
//! let outcome = client.run(Arc::new(MyBus::default()))?;
//! ```
//!
//! ## Related Crates
//!
//! - [`indigo_server`](https://docs.rs/indigo-server/) - Connection loop and server
//! - [`indigo_protocol`](https://docs.rs/indigo-protocol/) - Protocol parsing and writing
use std::{
    io,
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::Arc,
};

use indigo_protocol::{BlobMode, Message, ParserOptions, Property, PropertyRequest, Version};
use indigo_server::{
    Bus, Role,
    connection::{Connection, Outcome},
    peer::Peer,
};

/// INDIGO client connected to one server.
pub struct IndigoClient {
    tcp: TcpStream,
    peer: Arc<Peer>,
    options: ParserOptions,
}

impl IndigoClient {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<IndigoClient> {
        let tcp = TcpStream::connect(addr)?;
        let name = tcp.peer_addr()?.to_string();
        let peer = Arc::new(Peer::new(name, tcp.try_clone()?));
        log::info!("Connected to {}", peer.name());
        Ok(IndigoClient {
            tcp,
            peer,
            options: ParserOptions::default(),
        })
    }

    /// Replaces the options used to read from the server.
    pub fn with_options(mut self, options: ParserOptions) -> IndigoClient {
        self.options = options;
        self
    }

    /// Handle used to write to the server.
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Requests the properties in `request`. With `switch` the server is asked to
    /// upgrade the connection; its `switchProtocol` answer takes effect on arrival.
    pub fn get_properties(
        &self,
        request: PropertyRequest,
        switch: Option<Version>,
    ) -> io::Result<()> {
        self.peer.send(&Message::GetProperties { request, switch })
    }

    /// Requests new values for a property of a remote device.
    pub fn change_property(&self, property: Property) -> io::Result<()> {
        self.peer.send(&Message::Change { property })
    }

    pub fn enable_blob(&self, device: &str, name: Option<&str>, mode: BlobMode) -> io::Result<()> {
        self.peer.send(&Message::EnableBlob {
            device: device.to_string(),
            name: name.map(str::to_string),
            mode,
        })
    }

    /// Mirrors the server's properties into `bus` until the connection ends.
    ///
    /// Blocks the calling thread. Requests can be sent from other threads while
    /// it runs. When the connection ends every mirrored device is reported as
    /// deleted and later requests are discarded.
    pub fn run<B: Bus + ?Sized>(&self, bus: Arc<B>) -> io::Result<Outcome> {
        let reader = self.tcp.try_clone()?;
        let connection = Connection::new(
            bus,
            Role::Device,
            reader,
            Arc::clone(&self.peer),
            self.options.clone(),
        );
        Ok(connection.run())
    }

    /// Closes the connection, which ends [`run`](Self::run).
    pub fn shutdown(&self) -> io::Result<()> {
        self.tcp.shutdown(Shutdown::Both)
    }
}
