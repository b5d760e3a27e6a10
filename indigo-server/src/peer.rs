use std::io::{self, Write};

use indigo_protocol::{BlobMode, Message, Version};
use parking_lot::Mutex;

use crate::policy::BlobPolicy;

/// Handle to the remote end of a connection, used to send messages to it.
///
/// A peer is shared between the connection loop and [`Bus`](crate::Bus)
/// implementations. It serialises every message with the version negotiated
/// on the connection and applies the peer's BLOB delivery policy.
pub struct Peer {
    name: String,
    version: Mutex<Version>,
    policy: Mutex<BlobPolicy>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl Peer {
    pub fn new(name: impl Into<String>, output: impl Write + Send + 'static) -> Peer {
        Peer {
            name: name.into(),
            version: Mutex::new(Version::default()),
            policy: Mutex::new(BlobPolicy::default()),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Name of the peer, usually its network address.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        *self.version.lock()
    }

    pub fn set_version(&self, version: Version) {
        *self.version.lock() = version;
    }

    pub fn blob_mode(&self, device: &str, name: &str) -> BlobMode {
        self.policy.lock().mode(device, name)
    }

    pub fn set_blob_mode(&self, device: &str, name: Option<&str>, mode: BlobMode) {
        self.policy.lock().set(device, name, mode);
    }

    /// Writes a message to the peer. BLOB updates the peer did not enable are dropped.
    pub fn send(&self, message: &Message) -> io::Result<()> {
        let version = self.version();
        let filtered = self.policy.lock().filter(message);
        let Some(message) = filtered else {
            log::trace!("BLOB delivery to {} is disabled", self.name);
            return Ok(());
        };
        let mut buffer = Vec::new();
        message.write_to(&mut buffer, version)?;
        let mut output = self.output.lock();
        output.write_all(&buffer)?;
        output.flush()
    }

    /// Detaches the peer from its transport. Later messages are discarded.
    pub fn close(&self) {
        *self.output.lock() = Box::new(io::sink());
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.name)
            .field("version", &self.version())
            .finish()
    }
}
