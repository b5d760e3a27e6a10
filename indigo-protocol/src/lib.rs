//! # INDIGO Protocol Library
//!
//! This crate provides a streaming implementation of the XML property protocol spoken
//! between INDIGO (and INDI) device servers and their clients, covering telescopes,
//! cameras, focusers and other astronomical instruments.
//!
//! ## Overview
//!
//! Devices expose their state as *properties*: named, typed vectors of items.
//! Over a connection, properties are announced, updated, requested to change and
//! deleted. This library allows you to:
//!
//! - Read messages from any blocking byte stream without building a document tree
//! - Receive image payloads (BLOBs) in both the legacy scanned and the 2.0 bulk transfer mode
//! - Write every message kind back to the wire for a given protocol version
//!
//! ## Protocol Features
//!
//! - **Protocol Versions**: 1.7 (INDI compatible) and 2.0
//! - **Property Kinds**: Text, Number, Switch, Light and BLOB
//! - **Message Types**:
//!   - `getProperties`: Request a snapshot of properties, optionally switching to a newer version
//!   - `def*Vector`: A device announces a property
//!   - `set*Vector`: A device reports a change
//!   - `new*Vector`: A client requests a change
//!   - `delProperty`: A device removes one or all of its properties
//!   - `message`: Free text notification
//!   - `enableBLOB`: BLOB delivery preference of a client
//!   - `switchProtocol`: Switch the connection to another protocol version
//!
//! ## Basic Usage
//!
//! ### Reading Messages
//!
//! ```
//! use indigo_protocol::{Message, Parser, ParserOptions, PropertyState};
//! use std::io::Cursor;
//!
//! let input = br#"<defNumberVector device="Mount" name="EQUATORIAL_COORDINATES" state="Busy" perm="rw">
//!   <defNumber name="RA" min="0" max="24">12.5</defNumber>
//! </defNumberVector>"#;
//! let mut parser = Parser::new(Cursor::new(&input[..]), ParserOptions::default());
//! let Some(Message::Define { property, .. }) = parser.next_message().expect("Input is valid") else {
//!     panic!("Expected a definition");
//! };
//! assert_eq!(property.state, PropertyState::Busy);
//! let ra = property.item("RA").and_then(|item| item.number()).expect("RA is a number");
//! assert_eq!(ra.value, 12.5);
//! assert_eq!(ra.max, Some(24.0));
//! ```
//!
//! ### Writing Messages
//!
//! ```
//! use indigo_protocol::{Message, PropertyRequest, Version};
//!
//! let msg = Message::GetProperties { request: PropertyRequest::all(), switch: None };
//! let mut buffer = Vec::new();
//! msg.write_to(&mut buffer, Version::V2_0).expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer, b"<getProperties version='2.0'/>\n");
//! ```
//!
//! ## BLOB Transfer
//!
//! The negotiated version selects how BLOB payloads are read:
//!
//! - **1.7**: base64 text is scanned up to the closing tag and decoded in chunks
//! - **2.0**: the declared `size` determines the exact number of base64 characters,
//!   which are read directly from the stream and decoded in bulk
//!
//! Both modes decode into a buffer sized from the declared length and never write past it.
//!
//! ## Error Handling
//!
//! This library uses the [`error::ParseError`] type for stream parsing errors. Any
//! error is final for the stream it occurred on. Semantic anomalies (invalid
//! numbers, BLOB size mismatches) are logged through the `log` facade and do not
//! produce errors.
//!
//! ## Features
//!
//! - `tokio`: provides a `tokio_util::codec::Encoder` for messages
pub mod blob;
pub mod codec;
pub mod error;
pub mod message;
pub mod parser;
pub mod property;
pub mod tokenizer;

pub use error::ParseError;
pub use message::{Message, PropertyRequest};
pub use parser::{Parser, ParserOptions};
pub use property::{
    BlobMode, BlobValue, Item, ItemValue, NumberValue, Permission, Property, PropertyKey,
    PropertyKind, PropertyState, SwitchRule, TextValue, Version,
};
