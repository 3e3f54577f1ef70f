#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod connection;
pub mod context;
pub mod envelope;
pub mod error;
pub mod message;
pub mod options;
pub mod pump;
pub mod transaction;

pub use connection::{Connection, ConnectionId, Convey, RoutingKey};
pub use context::RequestContext;
pub use message::{Message, Request, Response};
pub use options::Options;
#[cfg(feature = "macros")]
pub use tether_macros::Message;
