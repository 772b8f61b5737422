//! SeedPod protocol: shared by tracker, seeder and client.
//! Envelope codec, dispatcher and peer client over TCP; registry, replication
//! planning and chunked transfer logic.

pub mod error;
pub mod file;
pub mod protocol;
pub mod wire;

pub use error::{ErrorKind, OpError};
pub use file::{Catalog, FileId, FileMetadata};
pub use protocol::{
    OwnerSet, Payload, Request, Response, SeederCall, Status, TrackerCall, DEFAULT_PORT,
};
pub use wire::{encode_frame, FrameDecodeError, FrameEncodeError};

pub mod dispatcher;
pub mod peer;
pub mod rebalance;
pub mod registry;
pub mod storage;
pub mod transfer;

pub use dispatcher::{Dispatcher, Service};
pub use peer::{CallPolicy, PeerClient};
pub use registry::NodeRegistry;
