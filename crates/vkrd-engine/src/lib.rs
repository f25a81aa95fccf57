//! Capture replay: consumes decoded call streams, re-executes them against
//! a live Vulkan device and intercepts marked command buffers for resource
//! dumping.

pub mod consumer;
pub mod delegate;
pub mod device;
pub mod dump;
pub mod error;
pub mod snapshot;
pub mod worker;

pub(crate) mod convert;
pub(crate) mod remap;

pub use consumer::ReplayConsumer;
pub use delegate::{DelegateEvent, DumpDelegate, DumpedBuffer, DumpedImage, RecordingDelegate};
pub use device::DeviceContext;
pub use dump::DumpEngine;
pub use error::{ReplayError, SnapshotError};
