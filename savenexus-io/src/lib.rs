//! savenexus-io: NeXus tree copy-and-rewrite engine.
//!
//! This crate copies a NeXus container into a new one, rebuilding the
//! `data`, `data_errors` and `time_of_flight` fields of rectangular
//! detector banks from an in-memory histogram model and recreating
//! internal links once the copied tree is complete.
//!

pub mod attributes;
pub mod bank;
pub mod chunked;
pub mod container;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod memory;
pub mod session;
mod walker;

pub use chunked::{BankWrite, ChunkedWriter, FixedMemory, MemoryProbe, SystemMemory};
pub use container::{outline, Entry, EntryKind, NexusSink, NexusSource};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{Hdf5Sink, Hdf5Source};
pub use memory::MemoryFile;
#[cfg(feature = "hdf5")]
pub use session::{convert, convert_with};
pub use session::{convert_tree, resolve_links, ConversionSummary, ConvertOptions, FileSession};
