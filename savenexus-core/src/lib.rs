//! savenexus-core: Core types for rewriting NeXus files.
//!
//! This crate holds everything the conversion engine needs that does not
//! touch a file: the node and attribute model, the traversal path stack,
//! the deferred link table, slab planning, the histogram data model, and
//! progress/cancellation plumbing.
//!

pub mod error;
pub mod link;
pub mod model;
pub mod node;
pub mod path;
pub mod progress;
pub mod slab;

pub use error::{Error, Result};
pub use link::{LinkRecord, LinkTable};
pub use model::{BankGeometry, DataModel, DetectorId, RectangularBank, Workspace};
pub use node::{element_count, ArrayData, Attribute, DatasetSpec, ElementType, ObjectKind};
pub use path::PathStack;
pub use progress::{CancelToken, NoProgress, Progress};
pub use slab::{SlabPlan, WriteMode};
