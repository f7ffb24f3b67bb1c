//! Container traits implemented by every storage backend.
//!
//! Nodes are addressed by absolute slash-delimited paths. The read side is
//! lazy: [`NexusSource::entries`] lists one group at a time, so the walker
//! never holds more than the current branch.

use crate::error::Context;
use crate::Result;
use savenexus_core::path::{self, ROOT};
use savenexus_core::{ArrayData, Attribute, DatasetSpec, ObjectKind};

/// Name of the attribute carrying a group's NeXus class.
pub const NX_CLASS: &str = "NX_class";

/// Name of the attribute carrying a node's canonical path.
pub const TARGET: &str = "target";

/// Kind of a child entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A group with its NeXus class (empty when the group declares none).
    Group { class: String },
    Dataset,
}

/// One child of a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

impl Entry {
    #[must_use]
    pub fn group(name: &str, class: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Group {
                class: class.to_string(),
            },
        }
    }

    #[must_use]
    pub fn dataset(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Dataset,
        }
    }
}

/// Read access to a hierarchical container.
pub trait NexusSource {
    /// Children of the group at `path`, in the container's iteration order.
    ///
    /// # Errors
    /// Returns an error if `path` is not a readable group.
    fn entries(&self, path: &str) -> Result<Vec<Entry>>;

    /// Canonical path of the node at `path`.
    ///
    /// This is the node's `target` attribute when present, otherwise `path`.
    ///
    /// # Errors
    /// Returns an error if the node cannot be opened.
    fn canonical_path(&self, path: &str) -> Result<String>;

    /// All attributes of the node at `path`.
    ///
    /// # Errors
    /// Returns an error if the node or one of its attributes cannot be read.
    fn attributes(&self, path: &str) -> Result<Vec<Attribute>>;

    /// Element type and shape of the dataset at `path`.
    ///
    /// # Errors
    /// Returns an error if `path` is not a dataset.
    fn dataset_spec(&self, path: &str) -> Result<DatasetSpec>;

    /// Whole payload of the dataset at `path`.
    ///
    /// # Errors
    /// Returns an error if the dataset cannot be read.
    fn read_dataset(&self, path: &str) -> Result<ArrayData>;
}

/// Write access to a hierarchical container.
///
/// Creating a node or attribute that already exists is an error.
pub trait NexusSink {
    /// Create an empty group. The parent must exist.
    ///
    /// # Errors
    /// Returns an error if the group cannot be created.
    fn create_group(&mut self, path: &str) -> Result<()>;

    /// Attach an attribute to the node at `path`.
    ///
    /// # Errors
    /// Returns an error if the attribute cannot be written.
    fn write_attribute(&mut self, path: &str, attribute: &Attribute) -> Result<()>;

    /// Create a dataset and write its whole payload.
    ///
    /// # Errors
    /// Returns an error if the payload does not match `spec` or cannot be written.
    fn write_dataset(&mut self, path: &str, spec: &DatasetSpec, data: &ArrayData) -> Result<()>;

    /// Create a dataset whose payload is written later with [`Self::write_slab`].
    ///
    /// # Errors
    /// Returns an error if the dataset cannot be created.
    fn create_dataset(&mut self, path: &str, spec: &DatasetSpec) -> Result<()>;

    /// Write float32 values into a rank-3 dataset starting at index `x_start`
    /// of the first axis. `data` covers whole `(y, t)` planes.
    ///
    /// # Errors
    /// Returns an error if the slab does not fit the dataset.
    fn write_slab(&mut self, path: &str, x_start: usize, data: &[f32]) -> Result<()>;

    /// Kind of the object at `path`, or `None` if nothing exists there.
    ///
    /// # Errors
    /// Returns an error if the object exists but cannot be inspected.
    fn object_kind(&self, path: &str) -> Result<Option<ObjectKind>>;

    /// Create a hard link named `name` in group `parent`, pointing at `target`.
    ///
    /// # Errors
    /// Returns an error if the link cannot be created.
    fn create_link(&mut self, target: &str, parent: &str, name: &str) -> Result<()>;

    /// Flush pending writes.
    ///
    /// # Errors
    /// Returns an error if the backend fails to flush.
    fn flush(&mut self) -> Result<()>;
}

/// Indented outline of a container, one line per node in depth-first order.
///
/// Groups show their class, datasets their element type and shape. Nodes
/// reached through a link show their canonical path instead.
///
/// # Errors
/// Returns an error if a group or dataset cannot be read.
pub fn outline<S: NexusSource + ?Sized>(source: &S) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    outline_group(source, ROOT, 0, &mut lines)?;
    Ok(lines)
}

fn outline_group<S: NexusSource + ?Sized>(
    source: &S,
    group_path: &str,
    depth: usize,
    lines: &mut Vec<String>,
) -> Result<()> {
    let indent = "  ".repeat(depth);
    for entry in source.entries(group_path).context("list group", group_path)? {
        let node_path = path::join(group_path, &entry.name);
        let canonical = source
            .canonical_path(&node_path)
            .context("read target", &node_path)?;
        if canonical != node_path {
            lines.push(format!("{indent}{} -> {canonical}", entry.name));
            continue;
        }
        match entry.kind {
            EntryKind::Group { class } if class.is_empty() => {
                lines.push(format!("{indent}{}/", entry.name));
                outline_group(source, &node_path, depth + 1, lines)?;
            }
            EntryKind::Group { class } => {
                lines.push(format!("{indent}{}/ ({class})", entry.name));
                outline_group(source, &node_path, depth + 1, lines)?;
            }
            EntryKind::Dataset => {
                let spec = source
                    .dataset_spec(&node_path)
                    .context("read dataset", &node_path)?;
                lines.push(format!("{indent}{} {:?} {:?}", entry.name, spec.dtype, spec.shape));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFile;

    #[test]
    fn test_outline_shows_classes_shapes_and_links() {
        let mut file = MemoryFile::new();
        file.add_group("/entry", "NXentry").unwrap();
        file.add_group("/entry/bank1", "NXdata").unwrap();
        file.add_dataset("/entry/bank1/data", &[2, 2], ArrayData::F64(vec![0.0; 4]))
            .unwrap();
        file.add_group("/entry/misc", "").unwrap();
        file.add_link("/entry/bank1/data", "/entry/misc/data").unwrap();

        assert_eq!(
            outline(&file).unwrap(),
            vec![
                "entry/ (NXentry)",
                "  bank1/ (NXdata)",
                "    data F64 [2, 2]",
                "  misc/",
                "    data -> /entry/bank1/data",
            ]
        );
    }
}
