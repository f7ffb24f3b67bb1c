//! In-memory container backend.
//!
//! Nodes live in an arena and groups map child names to arena indices, so
//! one node can be reachable from several paths exactly like an HDF5 hard
//! link. Used for dry runs and as the fixture of the engine tests.

use crate::container::{Entry, NexusSink, NexusSource, NX_CLASS, TARGET};
use crate::{Error, Result};
use savenexus_core::path::{self, ROOT};
use savenexus_core::{ArrayData, Attribute, DatasetSpec, ElementType, ObjectKind};
use std::collections::{BTreeMap, HashMap};

type NodeId = usize;

#[derive(Clone, Debug, PartialEq)]
enum NodeKind {
    Group(BTreeMap<String, NodeId>),
    Dataset { spec: DatasetSpec, data: ArrayData },
}

#[derive(Clone, Debug, PartialEq)]
struct Node {
    kind: NodeKind,
    attributes: Vec<Attribute>,
}

impl Node {
    fn group() -> Self {
        Self {
            kind: NodeKind::Group(BTreeMap::new()),
            attributes: Vec::new(),
        }
    }

    fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A container held entirely in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryFile {
    nodes: Vec<Node>,
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self {
            nodes: vec![Node::group()],
        }
    }
}

impl MemoryFile {
    /// Create a container holding only the root group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group carrying an `NX_class` attribute.
    ///
    /// # Errors
    /// Returns an error if the parent is missing or the path is taken.
    pub fn add_group(&mut self, path: &str, class: &str) -> Result<()> {
        self.create_group(path)?;
        if !class.is_empty() {
            self.write_attribute(path, &Attribute::string(NX_CLASS, class))?;
        }
        Ok(())
    }

    /// Create a dataset, inferring its element type from the payload.
    ///
    /// String payloads are stored as variable-length UTF-8.
    ///
    /// # Errors
    /// Returns an error if the payload does not match `shape` or the path is taken.
    pub fn add_dataset(&mut self, path: &str, shape: &[usize], data: ArrayData) -> Result<()> {
        let spec = DatasetSpec::new(natural_type(&data), shape.to_vec());
        self.write_dataset(path, &spec, &data)
    }

    /// Set an attribute, replacing any attribute of the same name.
    ///
    /// # Errors
    /// Returns an error if no node exists at `path`.
    pub fn set_attribute(&mut self, path: &str, attribute: Attribute) -> Result<()> {
        let id = self.resolve(path)?;
        let node = &mut self.nodes[id];
        node.attributes.retain(|a| a.name != attribute.name);
        node.attributes.push(attribute);
        Ok(())
    }

    /// Make `target` reachable at `link_path` as well.
    ///
    /// Like a NeXus writer, this stamps the target with a `target` attribute
    /// naming its canonical path unless it already has one.
    ///
    /// # Errors
    /// Returns an error if the target is missing or `link_path` is taken.
    pub fn add_link(&mut self, target: &str, link_path: &str) -> Result<()> {
        let target = path::normalize(target);
        let id = self.resolve(&target)?;
        if self.nodes[id].attribute(TARGET).is_none() {
            self.nodes[id]
                .attributes
                .push(Attribute::string(TARGET, &target));
        }
        self.create_link(&target, &path::parent(link_path), path::leaf(link_path))
    }

    /// Arena identity of the node at `path`; equal for paths linked together.
    #[must_use]
    pub fn object_id(&self, path: &str) -> Option<usize> {
        self.lookup(path)
    }

    /// Spec and payload of the dataset at `path`.
    #[must_use]
    pub fn dataset(&self, path: &str) -> Option<(&DatasetSpec, &ArrayData)> {
        match &self.nodes[self.lookup(path)?].kind {
            NodeKind::Dataset { spec, data } => Some((spec, data)),
            NodeKind::Group(_) => None,
        }
    }

    /// Attribute `name` of the node at `path`.
    #[must_use]
    pub fn attribute(&self, path: &str, name: &str) -> Option<&Attribute> {
        self.nodes[self.lookup(path)?].attribute(name)
    }

    /// Deterministic description of the tree, one line per node and attribute.
    ///
    /// Nodes are listed depth-first in name order. A node reached a second
    /// time is listed as `path -> first_path` and not descended into.
    #[must_use]
    pub fn listing(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut seen = HashMap::new();
        seen.insert(0, ROOT.to_string());
        self.list_node(0, ROOT, &mut seen, &mut lines);
        lines
    }

    fn list_node(
        &self,
        id: NodeId,
        node_path: &str,
        seen: &mut HashMap<NodeId, String>,
        lines: &mut Vec<String>,
    ) {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Group(_) => lines.push(format!("{node_path} group")),
            NodeKind::Dataset { spec, data } => lines.push(format!(
                "{node_path} dataset {:?} {:?} compression={:?} {data:?}",
                spec.dtype, spec.shape, spec.compression
            )),
        }

        let mut attributes: Vec<&Attribute> = node.attributes.iter().collect();
        attributes.sort_by(|a, b| a.name.cmp(&b.name));
        for attribute in attributes {
            lines.push(format!("{node_path} @{attribute}"));
        }

        if let NodeKind::Group(children) = &node.kind {
            for (name, &child) in children {
                let child_path = path::join(node_path, name);
                if let Some(first) = seen.get(&child) {
                    lines.push(format!("{child_path} -> {first}"));
                    continue;
                }
                seen.insert(child, child_path.clone());
                self.list_node(child, &child_path, seen, lines);
            }
        }
    }

    fn lookup(&self, node_path: &str) -> Option<NodeId> {
        let mut id = 0;
        for segment in path::segments(node_path) {
            match &self.nodes[id].kind {
                NodeKind::Group(children) => id = *children.get(segment)?,
                NodeKind::Dataset { .. } => return None,
            }
        }
        Some(id)
    }

    fn resolve(&self, node_path: &str) -> Result<NodeId> {
        self.lookup(node_path)
            .ok_or_else(|| Error::NotFound(node_path.to_string()))
    }

    fn children_mut(&mut self, group_path: &str) -> Result<&mut BTreeMap<String, NodeId>> {
        let id = self.resolve(group_path)?;
        match &mut self.nodes[id].kind {
            NodeKind::Group(children) => Ok(children),
            NodeKind::Dataset { .. } => Err(Error::InvalidFormat(format!(
                "{group_path} is a dataset, not a group"
            ))),
        }
    }

    fn attach(&mut self, parent: &str, name: &str, id: NodeId) -> Result<()> {
        if name.is_empty() {
            return Err(Error::AlreadyExists(ROOT.to_string()));
        }
        let children = self.children_mut(parent)?;
        if children.contains_key(name) {
            return Err(Error::AlreadyExists(path::join(parent, name)));
        }
        children.insert(name.to_string(), id);
        Ok(())
    }

    fn insert(&mut self, node_path: &str, node: Node) -> Result<()> {
        let id = self.nodes.len();
        self.attach(&path::parent(node_path), path::leaf(node_path), id)?;
        self.nodes.push(node);
        Ok(())
    }
}

impl NexusSource for MemoryFile {
    fn entries(&self, group_path: &str) -> Result<Vec<Entry>> {
        let id = self.resolve(group_path)?;
        let NodeKind::Group(children) = &self.nodes[id].kind else {
            return Err(Error::InvalidFormat(format!(
                "{group_path} is a dataset, not a group"
            )));
        };
        Ok(children
            .iter()
            .map(|(name, &child)| {
                let child = &self.nodes[child];
                match child.kind {
                    NodeKind::Group(_) => {
                        let class = child
                            .attribute(NX_CLASS)
                            .and_then(Attribute::as_str)
                            .unwrap_or("");
                        Entry::group(name, class)
                    }
                    NodeKind::Dataset { .. } => Entry::dataset(name),
                }
            })
            .collect())
    }

    fn canonical_path(&self, node_path: &str) -> Result<String> {
        let id = self.resolve(node_path)?;
        Ok(self.nodes[id]
            .attribute(TARGET)
            .and_then(Attribute::as_str)
            .map_or_else(|| path::normalize(node_path), path::normalize))
    }

    fn attributes(&self, node_path: &str) -> Result<Vec<Attribute>> {
        Ok(self.nodes[self.resolve(node_path)?].attributes.clone())
    }

    fn dataset_spec(&self, node_path: &str) -> Result<DatasetSpec> {
        self.dataset(node_path)
            .map(|(spec, _)| spec.clone())
            .ok_or_else(|| Error::NotFound(node_path.to_string()))
    }

    fn read_dataset(&self, node_path: &str) -> Result<ArrayData> {
        self.dataset(node_path)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| Error::NotFound(node_path.to_string()))
    }
}

impl NexusSink for MemoryFile {
    fn create_group(&mut self, node_path: &str) -> Result<()> {
        self.insert(node_path, Node::group())
    }

    fn write_attribute(&mut self, node_path: &str, attribute: &Attribute) -> Result<()> {
        let id = self.resolve(node_path)?;
        let node = &mut self.nodes[id];
        if node.attribute(&attribute.name).is_some() {
            return Err(Error::AlreadyExists(format!(
                "{node_path}@{}",
                attribute.name
            )));
        }
        node.attributes.push(attribute.clone());
        Ok(())
    }

    fn write_dataset(&mut self, node_path: &str, spec: &DatasetSpec, data: &ArrayData) -> Result<()> {
        if !data.matches(spec.dtype) || data.len() != spec.len() {
            return Err(Error::InvalidFormat(format!(
                "{node_path}: payload of {} elements does not match {:?} {:?}",
                data.len(),
                spec.dtype,
                spec.shape
            )));
        }
        self.insert(
            node_path,
            Node {
                kind: NodeKind::Dataset {
                    spec: spec.clone(),
                    data: data.clone(),
                },
                attributes: Vec::new(),
            },
        )
    }

    fn create_dataset(&mut self, node_path: &str, spec: &DatasetSpec) -> Result<()> {
        let data = zeros(spec.dtype, spec.len());
        self.write_dataset(node_path, spec, &data)
    }

    fn write_slab(&mut self, node_path: &str, x_start: usize, values: &[f32]) -> Result<()> {
        let id = self.resolve(node_path)?;
        let NodeKind::Dataset {
            spec,
            data: ArrayData::F32(payload),
        } = &mut self.nodes[id].kind
        else {
            return Err(Error::InvalidFormat(format!(
                "{node_path} is not a float32 dataset"
            )));
        };
        if spec.shape.len() != 3 {
            return Err(Error::InvalidFormat(format!(
                "{node_path}: slab writes need a rank-3 dataset, found {:?}",
                spec.shape
            )));
        }
        let plane = spec.shape[1] * spec.shape[2];
        let start = x_start * plane;
        let end = start + values.len();
        if (plane == 0 && !values.is_empty())
            || (plane != 0 && values.len() % plane != 0)
            || end > payload.len()
        {
            return Err(Error::InvalidFormat(format!(
                "{node_path}: slab of {} values at x={x_start} does not fit {:?}",
                values.len(),
                spec.shape
            )));
        }
        payload[start..end].copy_from_slice(values);
        Ok(())
    }

    fn object_kind(&self, node_path: &str) -> Result<Option<ObjectKind>> {
        Ok(self.lookup(node_path).map(|id| match self.nodes[id].kind {
            NodeKind::Group(_) => ObjectKind::Group,
            NodeKind::Dataset { .. } => ObjectKind::Dataset,
        }))
    }

    fn create_link(&mut self, target: &str, parent: &str, name: &str) -> Result<()> {
        let id = self.resolve(target)?;
        self.attach(parent, name, id)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn natural_type(data: &ArrayData) -> ElementType {
    match data {
        ArrayData::I8(_) => ElementType::I8,
        ArrayData::U8(_) => ElementType::U8,
        ArrayData::I16(_) => ElementType::I16,
        ArrayData::U16(_) => ElementType::U16,
        ArrayData::I32(_) => ElementType::I32,
        ArrayData::U32(_) => ElementType::U32,
        ArrayData::I64(_) => ElementType::I64,
        ArrayData::U64(_) => ElementType::U64,
        ArrayData::F32(_) => ElementType::F32,
        ArrayData::F64(_) => ElementType::F64,
        ArrayData::Str(_) => ElementType::VarUnicode,
    }
}

fn zeros(dtype: ElementType, len: usize) -> ArrayData {
    match dtype {
        ElementType::I8 => ArrayData::I8(vec![0; len]),
        ElementType::U8 => ArrayData::U8(vec![0; len]),
        ElementType::I16 => ArrayData::I16(vec![0; len]),
        ElementType::U16 => ArrayData::U16(vec![0; len]),
        ElementType::I32 => ArrayData::I32(vec![0; len]),
        ElementType::U32 => ArrayData::U32(vec![0; len]),
        ElementType::I64 => ArrayData::I64(vec![0; len]),
        ElementType::U64 => ArrayData::U64(vec![0; len]),
        ElementType::F32 => ArrayData::F32(vec![0.0; len]),
        ElementType::F64 => ArrayData::F64(vec![0.0; len]),
        ElementType::FixedAscii(_)
        | ElementType::FixedUnicode(_)
        | ElementType::VarAscii
        | ElementType::VarUnicode => ArrayData::Str(vec![String::new(); len]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryFile {
        let mut file = MemoryFile::new();
        file.add_group("/entry", "NXentry").unwrap();
        file.add_group("/entry/bank1", "NXdata").unwrap();
        file.add_dataset("/entry/bank1/data", &[2, 2, 1], ArrayData::U32(vec![1, 2, 3, 4]))
            .unwrap();
        file
    }

    #[test]
    fn test_entries_report_class() {
        let file = sample();
        let entries = file.entries("/entry").unwrap();
        assert_eq!(entries, vec![Entry::group("bank1", "NXdata")]);
        let entries = file.entries("/entry/bank1").unwrap();
        assert_eq!(entries, vec![Entry::dataset("data")]);
    }

    #[test]
    fn test_duplicate_nodes_and_attributes_are_rejected() {
        let mut file = sample();
        assert!(matches!(
            file.create_group("/entry"),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            file.write_attribute("/entry", &Attribute::string(NX_CLASS, "NXentry")),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            file.create_group("/missing/child"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_links_share_identity_and_canonical_path() {
        let mut file = sample();
        file.add_group("/entry/instrument", "NXinstrument").unwrap();
        file.add_link("/entry/bank1/data", "/entry/instrument/data")
            .unwrap();

        assert_eq!(
            file.object_id("/entry/bank1/data"),
            file.object_id("/entry/instrument/data")
        );
        assert_eq!(
            file.canonical_path("/entry/instrument/data").unwrap(),
            "/entry/bank1/data"
        );
        assert_eq!(
            file.canonical_path("/entry/bank1/data").unwrap(),
            "/entry/bank1/data"
        );
        assert!(file
            .listing()
            .contains(&"/entry/instrument/data -> /entry/bank1/data".to_string()));
    }

    #[test]
    fn test_write_slab_bounds() {
        let mut file = MemoryFile::new();
        let spec = DatasetSpec::new(ElementType::F32, vec![4, 2, 3]);
        file.create_dataset("/data", &spec).unwrap();
        file.write_slab("/data", 2, &[1.0; 12]).unwrap();
        let (_, data) = file.dataset("/data").unwrap();
        let ArrayData::F32(values) = data else {
            panic!("expected f32 payload");
        };
        assert_eq!(values[..12], [0.0; 12]);
        assert_eq!(values[12..], [1.0; 12]);

        assert!(file.write_slab("/data", 3, &[1.0; 12]).is_err());
        assert!(file.write_slab("/data", 0, &[1.0; 5]).is_err());
    }

    #[test]
    fn test_payload_must_match_spec() {
        let mut file = MemoryFile::new();
        let spec = DatasetSpec::new(ElementType::F64, vec![3]);
        assert!(file
            .write_dataset("/x", &spec, &ArrayData::F64(vec![1.0]))
            .is_err());
        assert!(file
            .write_dataset("/x", &spec, &ArrayData::F32(vec![1.0; 3]))
            .is_err());
    }
}
