//! HDF5 container backend.
//!
//! NeXus files are HDF5 files whose groups carry an `NX_class` attribute.
//! Element types are mapped through HDF5 type descriptors; fixed-length
//! strings go through in-memory buffers of the next supported capacity,
//! which HDF5 pads or truncates to the stored length.

use crate::container::{Entry, NexusSink, NexusSource, NX_CLASS, TARGET};
use crate::error::Context;
use crate::{Error, Result};
use hdf5::types::{
    FixedAscii, FixedUnicode, FloatSize, H5Type, IntSize, TypeDescriptor, VarLenAscii,
    VarLenUnicode,
};
use hdf5::{Container, Dataset, Extents, File, Location, LocationType};
use ndarray::{s, ArrayView1, ArrayView3};
use savenexus_core::path::{self, ROOT};
use savenexus_core::{ArrayData, Attribute, DatasetSpec, ElementType, ObjectKind};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

/// Longest first-axis chunk used for compressed rank-1 datasets.
const MAX_CHUNK_LEN: usize = 1 << 16;

/// Read side of an HDF5 file.
pub struct Hdf5Source {
    file: File,
}

impl Hdf5Source {
    /// Open an existing file read-only.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened as HDF5.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).context("open file", &path.display().to_string())?;
        Ok(Self { file })
    }
}

impl NexusSource for Hdf5Source {
    fn entries(&self, group_path: &str) -> Result<Vec<Entry>> {
        let group = self.file.group(group_path)?;
        let mut entries = Vec::new();
        for name in group.member_names()? {
            match group.loc_type_by_name(&name)? {
                LocationType::Group => {
                    let child = group.group(&name)?;
                    let class = string_attribute(&child, NX_CLASS)?.unwrap_or_default();
                    entries.push(Entry::group(&name, &class));
                }
                LocationType::Dataset => entries.push(Entry::dataset(&name)),
                // Committed datatypes carry no data.
                _ => {}
            }
        }
        Ok(entries)
    }

    fn canonical_path(&self, node_path: &str) -> Result<String> {
        let target = with_location(&self.file, node_path, |loc| string_attribute(loc, TARGET))?;
        Ok(target.map_or_else(|| path::normalize(node_path), |target| path::normalize(&target)))
    }

    fn attributes(&self, node_path: &str) -> Result<Vec<Attribute>> {
        with_location(&self.file, node_path, |loc| {
            loc.attr_names()?
                .iter()
                .map(|name| read_attribute(loc, name))
                .collect()
        })
    }

    fn dataset_spec(&self, node_path: &str) -> Result<DatasetSpec> {
        let dataset = self.file.dataset(node_path)?;
        Ok(DatasetSpec::new(element_type_of(&dataset, node_path)?, dataset.shape()))
    }

    fn read_dataset(&self, node_path: &str) -> Result<ArrayData> {
        let dataset = self.file.dataset(node_path)?;
        let dtype = element_type_of(&dataset, node_path)?;
        read_payload(&dataset, dtype)
    }
}

/// Write side of an HDF5 file.
pub struct Hdf5Sink {
    file: File,
}

impl Hdf5Sink {
    /// Create a new file, truncating any existing one.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).context("create file", &path.display().to_string())?;
        Ok(Self { file })
    }

    fn dataset_in_parent(&self, node_path: &str, spec: &DatasetSpec) -> Result<Dataset> {
        let parent = self.file.group(&path::parent(node_path))?;
        let name = path::leaf(node_path);
        if parent.link_exists(name) {
            return Err(Error::AlreadyExists(node_path.to_string()));
        }
        let builder = parent
            .new_dataset_builder()
            .empty_as(&descriptor(spec.dtype))
            .shape(extents(&spec.shape));
        let builder = match (spec.compression, chunk_shape(spec).as_deref()) {
            (Some(level), Some(&[a])) => builder.chunk([a]).deflate(level),
            (Some(level), Some(&[a, b])) => builder.chunk([a, b]).deflate(level),
            (Some(level), Some(&[a, b, c])) => builder.chunk([a, b, c]).deflate(level),
            (Some(level), Some(&[a, b, c, d])) => builder.chunk([a, b, c, d]).deflate(level),
            _ => builder,
        };
        Ok(builder.create(name)?)
    }
}

impl NexusSink for Hdf5Sink {
    fn create_group(&mut self, node_path: &str) -> Result<()> {
        let parent = self.file.group(&path::parent(node_path))?;
        let name = path::leaf(node_path);
        if name.is_empty() || parent.link_exists(name) {
            return Err(Error::AlreadyExists(node_path.to_string()));
        }
        parent.create_group(name)?;
        Ok(())
    }

    fn write_attribute(&mut self, node_path: &str, attribute: &Attribute) -> Result<()> {
        with_location(&self.file, node_path, |loc| {
            if loc.attr_names()?.contains(&attribute.name) {
                return Err(Error::AlreadyExists(format!(
                    "{node_path}@{}",
                    attribute.name
                )));
            }
            let attr = loc
                .new_attr_builder()
                .empty_as(&descriptor(attribute.dtype))
                .shape(extents(&attribute.shape))
                .create(attribute.name.as_str())?;
            write_payload(&attr, attribute.dtype, &attribute.value)
        })
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
        let dataset = self.dataset_in_parent(node_path, spec)?;
        if data.is_empty() {
            return Ok(());
        }
        write_payload(&dataset, spec.dtype, data)
    }

    fn create_dataset(&mut self, node_path: &str, spec: &DatasetSpec) -> Result<()> {
        self.dataset_in_parent(node_path, spec)?;
        Ok(())
    }

    fn write_slab(&mut self, node_path: &str, x_start: usize, data: &[f32]) -> Result<()> {
        let dataset = self.file.dataset(node_path)?;
        let shape = dataset.shape();
        let &[_, y, t] = shape.as_slice() else {
            return Err(Error::InvalidFormat(format!(
                "{node_path}: slab writes need a rank-3 dataset, found {shape:?}"
            )));
        };
        let plane = y * t;
        if plane == 0 || data.is_empty() {
            return Ok(());
        }
        if data.len() % plane != 0 {
            return Err(Error::InvalidFormat(format!(
                "{node_path}: {} values do not form whole ({y}, {t}) planes",
                data.len()
            )));
        }
        let rows = data.len() / plane;
        let view = ArrayView3::from_shape((rows, y, t), data)
            .map_err(|e| Error::InvalidFormat(format!("{node_path}: {e}")))?;
        dataset.write_slice(view, s![x_start..x_start + rows, .., ..])?;
        Ok(())
    }

    fn object_kind(&self, node_path: &str) -> Result<Option<ObjectKind>> {
        if path::normalize(node_path) == ROOT {
            return Ok(Some(ObjectKind::Group));
        }
        if !self.file.link_exists(node_path) {
            return Ok(None);
        }
        Ok(match self.file.loc_type_by_name(node_path)? {
            LocationType::Group => Some(ObjectKind::Group),
            LocationType::Dataset => Some(ObjectKind::Dataset),
            _ => None,
        })
    }

    fn create_link(&mut self, target: &str, parent: &str, name: &str) -> Result<()> {
        let group = self.file.group(parent)?;
        if group.link_exists(name) {
            return Err(Error::AlreadyExists(path::join(parent, name)));
        }
        group.link_hard(target, name)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

fn with_location<T>(
    file: &File,
    node_path: &str,
    f: impl FnOnce(&Location) -> Result<T>,
) -> Result<T> {
    match file.loc_type_by_name(node_path)? {
        LocationType::Group => {
            let group = file.group(node_path)?;
            f(&*group)
        }
        LocationType::Dataset => {
            let dataset = file.dataset(node_path)?;
            f(&**dataset)
        }
        other => Err(Error::InvalidFormat(format!(
            "{node_path} is a {other:?}, not a group or dataset"
        ))),
    }
}

fn string_attribute(loc: &Location, name: &str) -> Result<Option<String>> {
    if !loc.attr_names()?.iter().any(|n| n == name) {
        return Ok(None);
    }
    Ok(read_attribute(loc, name)?
        .as_str()
        .map(str::to_string))
}

fn read_attribute(loc: &Location, name: &str) -> Result<Attribute> {
    let attr = loc.attr(name)?;
    let descriptor = attr.dtype()?.to_descriptor()?;
    let dtype = element_type(&descriptor).ok_or_else(|| {
        Error::InvalidFormat(format!("attribute {name} has unsupported type {descriptor:?}"))
    })?;
    Ok(Attribute {
        name: name.to_string(),
        dtype,
        shape: attr.shape(),
        value: read_payload(&attr, dtype)?,
    })
}

fn element_type_of(dataset: &Dataset, node_path: &str) -> Result<ElementType> {
    let descriptor = dataset.dtype()?.to_descriptor()?;
    element_type(&descriptor).ok_or_else(|| {
        Error::InvalidFormat(format!("{node_path} has unsupported type {descriptor:?}"))
    })
}

fn element_type(descriptor: &TypeDescriptor) -> Option<ElementType> {
    Some(match descriptor {
        TypeDescriptor::Integer(IntSize::U1) => ElementType::I8,
        TypeDescriptor::Integer(IntSize::U2) => ElementType::I16,
        TypeDescriptor::Integer(IntSize::U4) => ElementType::I32,
        TypeDescriptor::Integer(IntSize::U8) => ElementType::I64,
        TypeDescriptor::Unsigned(IntSize::U1) => ElementType::U8,
        TypeDescriptor::Unsigned(IntSize::U2) => ElementType::U16,
        TypeDescriptor::Unsigned(IntSize::U4) => ElementType::U32,
        TypeDescriptor::Unsigned(IntSize::U8) => ElementType::U64,
        TypeDescriptor::Float(FloatSize::U4) => ElementType::F32,
        TypeDescriptor::Float(FloatSize::U8) => ElementType::F64,
        TypeDescriptor::FixedAscii(len) => ElementType::FixedAscii(*len),
        TypeDescriptor::FixedUnicode(len) => ElementType::FixedUnicode(*len),
        TypeDescriptor::VarLenAscii => ElementType::VarAscii,
        TypeDescriptor::VarLenUnicode => ElementType::VarUnicode,
        _ => return None,
    })
}

fn descriptor(dtype: ElementType) -> TypeDescriptor {
    match dtype {
        ElementType::I8 => TypeDescriptor::Integer(IntSize::U1),
        ElementType::I16 => TypeDescriptor::Integer(IntSize::U2),
        ElementType::I32 => TypeDescriptor::Integer(IntSize::U4),
        ElementType::I64 => TypeDescriptor::Integer(IntSize::U8),
        ElementType::U8 => TypeDescriptor::Unsigned(IntSize::U1),
        ElementType::U16 => TypeDescriptor::Unsigned(IntSize::U2),
        ElementType::U32 => TypeDescriptor::Unsigned(IntSize::U4),
        ElementType::U64 => TypeDescriptor::Unsigned(IntSize::U8),
        ElementType::F32 => TypeDescriptor::Float(FloatSize::U4),
        ElementType::F64 => TypeDescriptor::Float(FloatSize::U8),
        ElementType::FixedAscii(len) => TypeDescriptor::FixedAscii(len.max(1)),
        ElementType::FixedUnicode(len) => TypeDescriptor::FixedUnicode(len.max(1)),
        ElementType::VarAscii => TypeDescriptor::VarLenAscii,
        ElementType::VarUnicode => TypeDescriptor::VarLenUnicode,
    }
}

fn extents(shape: &[usize]) -> Extents {
    if shape.is_empty() {
        Extents::Scalar
    } else {
        Extents::from(shape.to_vec())
    }
}

/// Chunk layout for a compressed dataset: one first-axis row at a time.
///
/// Datasets above rank four are stored uncompressed.
fn chunk_shape(spec: &DatasetSpec) -> Option<Vec<usize>> {
    if spec.shape.is_empty() || spec.dtype.is_string() || spec.is_empty() {
        return None;
    }
    let mut chunk = spec.shape.clone();
    if chunk.len() == 1 {
        chunk[0] = chunk[0].min(MAX_CHUNK_LEN);
    } else {
        chunk[0] = 1;
    }
    Some(chunk)
}

/// Dispatch a generic string routine on the smallest fixed-length buffer
/// holding `$len` bytes.
macro_rules! with_fixed_capacity {
    ($len:expr, $ty:ident, $f:ident($($arg:expr),*)) => {
        match $len {
            0..=16 => $f::<$ty<16>>($($arg),*),
            17..=64 => $f::<$ty<64>>($($arg),*),
            65..=256 => $f::<$ty<256>>($($arg),*),
            257..=1024 => $f::<$ty<1024>>($($arg),*),
            1025..=4096 => $f::<$ty<4096>>($($arg),*),
            4097..=16384 => $f::<$ty<16384>>($($arg),*),
            len => Err(Error::InvalidFormat(format!(
                "fixed-length strings of {len} bytes are not supported"
            ))),
        }
    };
}

fn read_payload(container: &Container, dtype: ElementType) -> Result<ArrayData> {
    Ok(match dtype {
        ElementType::I8 => ArrayData::I8(container.read_raw()?),
        ElementType::U8 => ArrayData::U8(container.read_raw()?),
        ElementType::I16 => ArrayData::I16(container.read_raw()?),
        ElementType::U16 => ArrayData::U16(container.read_raw()?),
        ElementType::I32 => ArrayData::I32(container.read_raw()?),
        ElementType::U32 => ArrayData::U32(container.read_raw()?),
        ElementType::I64 => ArrayData::I64(container.read_raw()?),
        ElementType::U64 => ArrayData::U64(container.read_raw()?),
        ElementType::F32 => ArrayData::F32(container.read_raw()?),
        ElementType::F64 => ArrayData::F64(container.read_raw()?),
        ElementType::FixedAscii(len) => {
            ArrayData::Str(with_fixed_capacity!(len, FixedAscii, read_strings(container))?)
        }
        ElementType::FixedUnicode(len) => {
            ArrayData::Str(with_fixed_capacity!(len, FixedUnicode, read_strings(container))?)
        }
        ElementType::VarAscii => ArrayData::Str(read_strings::<VarLenAscii>(container)?),
        ElementType::VarUnicode => ArrayData::Str(read_strings::<VarLenUnicode>(container)?),
    })
}

fn write_payload(container: &Container, dtype: ElementType, data: &ArrayData) -> Result<()> {
    match (data, dtype) {
        (ArrayData::I8(v), _) => write_values(container, v),
        (ArrayData::U8(v), _) => write_values(container, v),
        (ArrayData::I16(v), _) => write_values(container, v),
        (ArrayData::U16(v), _) => write_values(container, v),
        (ArrayData::I32(v), _) => write_values(container, v),
        (ArrayData::U32(v), _) => write_values(container, v),
        (ArrayData::I64(v), _) => write_values(container, v),
        (ArrayData::U64(v), _) => write_values(container, v),
        (ArrayData::F32(v), _) => write_values(container, v),
        (ArrayData::F64(v), _) => write_values(container, v),
        (ArrayData::Str(v), ElementType::FixedAscii(len)) => {
            with_fixed_capacity!(len, FixedAscii, write_strings(container, v))
        }
        (ArrayData::Str(v), ElementType::FixedUnicode(len)) => {
            with_fixed_capacity!(len, FixedUnicode, write_strings(container, v))
        }
        (ArrayData::Str(v), ElementType::VarAscii) => write_strings::<VarLenAscii>(container, v),
        (ArrayData::Str(v), _) => write_strings::<VarLenUnicode>(container, v),
    }
}

fn write_values<T: H5Type>(container: &Container, values: &[T]) -> Result<()> {
    container.write_raw(ArrayView1::from(values))?;
    Ok(())
}

fn read_strings<T: H5Type + Display>(container: &Container) -> Result<Vec<String>> {
    Ok(container
        .read_raw::<T>()?
        .iter()
        .map(ToString::to_string)
        .collect())
}

fn write_strings<T: FromText>(container: &Container, values: &[String]) -> Result<()> {
    let values = values
        .iter()
        .map(|value| T::from_text(value))
        .collect::<Result<Vec<T>>>()?;
    write_values(container, &values)
}

/// String element types that can be built from Rust text.
trait FromText: H5Type + Sized {
    fn from_text(value: &str) -> Result<Self>;
}

fn invalid_string(value: &str, err: impl Display) -> Error {
    Error::InvalidFormat(format!("cannot store {value:?} as an HDF5 string: {err}"))
}

impl<const N: usize> FromText for FixedAscii<N> {
    fn from_text(value: &str) -> Result<Self> {
        Self::from_ascii(value).map_err(|e| invalid_string(value, e))
    }
}

impl<const N: usize> FromText for FixedUnicode<N> {
    fn from_text(value: &str) -> Result<Self> {
        Self::from_str(value).map_err(|e| invalid_string(value, e))
    }
}

impl FromText for VarLenAscii {
    fn from_text(value: &str) -> Result<Self> {
        Self::from_ascii(value).map_err(|e| invalid_string(value, e))
    }
}

impl FromText for VarLenUnicode {
    fn from_text(value: &str) -> Result<Self> {
        Self::from_str(value).map_err(|e| invalid_string(value, e))
    }
}
