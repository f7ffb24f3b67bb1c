//! Node, attribute and payload types shared by every container backend.
//!
//! A NeXus-style container is a tree of named groups and datasets. Both
//! carry attributes; datasets additionally carry an element type, a shape
//! and a payload. These types describe one node at a time: backends read
//! them lazily while the tree is walked.

use std::fmt;

/// Element type of a dataset or attribute payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Fixed-length ASCII string of the given byte length.
    FixedAscii(usize),
    /// Fixed-length UTF-8 string of the given byte length.
    FixedUnicode(usize),
    /// Variable-length ASCII string.
    VarAscii,
    /// Variable-length UTF-8 string.
    VarUnicode,
}

impl ElementType {
    /// Size in bytes of one element as stored in a buffer.
    ///
    /// Variable-length strings report the size of a pointer.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::FixedAscii(len) | Self::FixedUnicode(len) => len,
            Self::VarAscii | Self::VarUnicode => std::mem::size_of::<usize>(),
        }
    }

    /// Returns true for the string element types.
    #[must_use]
    pub fn is_string(self) -> bool {
        matches!(
            self,
            Self::FixedAscii(_) | Self::FixedUnicode(_) | Self::VarAscii | Self::VarUnicode
        )
    }
}

/// Kind of an object in a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Group,
    Dataset,
}

/// A flat payload in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

impl ArrayData {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    /// Returns true when the payload holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true when the payload variant can hold elements of `dtype`.
    #[must_use]
    pub fn matches(&self, dtype: ElementType) -> bool {
        matches!(
            (self, dtype),
            (Self::I8(_), ElementType::I8)
                | (Self::U8(_), ElementType::U8)
                | (Self::I16(_), ElementType::I16)
                | (Self::U16(_), ElementType::U16)
                | (Self::I32(_), ElementType::I32)
                | (Self::U32(_), ElementType::U32)
                | (Self::I64(_), ElementType::I64)
                | (Self::U64(_), ElementType::U64)
                | (Self::F32(_), ElementType::F32)
                | (Self::F64(_), ElementType::F64)
        ) || (matches!(self, Self::Str(_)) && dtype.is_string())
    }
}

/// Number of elements described by a shape. A rank-0 shape is a scalar.
#[must_use]
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Element type, shape and storage options of a dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetSpec {
    pub dtype: ElementType,
    pub shape: Vec<usize>,
    /// Deflate level, if the dataset is stored compressed.
    pub compression: Option<u8>,
}

impl DatasetSpec {
    #[must_use]
    pub fn new(dtype: ElementType, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            compression: None,
        }
    }

    /// Set the deflate level.
    #[must_use]
    pub fn with_compression(mut self, compression: Option<u8>) -> Self {
        self.compression = compression;
        self
    }

    /// Number of elements in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    /// Returns true when the payload has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the payload in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.len().saturating_mul(self.dtype.size())
    }
}

/// A named attribute attached to a group or dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub dtype: ElementType,
    /// Empty for scalar attributes.
    pub shape: Vec<usize>,
    pub value: ArrayData,
}

impl Attribute {
    /// A scalar fixed-length ASCII string attribute, the form NeXus writers use.
    #[must_use]
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            dtype: ElementType::FixedAscii(value.len().max(1)),
            shape: Vec::new(),
            value: ArrayData::Str(vec![value.to_string()]),
        }
    }

    /// A scalar `i32` attribute.
    #[must_use]
    pub fn int(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            dtype: ElementType::I32,
            shape: Vec::new(),
            value: ArrayData::I32(vec![value]),
        }
    }

    /// Returns the first string element, if this is a string attribute.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ArrayData::Str(values) => values.first().map(String::as_str),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ArrayData::Str(values) if values.len() == 1 => {
                write!(f, "{} = \"{}\" ({:?})", self.name, values[0], self.dtype)
            }
            value => write!(f, "{} = {:?} {:?}", self.name, value, self.shape),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_attribute_uses_fixed_ascii() {
        let attr = Attribute::string("units", "microsecond");
        assert_eq!(attr.dtype, ElementType::FixedAscii(11));
        assert_eq!(attr.as_str(), Some("microsecond"));
        assert!(attr.shape.is_empty());
    }

    #[test]
    fn test_empty_string_attribute_has_nonzero_length() {
        let attr = Attribute::string("note", "");
        assert_eq!(attr.dtype, ElementType::FixedAscii(1));
    }

    #[test]
    fn test_dataset_spec_sizes() {
        let spec = DatasetSpec::new(ElementType::F32, vec![8, 4, 100]);
        assert_eq!(spec.len(), 3200);
        assert_eq!(spec.byte_size(), 12_800);

        let scalar = DatasetSpec::new(ElementType::I64, Vec::new());
        assert_eq!(scalar.len(), 1);
    }

    #[test]
    fn test_array_data_matches_dtype() {
        assert!(ArrayData::F32(vec![1.0]).matches(ElementType::F32));
        assert!(!ArrayData::F32(vec![1.0]).matches(ElementType::F64));
        assert!(ArrayData::Str(vec![String::new()]).matches(ElementType::VarUnicode));
        assert!(ArrayData::Str(vec![String::new()]).matches(ElementType::FixedAscii(4)));
    }
}
