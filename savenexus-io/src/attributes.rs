//! Attribute copying between nodes.

use crate::container::{NexusSink, NexusSource};
use crate::error::Context;
use crate::Result;

/// File-format metadata that is never copied; it describes the source file,
/// not the data.
pub const DENYLIST: [&str; 6] = [
    "NeXus_version",
    "XML_version",
    "HDF_version",
    "HDF5_Version",
    "file_name",
    "file_time",
];

/// Returns true if an attribute of this name is dropped on copy.
#[must_use]
pub fn is_denied(name: &str) -> bool {
    DENYLIST.contains(&name)
}

/// Copy every attribute of `from` onto `to`, except the denylisted names and
/// any name listed in `skip`.
///
/// Type, shape and value are preserved. Returns the number of attributes copied.
///
/// # Errors
/// Returns an error naming the failing path if an attribute cannot be read or written.
pub fn copy_attributes<S, D>(
    source: &S,
    from: &str,
    dest: &mut D,
    to: &str,
    skip: &[&str],
) -> Result<usize>
where
    S: NexusSource + ?Sized,
    D: NexusSink + ?Sized,
{
    let mut copied = 0;
    for attribute in source
        .attributes(from)
        .context("read attributes", from)?
    {
        if is_denied(&attribute.name) || skip.contains(&attribute.name.as_str()) {
            continue;
        }
        dest.write_attribute(to, &attribute)
            .context("write attribute", to)?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFile;
    use savenexus_core::Attribute;

    #[test]
    fn test_denylist_and_skip() {
        let mut source = MemoryFile::new();
        source
            .set_attribute("/", Attribute::string("NeXus_version", "4.3.0"))
            .unwrap();
        source
            .set_attribute("/", Attribute::string("file_time", "2010-01-01"))
            .unwrap();
        source
            .set_attribute("/", Attribute::string("creator", "SNS"))
            .unwrap();
        source
            .set_attribute("/", Attribute::int("errors_count", 3))
            .unwrap();
        source
            .set_attribute("/", Attribute::string("errors", "old"))
            .unwrap();

        let mut dest = MemoryFile::new();
        let copied = copy_attributes(&source, "/", &mut dest, "/", &["errors"]).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(dest.attribute("/", "creator").and_then(Attribute::as_str), Some("SNS"));
        assert_eq!(
            dest.attribute("/", "errors_count"),
            Some(&Attribute::int("errors_count", 3))
        );
        assert!(dest.attribute("/", "NeXus_version").is_none());
        assert!(dest.attribute("/", "file_time").is_none());
        assert!(dest.attribute("/", "errors").is_none());
    }

    #[test]
    fn test_missing_source_names_path() {
        let source = MemoryFile::new();
        let mut dest = MemoryFile::new();
        let err = copy_attributes(&source, "/nope", &mut dest, "/", &[]).unwrap_err();
        assert!(err.to_string().contains("/nope"));
    }
}
