//! Conversion sessions.
//!
//! A [`FileSession`] owns everything one conversion needs: both containers,
//! the data model, the options and the progress/cancel plumbing. It copies
//! the root attributes, walks the tree, then resolves the deferred links
//! against the finished destination.

use crate::attributes::copy_attributes;
use crate::chunked::{ChunkedWriter, FixedMemory, MemoryProbe, SystemMemory};
use crate::container::{NexusSink, NexusSource};
use crate::error::Context;
use crate::walker::TreeWalker;
use crate::{Error, Result};
use log::{debug, info};
use savenexus_core::path::ROOT;
use savenexus_core::{CancelToken, DataModel, LinkTable, NoProgress, Progress};
use std::collections::HashMap;

/// Options of one conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Deflate level applied to every dataset written.
    pub compression: Option<u8>,
    /// Fill counts and errors of a bank in one pass when memory allows.
    pub combined: bool,
    /// Rebuild rectangular bank fields from the model. When false the
    /// conversion is a verbatim copy.
    pub rewrite_banks: bool,
    /// Memory to budget against instead of probing the system.
    pub memory_budget_bytes: Option<u64>,
    /// Upper bound on the number of links a source may contain.
    pub max_links: Option<usize>,
    /// Explicit dataset path to bank name assignments, consulted before the
    /// bank is inferred from the path.
    pub bank_map: HashMap<String, String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            compression: None,
            combined: true,
            rewrite_banks: true,
            memory_budget_bytes: None,
            max_links: None,
            bank_map: HashMap::new(),
        }
    }
}

impl ConvertOptions {
    /// Set the deflate level (0-9).
    #[must_use]
    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression = Some(level.min(9));
        self
    }

    #[must_use]
    pub fn with_combined(mut self, combined: bool) -> Self {
        self.combined = combined;
        self
    }

    #[must_use]
    pub fn with_rewrite_banks(mut self, rewrite: bool) -> Self {
        self.rewrite_banks = rewrite;
        self
    }

    /// Budget against `bytes` of available memory instead of probing the system.
    ///
    /// The usual safety margin still applies.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_max_links(mut self, limit: usize) -> Self {
        self.max_links = Some(limit);
        self
    }

    /// Assign the dataset at `dataset_path` to the bank `name`.
    #[must_use]
    pub fn with_bank(mut self, dataset_path: &str, name: &str) -> Self {
        self.bank_map.insert(
            savenexus_core::path::normalize(dataset_path),
            name.to_string(),
        );
        self
    }
}

/// What a conversion wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Groups created below the root.
    pub groups: usize,
    /// Datasets written, including rebuilt bank fields.
    pub datasets: usize,
    pub banks_rewritten: usize,
    pub links: usize,
    /// Bank pixels with no row in the model, left at zero.
    pub missing_pixels: usize,
}

/// One conversion from a source container into a destination container.
pub struct FileSession<'a, S: ?Sized, D: ?Sized, M: ?Sized> {
    source: &'a S,
    dest: &'a mut D,
    model: &'a M,
    options: &'a ConvertOptions,
    progress: &'a dyn Progress,
    probe: Option<&'a dyn MemoryProbe>,
    cancel: CancelToken,
}

impl<'a, S, D, M> FileSession<'a, S, D, M>
where
    S: NexusSource + ?Sized,
    D: NexusSink + ?Sized,
    M: DataModel + ?Sized,
{
    #[must_use]
    pub fn new(source: &'a S, dest: &'a mut D, model: &'a M, options: &'a ConvertOptions) -> Self {
        Self {
            source,
            dest,
            model,
            options,
            progress: &NoProgress,
            probe: None,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Stop the conversion when `cancel` is triggered.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Measure available memory with `probe`.
    ///
    /// Takes precedence over `memory_budget_bytes` and the system probe.
    #[must_use]
    pub fn with_probe(mut self, probe: &'a dyn MemoryProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Run the conversion.
    ///
    /// # Errors
    /// Returns the first failing container operation, a link whose target is
    /// missing from the destination, or a cancellation.
    pub fn run(self) -> Result<ConversionSummary> {
        let Self {
            source,
            dest,
            model,
            options,
            progress,
            probe,
            cancel,
        } = self;

        let fixed = options.memory_budget_bytes.map(FixedMemory);
        let probe: &dyn MemoryProbe = match (probe, fixed.as_ref()) {
            (Some(probe), _) => probe,
            (None, Some(fixed)) => fixed,
            (None, None) => &SystemMemory,
        };

        copy_attributes(source, ROOT, dest, ROOT, &[])?;

        let writer = ChunkedWriter::new(probe, progress, &cancel)
            .with_combined(options.combined)
            .with_compression(options.compression);
        let (mut links, mut summary) =
            TreeWalker::new(source, &mut *dest, model, options, writer, &cancel).walk()?;

        info!(
            "copied {} groups and {} datasets, resolving {} links",
            summary.groups,
            summary.datasets,
            links.len()
        );
        summary.links = resolve_links(dest, &mut links)?;
        dest.flush().context("flush", ROOT)?;
        Ok(summary)
    }
}

/// Create every recorded link in the destination, in recording order.
///
/// # Errors
/// Returns [`Error::UnresolvedLink`] if a target is missing from `dest`.
pub fn resolve_links<D: NexusSink + ?Sized>(dest: &mut D, links: &mut LinkTable) -> Result<usize> {
    let mut created = 0;
    for record in links.drain() {
        let link_path = record.link_path();
        let Some(kind) = dest
            .object_kind(&record.to)
            .context("resolve link", &link_path)?
        else {
            return Err(Error::UnresolvedLink {
                link: link_path,
                target: record.to,
            });
        };
        if record.has_default_name() {
            debug!("linking {kind:?} {} into {}", record.to, record.from);
        } else {
            debug!("linking {kind:?} {} as {link_path}", record.to);
        }
        dest.create_link(&record.to, &record.from, &record.name)
            .context("create link", &link_path)?;
        created += 1;
    }
    Ok(created)
}

/// Convert `source` into `dest`, rebuilding rectangular banks from `model`.
///
/// # Errors
/// See [`FileSession::run`].
pub fn convert_tree<S, D, M>(
    source: &S,
    dest: &mut D,
    model: &M,
    options: &ConvertOptions,
) -> Result<ConversionSummary>
where
    S: NexusSource + ?Sized,
    D: NexusSink + ?Sized,
    M: DataModel + ?Sized,
{
    FileSession::new(source, dest, model, options).run()
}

#[cfg(feature = "hdf5")]
mod file {
    use super::{ConversionSummary, ConvertOptions, FileSession};
    use crate::container::NexusSink;
    use crate::error::Context;
    use crate::hdf5::{Hdf5Sink, Hdf5Source};
    use crate::Result;
    use chrono::{Local, SecondsFormat};
    use log::info;
    use savenexus_core::path::ROOT;
    use savenexus_core::{Attribute, CancelToken, DataModel, NoProgress, Progress};
    use std::path::Path;

    /// Convert the NeXus file at `input` into a new file at `output`.
    ///
    /// The output is written to a temporary file next to `output` and moved
    /// into place only when the conversion succeeds.
    ///
    /// # Errors
    /// Returns an error if either file cannot be opened or any step of the
    /// conversion fails. `output` is left untouched in that case.
    pub fn convert<M: DataModel + ?Sized>(
        input: &Path,
        output: &Path,
        model: &M,
        options: &ConvertOptions,
    ) -> Result<ConversionSummary> {
        convert_with(input, output, model, options, &NoProgress, &CancelToken::new())
    }

    /// [`convert`] with progress reporting and cancellation.
    ///
    /// # Errors
    /// See [`convert`].
    pub fn convert_with<M: DataModel + ?Sized>(
        input: &Path,
        output: &Path,
        model: &M,
        options: &ConvertOptions,
        progress: &dyn Progress,
        cancel: &CancelToken,
    ) -> Result<ConversionSummary> {
        let source = Hdf5Source::open(input)?;
        let dir = output
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".savenexus-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .context("create temp file", &dir.display().to_string())?
            .into_temp_path();

        let summary = {
            let mut sink = Hdf5Sink::create(&temp)?;
            let summary = FileSession::new(&source, &mut sink, model, options)
                .with_progress(progress)
                .with_cancel(cancel.clone())
                .run()?;
            write_file_metadata(&mut sink, output)?;
            sink.flush().context("flush", ROOT)?;
            summary
        };

        temp.persist(output)
            .map_err(|e| e.error)
            .context("rename", &output.display().to_string())?;
        info!(
            "wrote {} ({} banks rebuilt, {} links)",
            output.display(),
            summary.banks_rewritten,
            summary.links
        );
        Ok(summary)
    }

    fn write_file_metadata(sink: &mut Hdf5Sink, output: &Path) -> Result<()> {
        let file_name = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_time = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
        let (major, minor, release) = hdf5::library_version();
        let attributes = [
            Attribute::string("file_name", &file_name),
            Attribute::string("file_time", &file_time),
            Attribute::string("HDF5_Version", &format!("{major}.{minor}.{release}")),
        ];
        for attribute in &attributes {
            sink.write_attribute(ROOT, attribute)
                .context("write attribute", ROOT)?;
        }
        Ok(())
    }
}

#[cfg(feature = "hdf5")]
pub use file::{convert, convert_with};
