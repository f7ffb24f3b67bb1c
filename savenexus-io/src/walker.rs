//! Recursive copy of the source tree into the destination.
//!
//! Nodes whose canonical path matches the path they were reached by are
//! copied (or rewritten). Everything else was reached through a link and is
//! only recorded; links are created once the destination tree is complete.

use crate::attributes::copy_attributes;
use crate::bank::{self, DATA, DATA_ERRORS, ERRORS_ATTR, TIME_OF_FLIGHT};
use crate::chunked::ChunkedWriter;
use crate::container::{Entry, EntryKind, NexusSink, NexusSource};
use crate::error::Context;
use crate::session::{ConversionSummary, ConvertOptions};
use crate::Result;
use log::{debug, warn};
use savenexus_core::path;
use savenexus_core::{
    ArrayData, Attribute, CancelToken, DataModel, DatasetSpec, ElementType, LinkRecord, LinkTable,
    PathStack, RectangularBank,
};

pub(crate) struct TreeWalker<'a, S: ?Sized, D: ?Sized, M: ?Sized> {
    source: &'a S,
    dest: &'a mut D,
    model: &'a M,
    options: &'a ConvertOptions,
    writer: ChunkedWriter<'a>,
    cancel: &'a CancelToken,
    stack: PathStack,
    links: LinkTable,
    summary: ConversionSummary,
}

impl<'a, S, D, M> TreeWalker<'a, S, D, M>
where
    S: NexusSource + ?Sized,
    D: NexusSink + ?Sized,
    M: DataModel + ?Sized,
{
    pub(crate) fn new(
        source: &'a S,
        dest: &'a mut D,
        model: &'a M,
        options: &'a ConvertOptions,
        writer: ChunkedWriter<'a>,
        cancel: &'a CancelToken,
    ) -> Self {
        let links = options
            .max_links
            .map_or_else(LinkTable::new, LinkTable::with_limit);
        Self {
            source,
            dest,
            model,
            options,
            writer,
            cancel,
            stack: PathStack::new(),
            links,
            summary: ConversionSummary::default(),
        }
    }

    /// Walk the whole tree below the root. Returns the deferred links.
    pub(crate) fn walk(mut self) -> Result<(LinkTable, ConversionSummary)> {
        self.walk_group()?;
        Ok((self.links, self.summary))
    }

    fn walk_group(&mut self) -> Result<()> {
        let group_path = self.stack.as_str().to_string();
        let entries = self
            .source
            .entries(&group_path)
            .context("list group", &group_path)?;

        for entry in &entries {
            self.cancel.check()?;
            self.stack.push(&entry.name);
            let node_path = self.stack.as_str().to_string();
            let canonical = self
                .source
                .canonical_path(&node_path)
                .context("read target", &node_path)?;

            if canonical != node_path {
                self.stack.pop(&entry.name)?;
                if entry.name == DATA_ERRORS
                    && self.errors_rebuilt_with_data(&node_path, &entries)?
                {
                    debug!("{node_path} links to {canonical}, replaced by the rebuilt errors");
                    continue;
                }
                debug!("{node_path} links to {canonical}");
                self.links
                    .record(LinkRecord::new(&group_path, &canonical, &entry.name))?;
                continue;
            }

            match &entry.kind {
                EntryKind::Group { .. } => {
                    self.dest
                        .create_group(&node_path)
                        .context("create group", &node_path)?;
                    copy_attributes(self.source, &node_path, self.dest, &node_path, &[])?;
                    self.summary.groups += 1;
                    self.walk_group()?;
                }
                EntryKind::Dataset => self.copy_dataset(&node_path, &entry.name, &entries)?,
            }
            self.stack.pop(&entry.name)?;
        }
        Ok(())
    }

    fn copy_dataset(&mut self, node_path: &str, name: &str, siblings: &[Entry]) -> Result<()> {
        if self.options.rewrite_banks {
            match name {
                DATA => {
                    let bank = bank::resolve(self.model, node_path, &self.options.bank_map);
                    if let Some(bank) = bank {
                        return self.rewrite_bank(node_path, bank, siblings);
                    }
                }
                DATA_ERRORS => {
                    if self.errors_rebuilt_with_data(node_path, siblings)? {
                        debug!("{node_path} is rebuilt with its data");
                        return Ok(());
                    }
                }
                TIME_OF_FLIGHT => {
                    if bank::resolve(self.model, node_path, &self.options.bank_map).is_some() {
                        return self.write_time_of_flight(node_path);
                    }
                }
                _ => {}
            }
        }
        self.copy_verbatim(node_path)
    }

    /// True when `errors_path` is synthesized by the bank rewrite of its
    /// sibling `data`: that `data` is genuine here and its bank is rectangular.
    fn errors_rebuilt_with_data(&self, errors_path: &str, siblings: &[Entry]) -> Result<bool> {
        if !self.options.rewrite_banks || !has_dataset(siblings, DATA) {
            return Ok(false);
        }
        let data_path = path::join(&path::parent(errors_path), DATA);
        if !self.is_genuine(&data_path)? {
            return Ok(false);
        }
        Ok(bank::bank_name(&data_path, &self.options.bank_map)
            .and_then(|name| self.model.rectangular_bank(name))
            .is_some())
    }

    fn is_genuine(&self, node_path: &str) -> Result<bool> {
        let canonical = self
            .source
            .canonical_path(node_path)
            .context("read target", node_path)?;
        Ok(canonical == node_path)
    }

    fn copy_verbatim(&mut self, node_path: &str) -> Result<()> {
        let spec = self
            .source
            .dataset_spec(node_path)
            .context("read dataset", node_path)?
            .with_compression(self.options.compression);
        let data = self
            .source
            .read_dataset(node_path)
            .context("read dataset", node_path)?;
        self.dest
            .write_dataset(node_path, &spec, &data)
            .context("write dataset", node_path)?;
        copy_attributes(self.source, node_path, self.dest, node_path, &[])?;
        self.summary.datasets += 1;
        Ok(())
    }

    fn rewrite_bank(
        &mut self,
        data_path: &str,
        bank: &RectangularBank,
        siblings: &[Entry],
    ) -> Result<()> {
        let errors_path = path::join(&path::parent(data_path), DATA_ERRORS);
        let outcome = self
            .writer
            .write_bank(self.dest, self.model, bank, data_path, &errors_path)?;

        copy_attributes(self.source, data_path, self.dest, data_path, &[ERRORS_ATTR])?;
        self.dest
            .write_attribute(data_path, &Attribute::string(ERRORS_ATTR, DATA_ERRORS))
            .context("write attribute", data_path)?;
        if has_dataset(siblings, DATA_ERRORS) && self.is_genuine(&errors_path)? {
            copy_attributes(self.source, &errors_path, self.dest, &errors_path, &[])?;
        }

        if outcome.missing_pixels > 0 {
            warn!(
                "{}: {} pixels have no data in the model and were left at zero",
                bank.name, outcome.missing_pixels
            );
        }
        self.summary.datasets += 2;
        self.summary.banks_rewritten += 1;
        self.summary.missing_pixels += outcome.missing_pixels;
        Ok(())
    }

    fn write_time_of_flight(&mut self, node_path: &str) -> Result<()> {
        let values = bank::time_of_flight(self.model);
        let spec = DatasetSpec::new(ElementType::F32, vec![values.len()])
            .with_compression(self.options.compression);
        self.dest
            .write_dataset(node_path, &spec, &ArrayData::F32(values))
            .context("write dataset", node_path)?;
        copy_attributes(self.source, node_path, self.dest, node_path, &[])?;
        self.summary.datasets += 1;
        Ok(())
    }
}

fn has_dataset(entries: &[Entry], name: &str) -> bool {
    entries
        .iter()
        .any(|entry| entry.name == name && entry.kind == EntryKind::Dataset)
}
