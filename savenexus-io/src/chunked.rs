//! Memory-budgeted writing of rectangular bank payloads.

use crate::bank::{self, Field};
use crate::container::NexusSink;
use crate::error::Context;
use crate::Result;
use log::{debug, info};
use savenexus_core::slab::{budget_from_available, needs_reclaim, required_bytes};
use savenexus_core::{
    CancelToken, DataModel, DatasetSpec, ElementType, Progress, RectangularBank, SlabPlan,
    WriteMode,
};
use sysinfo::System;

/// Source of the free-memory figure the slab plan is budgeted against.
pub trait MemoryProbe {
    /// Bytes currently available to the process.
    fn available_bytes(&self) -> u64;

    /// Release memory retained by the caller before a very large bank is measured.
    fn reclaim(&self) {}
}

/// Probes the operating system for available memory.
///
/// Keeps the default no-op [`MemoryProbe::reclaim`]: nothing is retained
/// between banks, so there is nothing to release before probing.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> u64 {
        let mut system = System::new();
        system.refresh_memory();
        system.available_memory()
    }
}

/// A fixed amount of available memory, for explicit budgets and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> u64 {
        self.0
    }
}

/// Outcome of writing one bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BankWrite {
    pub plan: SlabPlan,
    /// Pixels whose detector had no row in the model.
    pub missing_pixels: usize,
}

/// Writes `data` and `data_errors` of a bank, in slabs when they do not fit
/// the memory budget.
pub struct ChunkedWriter<'a> {
    probe: &'a dyn MemoryProbe,
    progress: &'a dyn Progress,
    cancel: &'a CancelToken,
    combined: bool,
    compression: Option<u8>,
}

impl<'a> ChunkedWriter<'a> {
    #[must_use]
    pub fn new(
        probe: &'a dyn MemoryProbe,
        progress: &'a dyn Progress,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            probe,
            progress,
            cancel,
            combined: true,
            compression: None,
        }
    }

    /// Request filling counts and errors together when the bank fits.
    #[must_use]
    pub fn with_combined(mut self, combined: bool) -> Self {
        self.combined = combined;
        self
    }

    /// Set the deflate level of the created datasets.
    #[must_use]
    pub fn with_compression(mut self, compression: Option<u8>) -> Self {
        self.compression = compression;
        self
    }

    /// Plan the write of a bank with `bins` time bins against the probed budget.
    #[must_use]
    pub fn plan(&self, bank: &RectangularBank, bins: usize) -> SlabPlan {
        let geometry = bank.geometry();
        let required = required_bytes(geometry, bins);
        if needs_reclaim(required) {
            debug!("{}: {required} bytes required, reclaiming before probe", bank.name);
            self.probe.reclaim();
        }
        let budget = budget_from_available(self.probe.available_bytes());
        SlabPlan::new(geometry, bins, budget, self.combined)
    }

    /// Create `data_path` and `errors_path` and fill them from the model.
    ///
    /// Progress is reported after every slab write. Cancellation is checked
    /// before every slab.
    ///
    /// # Errors
    /// Returns an error if a dataset cannot be created or written, or if the
    /// conversion was cancelled.
    pub fn write_bank<D, M>(
        &self,
        dest: &mut D,
        model: &M,
        bank: &RectangularBank,
        data_path: &str,
        errors_path: &str,
    ) -> Result<BankWrite>
    where
        D: NexusSink + ?Sized,
        M: DataModel + ?Sized,
    {
        let bins = model.bin_count();
        let spec = DatasetSpec::new(ElementType::F32, vec![bank.x_pixels, bank.y_pixels, bins])
            .with_compression(self.compression);
        dest.create_dataset(data_path, &spec)
            .context("create dataset", data_path)?;
        dest.create_dataset(errors_path, &spec)
            .context("create dataset", errors_path)?;

        let plan = self.plan(bank, bins);
        if plan.sliced {
            info!(
                "{}: {} bytes needed, budget {}; writing {} slabs of {} x pixels",
                bank.name, plan.required_bytes, plan.budget_bytes, plan.slab_count, plan.slab_width
            );
        } else {
            debug!("{}: writing {:?} in one pass", bank.name, plan.mode);
        }

        let missing_pixels = match plan.mode {
            WriteMode::Combined => self.write_combined(dest, model, bank, &plan, data_path, errors_path)?,
            WriteMode::Separate => {
                let missing =
                    self.write_field(dest, model, bank, &plan, Field::Counts, data_path)?;
                self.write_field(dest, model, bank, &plan, Field::Errors, errors_path)?;
                missing
            }
        };

        self.progress
            .report_increment(1, &format!("Wrote {}", bank.name));
        Ok(BankWrite {
            plan,
            missing_pixels,
        })
    }

    fn write_combined<D, M>(
        &self,
        dest: &mut D,
        model: &M,
        bank: &RectangularBank,
        plan: &SlabPlan,
        data_path: &str,
        errors_path: &str,
    ) -> Result<usize>
    where
        D: NexusSink + ?Sized,
        M: DataModel + ?Sized,
    {
        let mut counts = vec![0.0_f32; plan.slab_len()];
        let mut errors = vec![0.0_f32; plan.slab_len()];
        let mut missing = 0;
        for range in plan.slabs() {
            self.cancel.check().context("write slab", data_path)?;
            let start = range.start;
            missing += bank::fill_slab_pair(model, bank, range, &mut counts, &mut errors);
            dest.write_slab(data_path, start, &counts)
                .context("write slab", data_path)?;
            dest.write_slab(errors_path, start, &errors)
                .context("write slab", errors_path)?;
            self.progress
                .report_increment(1, &format!("Writing {}", bank.name));
        }
        Ok(missing)
    }

    fn write_field<D, M>(
        &self,
        dest: &mut D,
        model: &M,
        bank: &RectangularBank,
        plan: &SlabPlan,
        field: Field,
        path: &str,
    ) -> Result<usize>
    where
        D: NexusSink + ?Sized,
        M: DataModel + ?Sized,
    {
        let mut buffer = vec![0.0_f32; plan.slab_len()];
        let mut missing = 0;
        for range in plan.slabs() {
            self.cancel.check().context("write slab", path)?;
            let start = range.start;
            missing += bank::fill_slab(model, bank, range, field, &mut buffer);
            dest.write_slab(path, start, &buffer)
                .context("write slab", path)?;
            self.progress
                .report_increment(1, &format!("Writing {}", bank.name));
        }
        Ok(missing)
    }
}
