//! Memory-budgeted slab planning for rectangular bank payloads.
//!
//! A bank payload is `x_pixels * y_pixels * bins` float32 values for counts
//! and the same again for errors. When both do not fit in the memory
//! budget, the payload is written in uniform slabs along the x axis.

use crate::model::BankGeometry;
use std::mem::size_of;
use std::ops::Range;

/// Above this many required bytes, retained memory is released before probing.
pub const RECLAIM_THRESHOLD_BYTES: u64 = 1 << 30;

/// Upper bound on the budget, whatever the system reports as free.
pub const MAX_BUDGET_BYTES: u64 = 5_000_000_000;

const VALUE_BYTES: u64 = size_of::<f32>() as u64;

/// Number of payload fields written per bank (counts and errors).
const FIELDS: u64 = 2;

/// How counts and errors are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Both fields are filled in one pixel pass and written whole.
    Combined,
    /// Counts are written completely, then errors, each in its own pass.
    Separate,
}

/// Bytes needed to hold counts and errors of a whole bank.
#[must_use]
pub fn required_bytes(geometry: BankGeometry, bins: usize) -> u64 {
    (geometry.x_pixels as u64)
        .saturating_mul(geometry.y_pixels as u64)
        .saturating_mul(bins as u64)
        .saturating_mul(FIELDS * VALUE_BYTES)
}

/// Apply the 50% safety margin and the upper cap to probed free memory.
#[must_use]
pub fn budget_from_available(available_bytes: u64) -> u64 {
    (available_bytes / 2).min(MAX_BUDGET_BYTES)
}

/// True when the payload is large enough to warrant releasing retained memory first.
#[must_use]
pub fn needs_reclaim(required_bytes: u64) -> bool {
    required_bytes > RECLAIM_THRESHOLD_BYTES
}

/// Slab layout chosen for one bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlabPlan {
    pub geometry: BankGeometry,
    pub bins: usize,
    /// Slab width in x pixels; always divides `geometry.x_pixels`.
    pub slab_width: usize,
    pub slab_count: usize,
    /// Bytes of the fill buffer(s) held at once.
    pub slab_bytes: u64,
    pub required_bytes: u64,
    pub budget_bytes: u64,
    pub mode: WriteMode,
    /// True when the bank does not fit in the budget.
    pub sliced: bool,
}

impl SlabPlan {
    /// Plan the write of one bank against a budget (already margin-adjusted).
    ///
    /// Combined writing is only kept when the whole bank fits.
    #[must_use]
    pub fn new(geometry: BankGeometry, bins: usize, budget_bytes: u64, combined: bool) -> Self {
        let required = required_bytes(geometry, bins);
        let x_pixels = geometry.x_pixels;

        if budget_bytes >= required {
            let mode = if combined {
                WriteMode::Combined
            } else {
                WriteMode::Separate
            };
            let slab_bytes = match mode {
                WriteMode::Combined => required,
                WriteMode::Separate => required / FIELDS,
            };
            return Self {
                geometry,
                bins,
                slab_width: x_pixels,
                slab_count: usize::from(x_pixels > 0),
                slab_bytes,
                required_bytes: required,
                budget_bytes,
                mode,
                sliced: false,
            };
        }

        let column_bytes = (geometry.y_pixels as u64)
            .saturating_mul(bins as u64)
            .saturating_mul(FIELDS * VALUE_BYTES);
        let candidate = budget_bytes.checked_div(column_bytes).unwrap_or(0);
        let mut width = usize::try_from(candidate)
            .unwrap_or(usize::MAX)
            .clamp(1, x_pixels.max(1));
        while width > 1 && x_pixels % width != 0 {
            width -= 1;
        }

        Self {
            geometry,
            bins,
            slab_width: width,
            slab_count: x_pixels / width,
            slab_bytes: (width as u64)
                .saturating_mul(geometry.y_pixels as u64)
                .saturating_mul(bins as u64)
                .saturating_mul(VALUE_BYTES),
            required_bytes: required,
            budget_bytes,
            mode: WriteMode::Separate,
            sliced: true,
        }
    }

    /// Number of float32 values in one slab of one field.
    #[must_use]
    pub fn slab_len(&self) -> usize {
        self.slab_width * self.geometry.y_pixels * self.bins
    }

    /// The x-pixel ranges of each slab, in write order.
    pub fn slabs(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.slab_count).map(move |i| {
            let start = i * self.slab_width;
            start..start + self.slab_width
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn geometry(x_pixels: usize, y_pixels: usize) -> BankGeometry {
        BankGeometry { x_pixels, y_pixels }
    }

    #[test]
    fn test_small_budget_forces_single_column_slabs() {
        // 8x4 pixels, 100 bins, probe reports 2000 bytes free.
        let geometry = geometry(8, 4);
        let budget = budget_from_available(2000);
        assert_eq!(budget, 1000);
        assert_eq!(required_bytes(geometry, 100), 25_600);

        let plan = SlabPlan::new(geometry, 100, budget, true);
        assert!(plan.sliced);
        assert_eq!(plan.slab_width, 1);
        assert_eq!(plan.slab_count, 8);
        assert_eq!(plan.mode, WriteMode::Separate);
    }

    #[test]
    fn test_fitting_bank_keeps_combined_mode() {
        let plan = SlabPlan::new(geometry(8, 4), 100, 1 << 20, true);
        assert!(!plan.sliced);
        assert_eq!(plan.slab_width, 8);
        assert_eq!(plan.slab_count, 1);
        assert_eq!(plan.mode, WriteMode::Combined);
        assert_eq!(plan.slab_bytes, 25_600);
    }

    #[test]
    fn test_fitting_bank_separate_holds_one_field() {
        let plan = SlabPlan::new(geometry(8, 4), 100, 1 << 20, false);
        assert_eq!(plan.mode, WriteMode::Separate);
        assert_eq!(plan.slab_bytes, 12_800);
    }

    #[test]
    fn test_width_decreases_to_divisor() {
        // Budget allows 5 columns of 10x10 bins; 12 is not divisible by 5.
        let column = 10 * 10 * 8;
        let plan = SlabPlan::new(geometry(12, 10), 10, 5 * column, true);
        assert_eq!(plan.slab_width, 4);
        assert_eq!(plan.slab_count, 3);
    }

    #[test]
    fn test_budget_cap_and_margin() {
        assert_eq!(budget_from_available(u64::MAX), MAX_BUDGET_BYTES);
        assert_eq!(budget_from_available(3), 1);
        assert!(needs_reclaim(RECLAIM_THRESHOLD_BYTES + 1));
        assert!(!needs_reclaim(RECLAIM_THRESHOLD_BYTES));
    }

    #[test]
    fn test_empty_bank() {
        let plan = SlabPlan::new(geometry(0, 4), 100, 0, true);
        assert!(!plan.sliced);
        assert_eq!(plan.slabs().count(), 0);

        let plan = SlabPlan::new(geometry(4, 4), 0, 0, true);
        assert!(!plan.sliced);
        assert_eq!(plan.slabs().count(), 1);
    }

    proptest! {
        #[test]
        fn prop_slab_width_divides_x(
            x in 1usize..512,
            y in 1usize..64,
            bins in 1usize..256,
            budget in 0u64..4_000_000,
        ) {
            let plan = SlabPlan::new(geometry(x, y), bins, budget, true);
            prop_assert_eq!(x % plan.slab_width, 0);

            let mut next = 0;
            for range in plan.slabs() {
                prop_assert_eq!(range.start, next);
                prop_assert_eq!(range.len(), plan.slab_width);
                next = range.end;
            }
            prop_assert_eq!(next, x);
        }

        #[test]
        fn prop_slab_fits_budget_when_a_column_fits(
            x in 1usize..512,
            y in 1usize..64,
            bins in 1usize..256,
            budget in 0u64..4_000_000,
        ) {
            let column = (y * bins) as u64 * 8;
            prop_assume!(budget >= column);
            let plan = SlabPlan::new(geometry(x, y), bins, budget, true);
            prop_assert!(plan.slab_bytes <= budget);
        }
    }
}
