//! Detector bank payload synthesis.
//!
//! A rectangular bank's `data` and `data_errors` fields are rebuilt from the
//! data model as float32 arrays shaped `(x_pixels, y_pixels, bins)`, x
//! slowest. Pixel `(x, y)` of a slab starting at `x0` occupies
//! `buffer[((x - x0) * y_pixels + y) * bins..][..bins]`.

use log::{debug, info};
use rayon::prelude::*;
use savenexus_core::path;
use savenexus_core::{DataModel, RectangularBank};
use std::collections::HashMap;
use std::ops::Range;

/// Dataset holding a bank's counts.
pub const DATA: &str = "data";
/// Dataset holding a bank's uncertainties.
pub const DATA_ERRORS: &str = "data_errors";
/// Dataset holding a bank's time-of-flight axis.
pub const TIME_OF_FLIGHT: &str = "time_of_flight";
/// Attribute on `data` naming its companion errors field.
pub const ERRORS_ATTR: &str = "errors";

/// Which row of the model a pass copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Counts,
    Errors,
}

impl Field {
    fn row<'m, M: DataModel + ?Sized>(self, model: &'m M, row: usize) -> &'m [f64] {
        match self {
            Self::Counts => model.counts(row),
            Self::Errors => model.errors(row),
        }
    }
}

/// Name of the instrument component owning the dataset at `dataset_path`.
///
/// An explicit `bank_map` entry wins. Otherwise the bank is the group
/// directly above the dataset, provided the path is at least
/// `entry/<bank>/<dataset>` deep.
#[must_use]
pub fn bank_name<'a>(dataset_path: &'a str, bank_map: &'a HashMap<String, String>) -> Option<&'a str> {
    if let Some(name) = bank_map.get(dataset_path) {
        return Some(name.as_str());
    }
    let segments: Vec<&str> = path::segments(dataset_path).collect();
    if segments.len() < 3 {
        return None;
    }
    Some(segments[segments.len() - 2]).filter(|name| !name.is_empty())
}

/// Rectangular geometry of the bank owning `dataset_path`.
///
/// `None` means the dataset is copied verbatim: the path names no bank, or
/// the model has no rectangular component of that name.
pub fn resolve<'m, M: DataModel + ?Sized>(
    model: &'m M,
    dataset_path: &str,
    bank_map: &HashMap<String, String>,
) -> Option<&'m RectangularBank> {
    let name = bank_name(dataset_path, bank_map)?;
    let bank = model.rectangular_bank(name);
    if bank.is_none() && path::leaf(dataset_path) == DATA {
        info!("{name} is not a rectangular detector, copying {dataset_path} verbatim");
    }
    bank
}

/// The model's time-of-flight axis as stored in the file.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn time_of_flight<M: DataModel + ?Sized>(model: &M) -> Vec<f32> {
    model.time_of_flight().iter().map(|&t| t as f32).collect()
}

/// Fill one field of the pixels in `x_range` into `buffer`.
///
/// Pixels whose detector has no row in the model are zeroed and counted.
/// Returns the number of such pixels.
pub fn fill_slab<M: DataModel + ?Sized>(
    model: &M,
    bank: &RectangularBank,
    x_range: Range<usize>,
    field: Field,
    buffer: &mut [f32],
) -> usize {
    let bins = model.bin_count();
    if bins == 0 || bank.y_pixels == 0 {
        return 0;
    }
    debug_assert_eq!(buffer.len(), x_range.len() * bank.y_pixels * bins);

    buffer
        .par_chunks_mut(bins)
        .enumerate()
        .map(|(pixel, values)| {
            let (x, y) = (x_range.start + pixel / bank.y_pixels, pixel % bank.y_pixels);
            match locate(model, bank, x, y) {
                Some(row) => {
                    copy_row(field.row(model, row), values);
                    0
                }
                None => {
                    values.fill(0.0);
                    1
                }
            }
        })
        .sum()
}

/// Fill counts and errors of the pixels in `x_range` in one pass.
///
/// Returns the number of pixels with no row in the model.
pub fn fill_slab_pair<M: DataModel + ?Sized>(
    model: &M,
    bank: &RectangularBank,
    x_range: Range<usize>,
    counts: &mut [f32],
    errors: &mut [f32],
) -> usize {
    let bins = model.bin_count();
    if bins == 0 || bank.y_pixels == 0 {
        return 0;
    }
    debug_assert_eq!(counts.len(), errors.len());

    counts
        .par_chunks_mut(bins)
        .zip(errors.par_chunks_mut(bins))
        .enumerate()
        .map(|(pixel, (counts, errors))| {
            let (x, y) = (x_range.start + pixel / bank.y_pixels, pixel % bank.y_pixels);
            match locate(model, bank, x, y) {
                Some(row) => {
                    copy_row(model.counts(row), counts);
                    copy_row(model.errors(row), errors);
                    0
                }
                None => {
                    counts.fill(0.0);
                    errors.fill(0.0);
                    1
                }
            }
        })
        .sum()
}

fn locate<M: DataModel + ?Sized>(
    model: &M,
    bank: &RectangularBank,
    x: usize,
    y: usize,
) -> Option<usize> {
    let Some(detector_id) = bank.detector_id(x, y) else {
        debug!("{}: pixel ({x}, {y}) has no representable detector ID", bank.name);
        return None;
    };
    let row = model.row_index(detector_id);
    if row.is_none() {
        debug!(
            "{}: pixel ({x}, {y}) has no data for detector {detector_id}",
            bank.name
        );
    }
    row
}

#[allow(clippy::cast_possible_truncation)]
fn copy_row(row: &[f64], out: &mut [f32]) {
    for (dst, &src) in out.iter_mut().zip(row) {
        *dst = src as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use savenexus_core::Workspace;

    // 2 x 3 bank, 2 bins, detector 3 (pixel (1, 0)) has no spectrum.
    fn model() -> Workspace {
        let mut ws = Workspace::new(vec![0.0, 10.0, 20.0], 2).unwrap();
        for id in [0, 1, 2, 4, 5] {
            let base = f64::from(id) * 10.0;
            ws.add_spectrum(&[id], &[base, base + 1.0], &[1.0, 2.0])
                .unwrap();
        }
        ws.add_rectangular_bank(RectangularBank::new("bank1", 2, 3, 0).unwrap());
        ws
    }

    #[test]
    fn test_bank_name_prefers_map() {
        let mut map = HashMap::new();
        assert_eq!(bank_name("/entry/bank1/data", &map), Some("bank1"));
        assert_eq!(bank_name("/entry/data", &map), None);
        map.insert("/entry/data".to_string(), "bank9".to_string());
        assert_eq!(bank_name("/entry/data", &map), Some("bank9"));
    }

    #[test]
    fn test_resolve_falls_back_for_unknown_and_other_components() {
        let mut ws = model();
        ws.add_component("monitor1");
        let map = HashMap::new();
        assert!(resolve(&ws, "/entry/bank1/data", &map).is_some());
        assert!(resolve(&ws, "/entry/bank2/data", &map).is_none());
        assert!(resolve(&ws, "/entry/monitor1/data", &map).is_none());
        assert!(resolve(&ws, "/bank1/data", &map).is_none());
    }

    #[test]
    fn test_fill_layout_and_missing_pixel() {
        let ws = model();
        let bank = ws.rectangular_bank("bank1").unwrap();
        let mut buffer = vec![-1.0_f32; 2 * 3 * 2];
        let missing = fill_slab(&ws, bank, 0..2, Field::Counts, &mut buffer);
        assert_eq!(missing, 1);
        // (0, 2) -> detector 2
        assert_relative_eq!(buffer[2 * 2], 20.0);
        assert_relative_eq!(buffer[2 * 2 + 1], 21.0);
        // (1, 0) -> detector 3, missing
        assert!(buffer[3 * 2..4 * 2].iter().all(|&v| v == 0.0));
        // (1, 2) -> detector 5
        assert_relative_eq!(buffer[5 * 2 + 1], 51.0);
    }

    #[test]
    fn test_pair_matches_separate_passes() {
        let ws = model();
        let bank = ws.rectangular_bank("bank1").unwrap();
        let len = 3 * 2;
        let (mut counts, mut errors) = (vec![0.0; len], vec![0.0; len]);
        let missing = fill_slab_pair(&ws, bank, 1..2, &mut counts, &mut errors);
        assert_eq!(missing, 1);

        let mut expected = vec![0.0; len];
        fill_slab(&ws, bank, 1..2, Field::Counts, &mut expected);
        assert_eq!(counts, expected);
        fill_slab(&ws, bank, 1..2, Field::Errors, &mut expected);
        assert_eq!(errors, expected);
    }

    #[test]
    fn test_overflowing_ids_count_as_missing() {
        let ws = model();
        let mut bank = ws.rectangular_bank("bank1").unwrap().clone();
        bank.id_start = i32::MAX - 1;
        let mut buffer = vec![-1.0_f32; 3 * 2];
        // (1, 0) -> MAX + 2, (1, 1) and (1, 2) past MAX as well
        let missing = fill_slab(&ws, &bank, 1..2, Field::Counts, &mut buffer);
        assert_eq!(missing, 3);
        assert!(buffer.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_bins_is_a_no_op() {
        let mut ws = Workspace::new(Vec::new(), 0).unwrap();
        ws.add_rectangular_bank(RectangularBank::new("bank1", 2, 2, 0).unwrap());
        let bank = ws.rectangular_bank("bank1").unwrap();
        let mut buffer = Vec::new();
        assert_eq!(fill_slab(&ws, bank, 0..2, Field::Counts, &mut buffer), 0);
    }
}
