//! In-memory histogram data model.
//!
//! The conversion engine only reads from the model: rectangular bank
//! geometry, the detector-ID to row map, per-row counts and errors, and
//! the shared time-of-flight axis. [`Workspace`] is the concrete model;
//! anything implementing [`DataModel`] can be used instead.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Detector pixel identifier.
pub type DetectorId = i32;

/// Pixel-grid dimensions of a rectangular bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BankGeometry {
    pub x_pixels: usize,
    pub y_pixels: usize,
}

impl BankGeometry {
    /// Number of pixels in the bank.
    #[must_use]
    pub fn pixels(&self) -> usize {
        self.x_pixels * self.y_pixels
    }
}

/// A detector bank organised as a regular grid of pixels.
///
/// Detector IDs follow the rectangular-detector numbering:
/// `id_start + x * id_step_by_row + y * id_step` when IDs fill along y
/// first, `id_start + y * id_step_by_row + x * id_step` otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RectangularBank {
    pub name: String,
    pub x_pixels: usize,
    pub y_pixels: usize,
    pub id_start: DetectorId,
    pub id_fill_by_first_y: bool,
    pub id_step_by_row: DetectorId,
    pub id_step: DetectorId,
}

impl RectangularBank {
    /// Bank with the default numbering: IDs run along y, one row of y per x.
    ///
    /// # Errors
    /// Returns an error if `y_pixels` does not fit a detector ID step or a
    /// pixel's ID does not fit a [`DetectorId`].
    pub fn new(name: &str, x_pixels: usize, y_pixels: usize, id_start: DetectorId) -> Result<Self> {
        let id_step_by_row = DetectorId::try_from(y_pixels)
            .map_err(|_| Error::InvalidModel(format!("bank {name}: y_pixels too large")))?;
        let bank = Self {
            name: name.to_string(),
            x_pixels,
            y_pixels,
            id_start,
            id_fill_by_first_y: true,
            id_step_by_row,
            id_step: 1,
        };
        bank.validate()?;
        Ok(bank)
    }

    #[must_use]
    pub fn geometry(&self) -> BankGeometry {
        BankGeometry {
            x_pixels: self.x_pixels,
            y_pixels: self.y_pixels,
        }
    }

    /// Detector ID of pixel `(x, y)`, or `None` when it does not fit a
    /// [`DetectorId`].
    #[must_use]
    pub fn detector_id(&self, x: usize, y: usize) -> Option<DetectorId> {
        let (x, y) = (i64::try_from(x).ok()?, i64::try_from(y).ok()?);
        let (row, step) = if self.id_fill_by_first_y { (x, y) } else { (y, x) };
        let id = i64::from(self.id_start)
            .checked_add(row.checked_mul(i64::from(self.id_step_by_row))?)?
            .checked_add(step.checked_mul(i64::from(self.id_step))?)?;
        DetectorId::try_from(id).ok()
    }

    /// Check that every pixel of the grid has a representable detector ID.
    ///
    /// IDs are linear in `x` and `y`, so checking the corners is enough.
    ///
    /// # Errors
    /// Returns [`Error::InvalidModel`] naming the first corner that overflows.
    pub fn validate(&self) -> Result<()> {
        if self.x_pixels == 0 || self.y_pixels == 0 {
            return Ok(());
        }
        let (last_x, last_y) = (self.x_pixels - 1, self.y_pixels - 1);
        let corners = [(0, 0), (last_x, 0), (0, last_y), (last_x, last_y)];
        match corners
            .into_iter()
            .find(|&(x, y)| self.detector_id(x, y).is_none())
        {
            Some((x, y)) => Err(Error::InvalidModel(format!(
                "bank {}: detector ID of pixel ({x}, {y}) does not fit in 32 bits",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

/// Read-only view of the histogram data a conversion pulls from.
pub trait DataModel: Sync {
    /// Rectangular geometry of the named component, if it exists and is rectangular.
    fn rectangular_bank(&self, name: &str) -> Option<&RectangularBank>;

    /// Row holding the data of a detector.
    fn row_index(&self, detector_id: DetectorId) -> Option<usize>;

    /// Counts of a row; `bin_count()` values long.
    fn counts(&self, row: usize) -> &[f64];

    /// Uncertainties of a row; `bin_count()` values long.
    fn errors(&self, row: usize) -> &[f64];

    /// Shared time-of-flight axis (bin boundaries or points).
    fn time_of_flight(&self) -> &[f64];

    /// Number of time bins per row.
    fn bin_count(&self) -> usize;
}

#[derive(Clone, Debug)]
enum Component {
    Rectangular(RectangularBank),
    Other,
}

/// Histogram workspace: spectra stored row-major in flat columns.
#[derive(Clone, Debug)]
pub struct Workspace {
    time_of_flight: Vec<f64>,
    bins: usize,
    counts: Vec<f64>,
    errors: Vec<f64>,
    rows: usize,
    detector_rows: HashMap<DetectorId, usize>,
    components: HashMap<String, Component>,
}

impl Workspace {
    /// Create an empty workspace.
    ///
    /// # Errors
    /// Returns an error unless `time_of_flight` holds `bins` points or
    /// `bins + 1` bin boundaries.
    pub fn new(time_of_flight: Vec<f64>, bins: usize) -> Result<Self> {
        let len = time_of_flight.len();
        if len != bins && len != bins + 1 {
            return Err(Error::InvalidModel(format!(
                "time_of_flight has {len} values, expected {bins} or {}",
                bins + 1
            )));
        }
        Ok(Self {
            time_of_flight,
            bins,
            counts: Vec::new(),
            errors: Vec::new(),
            rows: 0,
            detector_rows: HashMap::new(),
            components: HashMap::new(),
        })
    }

    /// Append a spectrum row shared by `detector_ids`. Returns the row index.
    ///
    /// # Errors
    /// Returns an error if the row length is not `bin_count()` or a detector
    /// is already mapped to another row.
    pub fn add_spectrum(
        &mut self,
        detector_ids: &[DetectorId],
        counts: &[f64],
        errors: &[f64],
    ) -> Result<usize> {
        if counts.len() != self.bins || errors.len() != self.bins {
            return Err(Error::InvalidModel(format!(
                "spectrum for detectors {detector_ids:?} has {} counts and {} errors, expected {}",
                counts.len(),
                errors.len(),
                self.bins
            )));
        }
        if let Some(id) = detector_ids
            .iter()
            .find(|id| self.detector_rows.contains_key(id))
        {
            return Err(Error::InvalidModel(format!(
                "detector {id} is mapped to more than one spectrum"
            )));
        }

        let row = self.rows;
        self.counts.extend_from_slice(counts);
        self.errors.extend_from_slice(errors);
        for &id in detector_ids {
            self.detector_rows.insert(id, row);
        }
        self.rows += 1;
        Ok(row)
    }

    /// Register a rectangular bank.
    pub fn add_rectangular_bank(&mut self, bank: RectangularBank) {
        self.components
            .insert(bank.name.clone(), Component::Rectangular(bank));
    }

    /// Register a named component that is not a rectangular grid.
    pub fn add_component(&mut self, name: &str) {
        self.components.insert(name.to_string(), Component::Other);
    }

    /// Number of spectrum rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Load a workspace from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the model is inconsistent.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::InvalidModel(format!("cannot open {}: {e}", path.as_ref().display()))
        })?;
        let json: JsonWorkspace = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::InvalidModel(format!("malformed workspace JSON: {e}")))?;
        Self::from_json_workspace(json)
    }

    /// Load a workspace from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the model is inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let json: JsonWorkspace = serde_json::from_str(json)
            .map_err(|e| Error::InvalidModel(format!("malformed workspace JSON: {e}")))?;
        Self::from_json_workspace(json)
    }

    fn from_json_workspace(json: JsonWorkspace) -> Result<Self> {
        let bins = match json.bins {
            Some(bins) => bins,
            None => json
                .spectra
                .first()
                .map_or(json.time_of_flight.len().saturating_sub(1), |s| s.counts.len()),
        };
        let mut workspace = Self::new(json.time_of_flight, bins)?;

        for spectrum in json.spectra {
            let errors = spectrum
                .errors
                .unwrap_or_else(|| spectrum.counts.iter().map(|c| c.abs().sqrt()).collect());
            workspace.add_spectrum(&spectrum.detector_ids, &spectrum.counts, &errors)?;
        }

        for component in json.components {
            match component {
                JsonComponent::Rectangular {
                    name,
                    x_pixels,
                    y_pixels,
                    id_start,
                    id_fill_by_first_y,
                    id_step_by_row,
                    id_step,
                } => {
                    let mut bank = RectangularBank::new(&name, x_pixels, y_pixels, id_start)?;
                    bank.id_fill_by_first_y = id_fill_by_first_y;
                    if let Some(step) = id_step_by_row {
                        bank.id_step_by_row = step;
                    } else if !id_fill_by_first_y {
                        bank.id_step_by_row = DetectorId::try_from(x_pixels).map_err(|_| {
                            Error::InvalidModel(format!("bank {name}: x_pixels too large"))
                        })?;
                    }
                    bank.id_step = id_step;
                    bank.validate()?;
                    workspace.add_rectangular_bank(bank);
                }
                JsonComponent::Other { name } => workspace.add_component(&name),
            }
        }

        Ok(workspace)
    }
}

impl DataModel for Workspace {
    fn rectangular_bank(&self, name: &str) -> Option<&RectangularBank> {
        match self.components.get(name) {
            Some(Component::Rectangular(bank)) => Some(bank),
            Some(Component::Other) | None => None,
        }
    }

    fn row_index(&self, detector_id: DetectorId) -> Option<usize> {
        self.detector_rows.get(&detector_id).copied()
    }

    fn counts(&self, row: usize) -> &[f64] {
        &self.counts[row * self.bins..(row + 1) * self.bins]
    }

    fn errors(&self, row: usize) -> &[f64] {
        &self.errors[row * self.bins..(row + 1) * self.bins]
    }

    fn time_of_flight(&self) -> &[f64] {
        &self.time_of_flight
    }

    fn bin_count(&self) -> usize {
        self.bins
    }
}

#[derive(Deserialize)]
struct JsonWorkspace {
    time_of_flight: Vec<f64>,
    #[serde(default)]
    bins: Option<usize>,
    #[serde(default)]
    spectra: Vec<JsonSpectrum>,
    #[serde(default)]
    components: Vec<JsonComponent>,
}

#[derive(Deserialize)]
struct JsonSpectrum {
    detector_ids: Vec<DetectorId>,
    counts: Vec<f64>,
    #[serde(default)]
    errors: Option<Vec<f64>>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonComponent {
    Rectangular {
        name: String,
        x_pixels: usize,
        y_pixels: usize,
        #[serde(default)]
        id_start: DetectorId,
        #[serde(default = "default_fill_by_first_y")]
        id_fill_by_first_y: bool,
        #[serde(default)]
        id_step_by_row: Option<DetectorId>,
        #[serde(default = "default_id_step")]
        id_step: DetectorId,
    },
    Other {
        name: String,
    },
}

fn default_fill_by_first_y() -> bool {
    true
}

fn default_id_step() -> DetectorId {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_detector_numbering() {
        let bank = RectangularBank::new("bank1", 8, 4, 1000).unwrap();
        assert_eq!(bank.detector_id(0, 0), Some(1000));
        assert_eq!(bank.detector_id(0, 3), Some(1003));
        assert_eq!(bank.detector_id(1, 0), Some(1004));
        assert_eq!(bank.detector_id(7, 3), Some(1031));
    }

    #[test]
    fn test_row_major_numbering() {
        let mut bank = RectangularBank::new("bank1", 8, 4, 0).unwrap();
        bank.id_fill_by_first_y = false;
        bank.id_step_by_row = 8;
        assert_eq!(bank.detector_id(1, 0), Some(1));
        assert_eq!(bank.detector_id(0, 1), Some(8));
    }

    #[test]
    fn test_detector_ids_past_i32_are_rejected() {
        let err = RectangularBank::new("bank1", 2, 2, DetectorId::MAX - 1).unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)), "{err}");

        let json = r#"{
            "time_of_flight": [0.0, 1.0],
            "components": [
                {"type": "rectangular", "name": "b", "x_pixels": 2, "y_pixels": 2,
                 "id_start": 2147483646}
            ]
        }"#;
        assert!(matches!(
            Workspace::from_json(json),
            Err(Error::InvalidModel(_))
        ));

        let mut bank = RectangularBank::new("bank1", 2, 2, 0).unwrap();
        bank.id_start = DetectorId::MAX;
        assert_eq!(bank.detector_id(0, 0), Some(DetectorId::MAX));
        assert_eq!(bank.detector_id(1, 1), None);
        assert!(bank.validate().is_err());
    }

    #[test]
    fn test_spectrum_rows() {
        let mut ws = Workspace::new(vec![0.0, 1.0, 2.0], 2).unwrap();
        let row = ws.add_spectrum(&[5, 6], &[1.0, 2.0], &[0.1, 0.2]).unwrap();
        assert_eq!(row, 0);
        assert_eq!(ws.row_index(6), Some(0));
        assert_eq!(ws.row_index(7), None);
        assert_eq!(ws.counts(0), &[1.0, 2.0]);
        assert_eq!(ws.errors(0), &[0.1, 0.2]);
    }

    #[test]
    fn test_spectrum_validation() {
        let mut ws = Workspace::new(vec![0.0, 1.0, 2.0], 2).unwrap();
        assert!(ws.add_spectrum(&[1], &[1.0], &[1.0]).is_err());
        ws.add_spectrum(&[1], &[1.0, 1.0], &[1.0, 1.0]).unwrap();
        assert!(ws.add_spectrum(&[1], &[1.0, 1.0], &[1.0, 1.0]).is_err());
        assert!(Workspace::new(vec![0.0], 3).is_err());
    }

    #[test]
    fn test_non_rectangular_component_is_not_a_bank() {
        let mut ws = Workspace::new(vec![0.0, 1.0], 1).unwrap();
        ws.add_component("monitor1");
        ws.add_rectangular_bank(RectangularBank::new("bank1", 2, 2, 0).unwrap());
        assert!(ws.rectangular_bank("monitor1").is_none());
        assert!(ws.rectangular_bank("bank2").is_none());
        assert_eq!(
            ws.rectangular_bank("bank1").map(RectangularBank::geometry),
            Some(BankGeometry {
                x_pixels: 2,
                y_pixels: 2
            })
        );
    }

    #[test]
    fn test_json_loading() {
        let json = r#"{
            "time_of_flight": [0.0, 10.0, 20.0],
            "spectra": [
                {"detector_ids": [0], "counts": [4.0, 9.0]},
                {"detector_ids": [1], "counts": [1.0, 2.0], "errors": [0.5, 0.5]}
            ],
            "components": [
                {"type": "rectangular", "name": "bank1", "x_pixels": 1, "y_pixels": 2},
                {"type": "other", "name": "monitor1"}
            ]
        }"#;

        let ws = Workspace::from_json(json).expect("Failed to parse JSON");
        assert_eq!(ws.bin_count(), 2);
        assert_eq!(ws.row_count(), 2);
        assert_relative_eq!(ws.errors(0)[0], 2.0);
        assert_relative_eq!(ws.errors(0)[1], 3.0);
        assert_relative_eq!(ws.errors(1)[0], 0.5);

        let bank = ws.rectangular_bank("bank1").unwrap();
        assert_eq!(bank.detector_id(0, 1), Some(1));
        assert!(ws.rectangular_bank("monitor1").is_none());
    }

    #[test]
    fn test_json_row_major_bank_defaults_step_by_row_to_x() {
        let json = r#"{
            "time_of_flight": [0.0, 1.0],
            "components": [
                {"type": "rectangular", "name": "b", "x_pixels": 3, "y_pixels": 2,
                 "id_start": 100, "id_fill_by_first_y": false}
            ]
        }"#;
        let ws = Workspace::from_json(json).unwrap();
        let bank = ws.rectangular_bank("b").unwrap();
        assert_eq!(bank.detector_id(2, 1), Some(105));
    }

    #[test]
    fn test_json_rejects_inconsistent_rows() {
        let json = r#"{
            "time_of_flight": [0.0, 1.0, 2.0],
            "spectra": [
                {"detector_ids": [0], "counts": [1.0, 2.0]},
                {"detector_ids": [1], "counts": [1.0]}
            ]
        }"#;
        let err = Workspace::from_json(json).unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)));
    }
}
