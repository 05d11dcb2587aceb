use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Regions per table, index 0 being the national aggregate.
pub const REGION_COUNT: usize = 14;
/// Physical rows each region spans, one per [`Variable`].
pub const ROWS_PER_REGION: usize = 3;
/// Region name, variable label, 12 months, annual total.
pub const COLUMN_COUNT: usize = 15;
pub const LOGICAL_ROWS: usize = 1 + REGION_COUNT;
pub const PHYSICAL_ROWS: usize = 1 + REGION_COUNT * ROWS_PER_REGION;
/// Column of January; December is `FIRST_MONTH_COLUMN + 11`.
pub const FIRST_MONTH_COLUMN: usize = 2;
pub const ANNUAL_COLUMN: usize = COLUMN_COUNT - 1;

#[derive(Debug, thiserror::Error)]
#[error("Invalid data kind '{0}'. Accepted values: 'temper', 'temperature', 't', 'precip', 'precipitation', 'p'")]
pub struct DataKindParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Temperature,
    Precipitation,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Temperature, DataKind::Precipitation];

    pub fn slug(&self) -> &'static str {
        match self {
            DataKind::Temperature => "temper",
            DataKind::Precipitation => "precip",
        }
    }

    /// Index page path relative to [`crate::BASE_URL`].
    pub fn index_path(&self) -> &'static str {
        match self {
            DataKind::Temperature => "/uzemni_teploty_cs.html",
            DataKind::Precipitation => "/uzemni_srazky_cs.html",
        }
    }
}

impl FromStr for DataKind {
    type Err = DataKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temper" | "temperature" | "t" => Ok(DataKind::Temperature),
            "precip" | "precipitation" | "p" => Ok(DataKind::Precipitation),
            _ => Err(DataKindParseError(s.to_string())),
        }
    }
}

impl Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Temperature => write!(f, "Temperature"),
            DataKind::Precipitation => write!(f, "Precipitation"),
        }
    }
}

/// The three physical rows of a region, in upstream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Actual,
    PercentOfNormal,
    Normal,
}

impl Variable {
    pub const ALL: [Variable; ROWS_PER_REGION] =
        [Variable::Actual, Variable::PercentOfNormal, Variable::Normal];

    pub fn offset(&self) -> usize {
        match self {
            Variable::Actual => 0,
            Variable::PercentOfNormal => 1,
            Variable::Normal => 2,
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variable::Actual => write!(f, "actual"),
            Variable::PercentOfNormal => write!(f, "percent of normal"),
            Variable::Normal => write!(f, "normal"),
        }
    }
}

pub fn physical_row(region: usize, variable: Variable) -> usize {
    1 + region * ROWS_PER_REGION + variable.offset()
}

/// Parses an upstream cell that uses a decimal comma.
pub fn parse_decimal(cell: &str) -> Option<f64> {
    let normalized = cell.trim().replace(',', ".").replace('\u{2212}', "-");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("Grid {index} has {rows} rows of width {cols:?}, expected 43 rows of width 15")]
    Grid {
        index: usize,
        rows: usize,
        cols: Option<usize>,
    },
    #[error("{years} year labels for {slices} time slices")]
    Length { years: usize, slices: usize },
    #[error("Expected {expected} cells, found {found}")]
    Cells { expected: usize, found: usize },
}

/// One parsed part table: a header skeleton followed by three rows per region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    pub fn physical_rows(&self) -> usize {
        self.rows.len()
    }

    /// Common row width, `None` when rows are ragged or the grid is empty.
    pub fn width(&self) -> Option<usize> {
        let first = self.rows.first()?.len();
        self.rows.iter().all(|r| r.len() == first).then_some(first)
    }

    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    pub fn logical_rows(&self) -> usize {
        match self.rows.len() {
            0 => 0,
            n => 1 + (n - 1) / ROWS_PER_REGION,
        }
    }

    /// Row 0 is the header; row `r > 0` is the variable triplet of region `r - 1`.
    pub fn logical_row(&self, row: usize) -> Option<&[Vec<String>]> {
        if row == 0 {
            return self.rows.get(..1);
        }
        let start = physical_row(row - 1, Variable::Actual);
        self.rows.get(start..start + ROWS_PER_REGION)
    }

    pub fn region_row(&self, region: usize, variable: Variable) -> Option<&[String]> {
        if region >= REGION_COUNT {
            return None;
        }
        self.rows
            .get(physical_row(region, variable))
            .map(Vec::as_slice)
    }

    pub fn is_regular(&self) -> bool {
        self.rows.len() == PHYSICAL_ROWS && self.width() == Some(COLUMN_COUNT)
    }
}

/// Stacked part tables along a leading time axis: `(time, PHYSICAL_ROWS, COLUMN_COUNT)`.
///
/// Time index `t` holds calendar year `years[t]`; the builder guarantees the
/// years start at [`crate::FIRST_YEAR`] and have no gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherCube {
    kind: DataKind,
    years: Vec<i32>,
    cells: Vec<String>,
}

impl WeatherCube {
    const SLICE_LEN: usize = PHYSICAL_ROWS * COLUMN_COUNT;

    pub fn from_grids(kind: DataKind, years: Vec<i32>, grids: Vec<Grid>) -> Result<Self, ShapeError> {
        if years.len() != grids.len() {
            return Err(ShapeError::Length {
                years: years.len(),
                slices: grids.len(),
            });
        }

        let mut cells = Vec::with_capacity(grids.len() * Self::SLICE_LEN);
        for (index, grid) in grids.into_iter().enumerate() {
            if !grid.is_regular() {
                return Err(ShapeError::Grid {
                    index,
                    rows: grid.physical_rows(),
                    cols: grid.width(),
                });
            }
            cells.extend(grid.into_rows().into_iter().flatten());
        }

        Ok(Self { kind, years, cells })
    }

    pub(crate) fn from_cells(
        kind: DataKind,
        years: Vec<i32>,
        cells: Vec<String>,
    ) -> Result<Self, ShapeError> {
        let expected = years.len() * Self::SLICE_LEN;
        if cells.len() != expected {
            return Err(ShapeError::Cells {
                expected,
                found: cells.len(),
            });
        }
        Ok(Self { kind, years, cells })
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn years(&self) -> &[i32] {
        &self.years
    }

    pub(crate) fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn time_len(&self) -> usize {
        self.years.len()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.time_len(), PHYSICAL_ROWS, COLUMN_COUNT)
    }

    pub fn first_year(&self) -> Option<i32> {
        self.years.first().copied()
    }

    pub fn last_year(&self) -> Option<i32> {
        self.years.last().copied()
    }

    pub fn year_at(&self, time: usize) -> Option<i32> {
        self.years.get(time).copied()
    }

    /// Time index of `year`, i.e. `year - first_year` when in range.
    pub fn year_index(&self, year: i32) -> Option<usize> {
        let offset = usize::try_from(year - self.first_year()?).ok()?;
        (offset < self.time_len()).then_some(offset)
    }

    pub fn cell(&self, time: usize, row: usize, col: usize) -> Option<&str> {
        if time >= self.time_len() || row >= PHYSICAL_ROWS || col >= COLUMN_COUNT {
            return None;
        }
        let idx = time * Self::SLICE_LEN + row * COLUMN_COUNT + col;
        self.cells.get(idx).map(String::as_str)
    }

    pub fn region_cell(
        &self,
        time: usize,
        region: usize,
        variable: Variable,
        col: usize,
    ) -> Option<&str> {
        if region >= REGION_COUNT {
            return None;
        }
        self.cell(time, physical_row(region, variable), col)
    }

    /// Numeric value of a cell, `None` for labels and empty cells.
    pub fn value(&self, time: usize, row: usize, col: usize) -> Option<f64> {
        self.cell(time, row, col).and_then(parse_decimal)
    }

    pub fn slice(&self, time: usize) -> Option<Grid> {
        if time >= self.time_len() {
            return None;
        }
        let start = time * Self::SLICE_LEN;
        let rows = self.cells[start..start + Self::SLICE_LEN]
            .chunks(COLUMN_COUNT)
            .map(<[String]>::to_vec)
            .collect();
        Some(Grid::new(rows))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquisitionConfig {
    pub online: bool,
    pub want_temperature: bool,
    pub want_precipitation: bool,
    pub parallel: bool,
}

impl AcquisitionConfig {
    pub fn requested_kinds(&self) -> Vec<DataKind> {
        DataKind::ALL
            .into_iter()
            .filter(|kind| self.wants(*kind))
            .collect()
    }

    pub fn wants(&self, kind: DataKind) -> bool {
        match kind {
            DataKind::Temperature => self.want_temperature,
            DataKind::Precipitation => self.want_precipitation,
        }
    }
}
