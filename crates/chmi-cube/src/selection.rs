use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{REGION_COUNT, WeatherCube};

static YEAR_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}(-\d{4})?)(, *(\d{4}(-\d{4})?))*$").expect("Invalid year list regex")
});

static REGION_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}(-\d{1,2})?)(, *(\d{1,2}(-\d{1,2})?))*$")
        .expect("Invalid region list regex")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("Invalid year list '{0}' (e.g. '2000', '1990-2000', '1982, 1984, 1986-1988')")]
    YearSyntax(String),
    #[error("Invalid region list '{0}' (e.g. '5', '0-3', '0, 1, 10-13')")]
    RegionSyntax(String),
    #[error("Range {start}-{end} runs backwards")]
    Reversed { start: usize, end: usize },
    #[error("{0} is listed more than once")]
    Duplicate(usize),
    #[error("Years are not in ascending order at {0}")]
    NotAscending(i32),
    #[error("Region {0} does not exist, regions are numbered 0-13")]
    UnknownRegion(usize),
    #[error("Year {year} is outside the data ({first}-{last})")]
    YearOutOfRange { year: i32, first: i32, last: i32 },
    #[error("The cube holds no years")]
    EmptyCube,
}

/// Expands `a, b-c, ...` into its values, rejecting reversed ranges and duplicates.
fn expand(input: &str) -> Result<Vec<usize>, SelectionError> {
    let mut values = Vec::new();
    let mut seen = HashSet::new();

    for item in input.split(',').map(str::trim) {
        let (start, end) = match item.split_once('-') {
            Some((start, end)) => (start, end),
            None => (item, item),
        };
        // The caller's regex guarantees short digit runs here.
        let start: usize = start.parse().unwrap_or_default();
        let end: usize = end.parse().unwrap_or_default();
        if start > end {
            return Err(SelectionError::Reversed { start, end });
        }
        for value in start..=end {
            if !seen.insert(value) {
                return Err(SelectionError::Duplicate(value));
            }
            values.push(value);
        }
    }
    Ok(values)
}

/// Calendar years chosen by the user, strictly ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearSelection {
    years: Vec<i32>,
}

impl YearSelection {
    pub fn parse(input: &str) -> Result<Self, SelectionError> {
        let input = input.trim();
        if !YEAR_LIST_RE.is_match(input) {
            return Err(SelectionError::YearSyntax(input.to_string()));
        }

        let years: Vec<i32> = expand(input)?.into_iter().map(|y| y as i32).collect();
        if let Some(pair) = years.windows(2).find(|pair| pair[1] < pair[0]) {
            return Err(SelectionError::NotAscending(pair[1]));
        }
        Ok(Self { years })
    }

    /// Every year held by `cube`.
    pub fn all(cube: &WeatherCube) -> Self {
        Self {
            years: cube.years().to_vec(),
        }
    }

    pub fn years(&self) -> &[i32] {
        &self.years
    }

    /// Time indices of the selected years in `cube`.
    pub fn time_indices(&self, cube: &WeatherCube) -> Result<Vec<usize>, SelectionError> {
        let (first, last) = cube
            .first_year()
            .zip(cube.last_year())
            .ok_or(SelectionError::EmptyCube)?;
        self.years
            .iter()
            .map(|&year| {
                cube.year_index(year)
                    .ok_or(SelectionError::YearOutOfRange { year, first, last })
            })
            .collect()
    }
}

/// Region numbers chosen by the user, in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSelection {
    regions: Vec<usize>,
}

impl RegionSelection {
    pub fn parse(input: &str) -> Result<Self, SelectionError> {
        let input = input.trim();
        if !REGION_LIST_RE.is_match(input) {
            return Err(SelectionError::RegionSyntax(input.to_string()));
        }

        let regions = expand(input)?;
        if let Some(&region) = regions.iter().find(|&&r| r >= REGION_COUNT) {
            return Err(SelectionError::UnknownRegion(region));
        }
        Ok(Self { regions })
    }

    pub fn all() -> Self {
        Self {
            regions: (0..REGION_COUNT).collect(),
        }
    }

    pub fn regions(&self) -> &[usize] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataKind, tests::sample_grid};

    #[test]
    fn test_parse_years() {
        let selection = YearSelection::parse("1982, 1984, 1986-1988").unwrap();
        assert_eq!(selection.years(), &[1982, 1984, 1986, 1987, 1988]);

        assert_eq!(YearSelection::parse("2000").unwrap().years(), &[2000]);
        assert_eq!(
            YearSelection::parse("1990-1992,1995").unwrap().years(),
            &[1990, 1991, 1992, 1995]
        );
    }

    #[test]
    fn test_parse_years_rejects_bad_input() {
        assert!(matches!(
            YearSelection::parse("19"),
            Err(SelectionError::YearSyntax(_))
        ));
        assert!(matches!(
            YearSelection::parse("2000;2001"),
            Err(SelectionError::YearSyntax(_))
        ));
        assert_eq!(
            YearSelection::parse("1990-1995, 1993"),
            Err(SelectionError::Duplicate(1993))
        );
        assert_eq!(
            YearSelection::parse("2000, 1990"),
            Err(SelectionError::NotAscending(1990))
        );
        assert_eq!(
            YearSelection::parse("2000-1990"),
            Err(SelectionError::Reversed {
                start: 2000,
                end: 1990
            })
        );
    }

    #[test]
    fn test_parse_regions() {
        assert_eq!(
            RegionSelection::parse("0, 1, 10-13").unwrap().regions(),
            &[0, 1, 10, 11, 12, 13]
        );
        assert_eq!(RegionSelection::parse("5,2").unwrap().regions(), &[5, 2]);
        assert_eq!(RegionSelection::all().regions().len(), REGION_COUNT);

        assert_eq!(
            RegionSelection::parse("12-14"),
            Err(SelectionError::UnknownRegion(14))
        );
        assert_eq!(
            RegionSelection::parse("3, 3"),
            Err(SelectionError::Duplicate(3))
        );
        assert!(matches!(
            RegionSelection::parse("Praha"),
            Err(SelectionError::RegionSyntax(_))
        ));
    }

    #[test]
    fn test_time_indices() {
        let cube = WeatherCube::from_grids(
            DataKind::Precipitation,
            vec![1961, 1962, 1963, 1964],
            vec![
                sample_grid("a"),
                sample_grid("b"),
                sample_grid("c"),
                sample_grid("d"),
            ],
        )
        .unwrap();

        let selection = YearSelection::parse("1962-1963").unwrap();
        assert_eq!(selection.time_indices(&cube).unwrap(), vec![1, 2]);
        assert_eq!(
            YearSelection::all(&cube).time_indices(&cube).unwrap(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(
            YearSelection::parse("1964-1965").unwrap().time_indices(&cube),
            Err(SelectionError::YearOutOfRange {
                year: 1965,
                first: 1961,
                last: 1964
            })
        );
    }
}
