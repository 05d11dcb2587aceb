use std::collections::HashSet;

use indicatif::ProgressBar;

use crate::FIRST_YEAR;
use crate::batch::{BatchError, BatchFetcher};
use crate::fetcher::{FetchError, PageSource, SourceConfig};
use crate::parser::{NormalPeriod, ParseError, parse_index, part_url};
use crate::types::{DataKind, Grid, ShapeError, WeatherCube};

#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("Failed to fetch index page {url}: {source}")]
    Index { url: String, source: FetchError },
    #[error("Failed to parse index page: {0}")]
    IndexParse(#[from] ParseError),
    #[error("Year links break calendar order at position {position}: expected {expected}, found {found}")]
    YearGap {
        position: usize,
        expected: i32,
        found: i32,
    },
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("Parts do not stack into a cube: {0}")]
    Shape(#[from] ShapeError),
}

/// Checks that `years` runs from [`FIRST_YEAR`] upwards without gaps.
pub fn check_contiguous(years: &[i32]) -> Result<(), CubeError> {
    let mut expected = FIRST_YEAR;
    for (position, &found) in years.iter().enumerate() {
        if found != expected {
            return Err(CubeError::YearGap {
                position,
                expected,
                found,
            });
        }
        expected += 1;
    }
    Ok(())
}

/// Calendar placement of parts listed in document order.
///
/// The index lists the newest normal period first and repeats years across
/// periods. The first occurrence of a year wins; later ones are fetched but
/// not stacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeAxis {
    years: Vec<i32>,
    placement: Vec<Option<usize>>,
}

impl TimeAxis {
    pub fn from_document_order(years: &[i32]) -> Result<Self, CubeError> {
        let mut seen = HashSet::new();
        let firsts: Vec<bool> = years.iter().map(|year| seen.insert(*year)).collect();

        let mut calendar: Vec<i32> = seen.into_iter().collect();
        calendar.sort_unstable();
        check_contiguous(&calendar)?;

        let placement = years
            .iter()
            .zip(firsts)
            .map(|(&year, first)| first.then(|| (year - FIRST_YEAR) as usize))
            .collect();
        Ok(Self {
            years: calendar,
            placement,
        })
    }

    /// Unique calendar years, ascending from [`FIRST_YEAR`].
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    pub fn duplicates(&self) -> usize {
        self.placement.len() - self.years.len()
    }

    /// Time index of each part in document order, `None` for a repeated year.
    pub fn placement(&self) -> &[Option<usize>] {
        &self.placement
    }

    /// Puts grids fetched in document order into calendar order.
    pub fn arrange(&self, grids: Vec<Grid>) -> Vec<Grid> {
        let mut slots: Vec<Option<Grid>> = vec![None; self.years.len()];
        for (grid, slot) in grids.into_iter().zip(&self.placement) {
            if let Some(t) = slot {
                slots[*t] = Some(grid);
            }
        }
        slots.into_iter().flatten().collect()
    }
}

/// Discovers the part pages of a data kind and stacks them into a cube.
#[derive(Debug, Clone)]
pub struct CubeBuilder<S> {
    batch: BatchFetcher<S>,
    config: SourceConfig,
}

impl<S: PageSource> CubeBuilder<S> {
    pub fn new(source: S, config: SourceConfig, workers: usize) -> Self {
        Self {
            batch: BatchFetcher::new(source, workers),
            config,
        }
    }

    pub fn source(&self) -> &S {
        self.batch.source()
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub async fn discover(&self, kind: DataKind) -> Result<Vec<NormalPeriod>, CubeError> {
        let url = self.config.index_url(kind);
        log::info!("Fetching {} index: {}", kind, url);

        let page = match self.source().fetch_page(&url, 0).await {
            Ok(page) => page,
            Err(source) => return Err(CubeError::Index { url, source }),
        };
        let periods = parse_index(&page.html)?;

        for period in &periods {
            if let Some((min, max)) = period.year_span() {
                log::info!(
                    "{} [{}]: {} part(s), years {}-{}",
                    kind,
                    period.label,
                    period.links.len(),
                    min,
                    max
                );
            }
        }
        Ok(periods)
    }

    /// Year and absolute url of every part, in document order.
    pub fn part_urls(&self, periods: &[NormalPeriod]) -> Vec<(i32, String)> {
        periods
            .iter()
            .flat_map(|p| &p.links)
            .map(|link| (link.year, part_url(&self.config.base_url, &link.href)))
            .collect()
    }

    pub async fn build_cube(
        &self,
        kind: DataKind,
        parallel: bool,
        progress: &ProgressBar,
    ) -> Result<WeatherCube, CubeError> {
        let periods = self.discover(kind).await?;
        let (years, urls): (Vec<i32>, Vec<String>) =
            self.part_urls(&periods).into_iter().unzip();
        let axis = TimeAxis::from_document_order(&years)?;
        if axis.duplicates() > 0 {
            log::info!(
                "{} {} part(s) repeat a year listed under a newer normal period",
                axis.duplicates(),
                kind
            );
        }

        log::info!(
            "Fetching {} {} part(s) {}",
            urls.len(),
            kind,
            if parallel {
                format!("with {} workers", self.batch.workers())
            } else {
                "sequentially".to_string()
            }
        );
        let grids = self.batch.fetch_all(&urls, parallel, progress).await?;
        let cube = WeatherCube::from_grids(kind, axis.years().to_vec(), axis.arrange(grids))?;

        log::info!(
            "Built {} cube with {} time slice(s)",
            kind,
            cube.time_len()
        );
        Ok(cube)
    }
}
