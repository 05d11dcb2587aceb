pub mod acquisition;
pub mod backup;
pub mod batch;
pub mod cube;
pub mod fetcher;
mod parser;
pub mod selection;
pub mod types;

#[cfg(test)]
mod testing;

pub use acquisition::{AcquisitionController, AcquisitionError, Acquired, Prompter};
pub use backup::BackupStore;
pub use cube::CubeBuilder;
pub use fetcher::{PageFetcher, PageSource, SourceConfig};
pub use parser::{NormalPeriod, ParseError, YearLink, parse_index, parse_table};
pub use types::{AcquisitionConfig, DataKind, Grid, Variable, WeatherCube};

/// Directory holding the territorial temperature and precipitation pages.
pub const BASE_URL: &str = "https://www.chmi.cz/files/portal/docs/meteo/ok";

/// Calendar year of time index 0 in every cube.
pub const FIRST_YEAR: i32 = 1961;
