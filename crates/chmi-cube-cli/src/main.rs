mod prompt;

use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Duration;

use chmi_cube::backup::{BackupInfo, DEFAULT_BACKUP_DIR};
use chmi_cube::batch::default_workers;
use chmi_cube::selection::{RegionSelection, YearSelection};
use chmi_cube::types::{ANNUAL_COLUMN, FIRST_MONTH_COLUMN, physical_row};
use chmi_cube::{
    AcquisitionConfig, AcquisitionController, BackupStore, CubeBuilder, DataKind, PageFetcher,
    Prompter, SourceConfig, Variable, WeatherCube,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use serde::Serialize;

use crate::prompt::{FixedPrompter, TerminalPrompter};

#[derive(Parser)]
#[command(name = "chmi-cube")]
#[command(about = "CHMI territorial temperature and precipitation downloader", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        long,
        env = "CHMI_BACKUP_DIR",
        default_value = DEFAULT_BACKUP_DIR,
        global = true,
        help = "Directory holding the backup files"
    )]
    backup_dir: PathBuf,

    #[arg(
        long,
        default_value = chmi_cube::BASE_URL,
        global = true,
        help = "Base URL of the territorial data pages"
    )]
    base_url: String,

    #[arg(
        long,
        default_value_t = 60,
        global = true,
        help = "Per-request timeout in seconds"
    )]
    timeout_secs: u64,

    #[arg(
        long,
        global = true,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Concurrent fetch workers [default: CPU count + 4, at most 32]"
    )]
    workers: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariableArg {
    Actual,
    Percent,
    Normal,
}

impl From<VariableArg> for Variable {
    fn from(arg: VariableArg) -> Self {
        match arg {
            VariableArg::Actual => Variable::Actual,
            VariableArg::Percent => Variable::PercentOfNormal,
            VariableArg::Normal => Variable::Normal,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct SessionArgs {
    #[arg(long, help = "Use only the backup, never the network")]
    offline: bool,

    #[arg(long, help = "Fetch parts one at a time instead of concurrently")]
    sequential: bool,

    #[arg(
        short = 'y',
        long,
        conflicts_with = "assume_no",
        help = "Answer yes to every question"
    )]
    assume_yes: bool,

    #[arg(short = 'n', long, help = "Answer no to every question")]
    assume_no: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the requested cubes from the live site or the backup
    Fetch {
        #[arg(long, help = "Acquire temperature data")]
        temperature: bool,

        #[arg(long, help = "Acquire precipitation data")]
        precipitation: bool,

        #[command(flatten)]
        session: SessionArgs,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Print selected years and regions of one cube
    Show {
        #[arg(
            long,
            value_parser = parse_kind,
            help = "Data kind: temper or precip"
        )]
        kind: DataKind,

        #[arg(long, help = "Years, e.g. '2000', '1990-2000', '1982, 1984, 1986-1988'")]
        years: Option<String>,

        #[arg(long, help = "Regions 0-13, e.g. '5', '0-3', '0, 1, 10-13'")]
        regions: Option<String>,

        #[arg(long, value_enum, default_value = "actual", help = "Row of each region to print")]
        variable: VariableArg,

        #[arg(long, help = "Fetch live data instead of reading the backup")]
        online: bool,

        #[command(flatten)]
        session: SessionArgs,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Describe the backup files without loading them
    BackupInfo {
        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

fn parse_kind(s: &str) -> Result<DataKind, String> {
    DataKind::from_str(s).map_err(|e| e.to_string())
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

#[derive(Serialize)]
struct CubeSummary {
    kind: DataKind,
    first_year: Option<i32>,
    last_year: Option<i32>,
    shape: (usize, usize, usize),
}

impl From<&WeatherCube> for CubeSummary {
    fn from(cube: &WeatherCube) -> Self {
        Self {
            kind: cube.kind(),
            first_year: cube.first_year(),
            last_year: cube.last_year(),
            shape: cube.shape(),
        }
    }
}

#[derive(Serialize)]
struct RegionRow {
    year: i32,
    region: usize,
    name: String,
    variable: Variable,
    months: Vec<Option<f64>>,
    annual: Option<f64>,
}

#[derive(Serialize)]
struct BackupEntry {
    kind: DataKind,
    path: PathBuf,
    info: Option<BackupInfo>,
}

fn progress_bar(kind: DataKind) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} parts ({percent}%) {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(kind.to_string());
    pb
}

fn controller(cli: &Cli) -> AcquisitionController<PageFetcher> {
    let mut source_config = SourceConfig::with_base_url(cli.base_url.as_str());
    source_config.timeout = Duration::from_secs(cli.timeout_secs);

    let fetcher = PageFetcher::new(source_config.clone()).unwrap_or_else(|e| {
        log::error!("Error creating page fetcher: {}", e);
        process::exit(1);
    });
    let workers = cli.workers.map(usize::from).unwrap_or_else(default_workers);

    AcquisitionController::new(
        CubeBuilder::new(fetcher, source_config, workers),
        BackupStore::new(&cli.backup_dir),
    )
    .with_progress(progress_bar)
}

fn prompter(session: &SessionArgs, backup_dir: &Path) -> Box<dyn Prompter> {
    if session.assume_yes {
        Box::new(FixedPrompter(true))
    } else if session.assume_no {
        Box::new(FixedPrompter(false))
    } else {
        Box::new(TerminalPrompter::new(backup_dir))
    }
}

fn region_rows(
    cube: &WeatherCube,
    times: &[usize],
    regions: &[usize],
    variable: Variable,
) -> Vec<RegionRow> {
    let mut rows = Vec::with_capacity(times.len() * regions.len());
    for &t in times {
        let Some(year) = cube.year_at(t) else {
            continue;
        };
        for &region in regions {
            let row = physical_row(region, variable);
            rows.push(RegionRow {
                year,
                region,
                name: cube
                    .region_cell(t, region, Variable::Actual, 0)
                    .unwrap_or_default()
                    .to_string(),
                variable,
                months: (FIRST_MONTH_COLUMN..ANNUAL_COLUMN)
                    .map(|col| cube.value(t, row, col))
                    .collect(),
                annual: cube.value(t, row, ANNUAL_COLUMN),
            });
        }
    }
    rows
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match &cli.command {
        Commands::Fetch {
            temperature,
            precipitation,
            session,
            format,
        } => {
            let config = AcquisitionConfig {
                online: !session.offline,
                want_temperature: *temperature,
                want_precipitation: *precipitation,
                parallel: !session.sequential,
            };
            let mut prompter = prompter(session, &cli.backup_dir);

            let acquired = controller(&cli)
                .acquire(&config, prompter.as_mut())
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error acquiring data: {}", e);
                    process::exit(1);
                });

            let summaries: Vec<CubeSummary> = acquired.cubes().map(CubeSummary::from).collect();
            match format {
                OutputFormat::Json => serialize_json(&summaries),
                OutputFormat::Text => {
                    for summary in &summaries {
                        let (t, rows, cols) = summary.shape;
                        println!(
                            "{}: {} year(s) {}-{}, shape {}x{}x{}",
                            summary.kind,
                            t,
                            summary.first_year.unwrap_or_default(),
                            summary.last_year.unwrap_or_default(),
                            t,
                            rows,
                            cols
                        );
                    }
                }
            }
        }

        Commands::Show {
            kind,
            years,
            regions,
            variable,
            online,
            session,
            format,
        } => {
            let regions = regions
                .as_deref()
                .map(RegionSelection::parse)
                .unwrap_or_else(|| Ok(RegionSelection::all()))
                .unwrap_or_else(|e| {
                    log::error!("Invalid args: {e}");
                    process::exit(1);
                });
            let years = years
                .as_deref()
                .map(YearSelection::parse)
                .transpose()
                .unwrap_or_else(|e| {
                    log::error!("Invalid args: {e}");
                    process::exit(1);
                });

            let config = AcquisitionConfig {
                online: *online && !session.offline,
                want_temperature: *kind == DataKind::Temperature,
                want_precipitation: *kind == DataKind::Precipitation,
                parallel: !session.sequential,
            };
            let mut prompter = prompter(session, &cli.backup_dir);

            let acquired = controller(&cli)
                .acquire(&config, prompter.as_mut())
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error acquiring data: {}", e);
                    process::exit(1);
                });
            let Some(cube) = acquired.get(*kind) else {
                log::error!("No {} cube was acquired", kind);
                process::exit(1);
            };

            let years = years.unwrap_or_else(|| YearSelection::all(cube));
            let times = years.time_indices(cube).unwrap_or_else(|e| {
                log::error!("Invalid args: {e}");
                process::exit(1);
            });
            let rows = region_rows(cube, &times, regions.regions(), (*variable).into());

            match format {
                OutputFormat::Json => serialize_json(&rows),
                OutputFormat::Text => {
                    if rows.is_empty() {
                        println!("No entries to display.");
                    }
                    for row in &rows {
                        let values: Vec<String> = row
                            .months
                            .iter()
                            .chain(std::iter::once(&row.annual))
                            .map(|v| format!("{:>7}", format_value(*v)))
                            .collect();
                        println!(
                            "{} {:>2} {:<28} {}",
                            row.year,
                            row.region,
                            row.name,
                            values.join("")
                        );
                    }
                }
            }
        }

        Commands::BackupInfo { format } => {
            let store = BackupStore::new(&cli.backup_dir);
            if !store.dir_exists() {
                log::warn!("Backup directory {} does not exist", store.dir().display());
            }

            let entries: Vec<BackupEntry> = DataKind::ALL
                .into_iter()
                .map(|kind| {
                    let info = store.info(kind).unwrap_or_else(|e| {
                        log::error!("Error reading {} backup: {}", kind, e);
                        process::exit(1);
                    });
                    BackupEntry {
                        kind,
                        path: store.path_for(kind),
                        info,
                    }
                })
                .collect();

            match format {
                OutputFormat::Json => serialize_json(&entries),
                OutputFormat::Text => {
                    for entry in &entries {
                        match &entry.info {
                            Some(info) => println!(
                                "{}: {} year(s) {}-{}, written {} ({})",
                                entry.kind,
                                info.time_len(),
                                info.years.first().copied().unwrap_or_default(),
                                info.years.last().copied().unwrap_or_default(),
                                info.created_at
                                    .with_timezone(&chrono::Local)
                                    .format("%Y-%m-%d %H:%M"),
                                entry.path.display()
                            ),
                            None => println!(
                                "{}: no backup ({})",
                                entry.kind,
                                entry.path.display()
                            ),
                        }
                    }
                }
            }
        }
    }
}
