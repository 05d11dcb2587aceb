use indicatif::ProgressBar;

use crate::backup::{BackupError, BackupStore};
use crate::cube::{CubeBuilder, CubeError};
use crate::fetcher::{FetchError, PageSource};
use crate::types::{AcquisitionConfig, DataKind, WeatherCube};

/// Yes/no answers the acquisition flow needs from the user.
pub trait Prompter {
    /// The backup directory does not exist; create it?
    fn create_backup_dir(&mut self) -> bool;
    /// A backup of `kind` exists; fetch live anyway?
    fn continue_online(&mut self, kind: DataKind) -> bool;
    /// Replace the existing backup of `kind` with the live data?
    fn overwrite_backup(&mut self, kind: DataKind) -> bool;
    /// No backup of `kind` exists; write one from the live data?
    fn create_backup(&mut self, kind: DataKind) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Fetch live, write a fresh backup.
    FetchAndStore,
    /// Fetch live, destroy the old backup, write the new one.
    FetchStoreOverwrite,
    /// Fetch live, leave backups alone.
    FetchOnly,
    /// Fetch live; there is no backup directory.
    FetchNoBackupDir,
    /// Read the existing backup, no network.
    LoadBackup,
}

impl Action {
    pub fn is_live(&self) -> bool {
        !matches!(self, Action::LoadBackup)
    }
}

/// What is on disk when the acquisition starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackupState {
    pub dir_exists: bool,
    pub temperature: bool,
    pub precipitation: bool,
}

impl BackupState {
    pub fn snapshot(store: &BackupStore) -> Self {
        Self {
            dir_exists: store.dir_exists(),
            temperature: store.has_backup(DataKind::Temperature),
            precipitation: store.has_backup(DataKind::Precipitation),
        }
    }

    pub fn has(&self, kind: DataKind) -> bool {
        self.dir_exists
            && match kind {
                DataKind::Temperature => self.temperature,
                DataKind::Precipitation => self.precipitation,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub create_dir: bool,
    pub steps: Vec<(DataKind, Action)>,
}

impl Plan {
    pub fn needs_directory(&self) -> bool {
        self.create_dir
    }

    pub fn needs_network(&self) -> bool {
        self.steps.iter().any(|(_, action)| action.is_live())
    }

    pub fn action(&self, kind: DataKind) -> Option<Action> {
        self.steps
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, action)| *action)
    }
}

fn join_kinds(kinds: &[DataKind]) -> String {
    kinds
        .iter()
        .map(|k| k.to_string().to_lowercase())
        .collect::<Vec<_>>()
        .join(" and ")
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Nothing requested: select temperature and/or precipitation")]
    NothingRequested,
    #[error("No {} data available: offline and no backup found", join_kinds(.0))]
    NoDataAvailable(Vec<DataKind>),
    #[error("Data source unavailable: {0}")]
    SourceUnavailable(#[source] FetchError),
    #[error("Failed to build {kind} cube: {source}")]
    Cube { kind: DataKind, source: CubeError },
    #[error(transparent)]
    Backup(#[from] BackupError),
}

/// Decides one action per requested kind.
///
/// Only asks `prompter` the questions the current state makes relevant, and
/// the directory question at most once.
pub fn plan(
    config: &AcquisitionConfig,
    state: &BackupState,
    prompter: &mut dyn Prompter,
) -> Result<Plan, AcquisitionError> {
    let kinds = config.requested_kinds();
    if kinds.is_empty() {
        return Err(AcquisitionError::NothingRequested);
    }

    if !config.online {
        let missing: Vec<DataKind> = kinds.iter().copied().filter(|k| !state.has(*k)).collect();
        if !missing.is_empty() {
            return Err(AcquisitionError::NoDataAvailable(missing));
        }
        return Ok(Plan {
            create_dir: false,
            steps: kinds.into_iter().map(|k| (k, Action::LoadBackup)).collect(),
        });
    }

    if !state.dir_exists {
        let create_dir = prompter.create_backup_dir();
        let action = if create_dir {
            Action::FetchAndStore
        } else {
            Action::FetchNoBackupDir
        };
        return Ok(Plan {
            create_dir,
            steps: kinds.into_iter().map(|k| (k, action)).collect(),
        });
    }

    let steps = kinds
        .into_iter()
        .map(|kind| {
            let action = if state.has(kind) {
                if !prompter.continue_online(kind) {
                    Action::LoadBackup
                } else if prompter.overwrite_backup(kind) {
                    Action::FetchStoreOverwrite
                } else {
                    Action::FetchOnly
                }
            } else if prompter.create_backup(kind) {
                Action::FetchAndStore
            } else {
                Action::FetchOnly
            };
            (kind, action)
        })
        .collect();

    Ok(Plan {
        create_dir: false,
        steps,
    })
}

/// The finished cubes of one acquisition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquired {
    pub temperature: Option<WeatherCube>,
    pub precipitation: Option<WeatherCube>,
}

impl Acquired {
    pub fn get(&self, kind: DataKind) -> Option<&WeatherCube> {
        match kind {
            DataKind::Temperature => self.temperature.as_ref(),
            DataKind::Precipitation => self.precipitation.as_ref(),
        }
    }

    fn insert(&mut self, cube: WeatherCube) {
        match cube.kind() {
            DataKind::Temperature => self.temperature = Some(cube),
            DataKind::Precipitation => self.precipitation = Some(cube),
        }
    }

    pub fn cubes(&self) -> impl Iterator<Item = &WeatherCube> {
        self.temperature.iter().chain(self.precipitation.iter())
    }
}

type ProgressFactory = Box<dyn Fn(DataKind) -> ProgressBar + Send + Sync>;

/// Chooses between live data and the backup, and keeps the backup current.
pub struct AcquisitionController<S> {
    builder: CubeBuilder<S>,
    store: BackupStore,
    progress: ProgressFactory,
}

impl<S: PageSource> AcquisitionController<S> {
    pub fn new(builder: CubeBuilder<S>, store: BackupStore) -> Self {
        Self {
            builder,
            store,
            progress: Box::new(|_| ProgressBar::hidden()),
        }
    }

    /// Progress bar used for each kind's batch.
    pub fn with_progress(
        mut self,
        progress: impl Fn(DataKind) -> ProgressBar + Send + Sync + 'static,
    ) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn builder(&self) -> &CubeBuilder<S> {
        &self.builder
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    pub async fn acquire(
        &self,
        config: &AcquisitionConfig,
        prompter: &mut dyn Prompter,
    ) -> Result<Acquired, AcquisitionError> {
        let state = BackupState::snapshot(&self.store);
        let plan = plan(config, &state, prompter)?;
        log::debug!("Acquisition plan: {:?}", plan);

        if plan.needs_network() {
            self.check_source().await?;
        }
        if plan.needs_directory() {
            self.store.create_dir()?;
        }

        let mut acquired = Acquired::default();
        for &(kind, action) in &plan.steps {
            log::info!("{}: {:?}", kind, action);
            acquired.insert(self.execute(kind, action, config.parallel).await?);
        }
        Ok(acquired)
    }

    async fn check_source(&self) -> Result<(), AcquisitionError> {
        for kind in DataKind::ALL {
            let url = self.builder.config().index_url(kind);
            self.builder
                .source()
                .probe(&url)
                .await
                .map_err(AcquisitionError::SourceUnavailable)?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        kind: DataKind,
        action: Action,
        parallel: bool,
    ) -> Result<WeatherCube, AcquisitionError> {
        if action == Action::LoadBackup {
            return self
                .store
                .read(kind)?
                .ok_or_else(|| AcquisitionError::NoDataAvailable(vec![kind]));
        }

        let progress = (self.progress)(kind);
        let cube = self
            .builder
            .build_cube(kind, parallel, &progress)
            .await
            .map_err(|source| AcquisitionError::Cube { kind, source })?;

        match action {
            Action::FetchAndStore => self.store.write(&cube)?,
            Action::FetchStoreOverwrite => self.store.overwrite(&cube)?,
            _ => log::info!("Not writing a {} backup", kind),
        }
        Ok(cube)
    }
}
