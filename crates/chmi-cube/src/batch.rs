use futures::{StreamExt, stream};
use indicatif::ProgressBar;

use crate::fetcher::{FetchError, PageSource};
use crate::parser::{ParseError, parse_table};
use crate::types::Grid;

#[derive(Debug, thiserror::Error)]
pub enum BatchFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("No grid was produced")]
    Missing,
}

/// The first failure of a batch; every other task of the batch was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("Batch cancelled at part {index} ({url}): {source}")]
pub struct BatchError {
    pub index: usize,
    pub url: String,
    pub source: BatchFailure,
}

impl BatchError {
    fn new(index: usize, url: &str, source: impl Into<BatchFailure>) -> Self {
        Self {
            index,
            url: url.to_string(),
            source: source.into(),
        }
    }

    pub fn is_connectivity_lost(&self) -> bool {
        matches!(
            self.source,
            BatchFailure::Fetch(FetchError::ConnectivityLost(_))
        )
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() + 4)
        .unwrap_or(8)
        .min(32)
}

#[derive(Debug, Clone)]
pub struct BatchFetcher<S> {
    source: S,
    workers: usize,
}

impl<S: PageSource> BatchFetcher<S> {
    pub fn new(source: S, workers: usize) -> Self {
        Self {
            source,
            workers: workers.max(1),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns one grid per url, in url order.
    ///
    /// `progress` gets its length set to `urls.len()` and is advanced once per
    /// completed part.
    pub async fn fetch_all(
        &self,
        urls: &[String],
        parallel: bool,
        progress: &ProgressBar,
    ) -> Result<Vec<Grid>, BatchError> {
        progress.set_length(urls.len() as u64);
        progress.set_position(0);

        let result = if parallel {
            self.fetch_concurrent(urls, progress).await
        } else {
            self.fetch_sequential(urls, progress).await
        };

        match &result {
            Ok(_) => progress.finish(),
            Err(_) => progress.abandon(),
        }
        result
    }

    async fn fetch_sequential(
        &self,
        urls: &[String],
        progress: &ProgressBar,
    ) -> Result<Vec<Grid>, BatchError> {
        let mut grids = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let (_, grid) = self
                .fetch_one(index, url)
                .await
                .inspect_err(|e| log::error!("{e}"))?;
            grids.push(grid);
            progress.inc(1);
        }
        Ok(grids)
    }

    async fn fetch_concurrent(
        &self,
        urls: &[String],
        progress: &ProgressBar,
    ) -> Result<Vec<Grid>, BatchError> {
        let mut slots: Vec<Option<Grid>> = vec![None; urls.len()];
        let mut completed = 0;

        let mut tasks = stream::iter(urls.iter().enumerate())
            .map(|(index, url)| self.fetch_one(index, url))
            .buffer_unordered(self.workers);

        while let Some(result) = tasks.next().await {
            match result {
                Ok((index, grid)) => {
                    slots[index] = Some(grid);
                    completed += 1;
                    progress.inc(1);
                }
                Err(e) => {
                    log::error!(
                        "{e}; cancelling {} outstanding part(s)",
                        urls.len() - completed - 1
                    );
                    // Dropping the stream drops every queued and in-flight fetch.
                    return Err(e);
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| BatchError::new(index, &urls[index], BatchFailure::Missing))
            })
            .collect()
    }

    async fn fetch_one(&self, index: usize, url: &str) -> Result<(usize, Grid), BatchError> {
        let page = self
            .source
            .fetch_page(url, index)
            .await
            .map_err(|e| BatchError::new(index, url, e))?;
        if page.index != index {
            log::warn!("Source tagged part {} as {}", index, page.index);
        }
        let grid = parse_table(&page.html).map_err(|e| BatchError::new(index, url, e))?;
        log::debug!("Parsed part {} from {}", index, url);
        Ok((index, grid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubSource, part_html};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://stub/part-{i}.html")).collect()
    }

    fn source_for(urls: &[String]) -> StubSource {
        urls.iter()
            .enumerate()
            .fold(StubSource::new(), |source, (i, url)| {
                source.page(url.clone(), part_html(&format!("p{i}")))
            })
    }

    #[tokio::test]
    async fn test_sequential_fetch_in_order() {
        let urls = urls(5);
        let batch = BatchFetcher::new(source_for(&urls), 4);
        let progress = ProgressBar::hidden();

        let grids = batch.fetch_all(&urls, false, &progress).await.unwrap();

        assert_eq!(grids.len(), 5);
        for (i, grid) in grids.iter().enumerate() {
            assert_eq!(grid.rows()[1][2], format!("p{i}/0/0/1"));
        }
        assert_eq!(progress.position(), 5);
        assert_eq!(progress.length(), Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential_order() {
        let urls = urls(12);
        // Later parts finish first.
        let source = urls
            .iter()
            .enumerate()
            .fold(source_for(&urls), |source, (i, url)| {
                source.delayed(url.clone(), Duration::from_millis(5 * (12 - i as u64)))
            });
        let batch = BatchFetcher::new(source, 12);

        let concurrent = batch
            .fetch_all(&urls, true, &ProgressBar::hidden())
            .await
            .unwrap();
        let sequential = batch
            .fetch_all(&urls, false, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(concurrent, sequential);
        assert_eq!(concurrent[11].rows()[1][2], "p11/0/0/1");
    }

    #[tokio::test]
    async fn test_concurrent_progress_counts_parts() {
        let urls = urls(7);
        let batch = BatchFetcher::new(source_for(&urls), 3);
        let progress = ProgressBar::hidden();

        batch.fetch_all(&urls, true, &progress).await.unwrap();

        assert_eq!(progress.position(), 7);
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let urls = urls(6);
        let source = source_for(&urls).connectivity_lost_at(urls[2].clone());
        let batch = BatchFetcher::new(source, 4);

        let err = batch
            .fetch_all(&urls, false, &ProgressBar::hidden())
            .await
            .unwrap_err();

        assert_eq!(err.index, 2);
        assert!(err.is_connectivity_lost());
        assert_eq!(batch.source().fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_failure_cancels_batch() {
        let urls = urls(20);
        let source = urls
            .iter()
            .fold(source_for(&urls), |source, url| {
                source.delayed(url.clone(), Duration::from_millis(200))
            })
            .delayed(urls[1].clone(), Duration::ZERO)
            .connectivity_lost_at(urls[1].clone());
        let batch = BatchFetcher::new(source, 4);

        let err = batch
            .fetch_all(&urls, true, &ProgressBar::hidden())
            .await
            .unwrap_err();

        assert_eq!(err.index, 1);
        assert!(err.is_connectivity_lost());
        // Only the first window of workers was started, and none of it finished.
        assert!(batch.source().fetches.load(Ordering::SeqCst) <= 5);
        assert_eq!(batch.source().completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parse_failure_fails_batch() {
        let urls = urls(4);
        let source = source_for(&urls).page(urls[3].clone(), "<html><body>Chyba</body></html>");
        let batch = BatchFetcher::new(source, 2);

        let err = batch
            .fetch_all(&urls, true, &ProgressBar::hidden())
            .await
            .unwrap_err();

        assert_eq!(err.index, 3);
        assert!(matches!(
            err.source,
            BatchFailure::Parse(ParseError::MissingTable)
        ));
        assert!(!err.is_connectivity_lost());
    }

    #[tokio::test]
    async fn test_slots_follow_request_order_not_page_tag() {
        let urls = urls(6);
        let batch = BatchFetcher::new(source_for(&urls).mistagged(), 3);

        let grids = batch
            .fetch_all(&urls, true, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(grids.len(), 6);
        for (i, grid) in grids.iter().enumerate() {
            assert_eq!(grid.rows()[1][2], format!("p{i}/0/0/1"));
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let batch = BatchFetcher::new(StubSource::new(), 0);
        assert_eq!(batch.workers(), 1);
        let grids = batch.fetch_all(&[], true, &ProgressBar::hidden()).await.unwrap();
        assert!(grids.is_empty());
    }
}
