use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::fetcher::{FetchError, FetchedPage, PageSource};
use crate::types::REGION_COUNT;

/// A part page in the upstream layout whose value cells embed `tag`.
pub(crate) fn part_html(tag: &str) -> String {
    let mut html = String::from("<html><body><table>\n");
    html.push_str("<tr><td>Kraj</td><td></td><td>měsíc</td><td>rok</td></tr>\n<tr>");
    for month in 1..=12 {
        html.push_str(&format!("<td>{month}</td>"));
    }
    html.push_str("</tr>\n");
    for region in 0..REGION_COUNT {
        for (v, label) in ["T", "O", "N"].iter().enumerate() {
            html.push_str("<tr>");
            if v == 0 {
                html.push_str(&format!("<td>Region {region}</td>"));
            }
            html.push_str(&format!("<td>{label}</td>"));
            for col in 1..=13 {
                html.push_str(&format!("<td>{tag}/{region}/{v}/{col}</td>"));
            }
            html.push_str("</tr>\n");
        }
    }
    html.push_str("</table></body></html>");
    html
}

/// An index page with one table per entry of `tables`, linking `./part-<year>.html`.
pub(crate) fn index_html(tables: &[Vec<i32>]) -> String {
    let mut html = String::from("<html><body>\n");
    for years in tables {
        html.push_str("<table><tr>");
        for year in years {
            html.push_str(&format!(r#"<td><a href="./part-{year}.html">{year}</a></td>"#));
        }
        html.push_str("</tr></table>\n");
    }
    html.push_str("</body></html>");
    html
}

/// An index page with one captioned table per normal period, linking `./<label>/part-<year>.html`.
pub(crate) fn period_index_html(periods: &[(&str, Vec<i32>)]) -> String {
    let mut html = String::from("<html><body>\n");
    for (label, years) in periods {
        html.push_str(&format!("<table><caption>Srovnání s normálem {label}</caption><tr>"));
        for year in years {
            html.push_str(&format!(
                r#"<td><a href="./{label}/part-{year}.html">{year}</a></td>"#
            ));
        }
        html.push_str("</tr></table>\n");
    }
    html.push_str("</body></html>");
    html
}

/// In-memory page source recording every request.
#[derive(Default)]
pub(crate) struct StubSource {
    pages: HashMap<String, String>,
    lost: HashSet<String>,
    delays: HashMap<String, Duration>,
    probe_down: bool,
    mistagged: bool,
    pub(crate) probes: AtomicUsize,
    pub(crate) fetches: AtomicUsize,
    pub(crate) completed: AtomicUsize,
    pub(crate) fetched_urls: Mutex<Vec<String>>,
}

impl StubSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub(crate) fn delayed(mut self, url: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(url.into(), delay);
        self
    }

    pub(crate) fn connectivity_lost_at(mut self, url: impl Into<String>) -> Self {
        self.lost.insert(url.into());
        self
    }

    pub(crate) fn probe_down(mut self) -> Self {
        self.probe_down = true;
        self
    }

    /// Tags every page with the same wrong index.
    pub(crate) fn mistagged(mut self) -> Self {
        self.mistagged = true;
        self
    }

    pub(crate) fn requests(&self) -> usize {
        self.probes.load(Ordering::SeqCst) + self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for StubSource {
    async fn probe(&self, url: &str) -> Result<(), FetchError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_down {
            return Err(FetchError::ConnectivityLost(url.to_string()));
        }
        Ok(())
    }

    async fn fetch_page(&self, url: &str, index: usize) -> Result<FetchedPage, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched_urls
            .lock()
            .expect("stub lock poisoned")
            .push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        if self.lost.contains(url) {
            return Err(FetchError::ConnectivityLost(url.to_string()));
        }
        let html = self.pages.get(url).cloned().unwrap_or_default();
        self.completed.fetch_add(1, Ordering::SeqCst);
        let index = if self.mistagged { usize::MAX } else { index };
        Ok(FetchedPage { index, html })
    }
}
