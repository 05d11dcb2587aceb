use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::{COLUMN_COUNT, Grid, REGION_COUNT, ROWS_PER_REGION};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("No table found in page")]
    MissingTable,
    #[error("Expected a single table, found {0}")]
    UnexpectedTableCount(usize),
    #[error("Table has {0} rows, too few for the header skeleton")]
    MissingHeader(usize),
    #[error("Header month row has {0} cells, expected 12")]
    HeaderWidth(usize),
    #[error("{0} body rows do not form complete region triplets")]
    IncompleteTriplet(usize),
    #[error("Table has {0} regions, expected 14")]
    RegionCount(usize),
    #[error("Row {row} has {width} cells after regrouping, expected 15")]
    RowWidth { row: usize, width: usize },
    #[error("Index table {0} has no year links")]
    EmptyPeriod(usize),
    #[error("Link text '{0}' is not a year")]
    InvalidYear(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// A normal-period table on an index page and its part links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalPeriod {
    pub label: String,
    pub links: Vec<YearLink>,
}

impl NormalPeriod {
    pub fn year_span(&self) -> Option<(i32, i32)> {
        let min = self.links.iter().map(|l| l.year).min()?;
        let max = self.links.iter().map(|l| l.year).max()?;
        Some((min, max))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearLink {
    pub year: i32,
    pub href: String,
}

static SEL_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body table").expect("invalid selector: table"));
static SEL_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("invalid selector: row"));
static SEL_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("invalid selector: cell"));
static SEL_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("invalid selector: link"));
static SEL_CAPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("caption").expect("invalid selector: caption"));

static PERIOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})\s*[-\u{2013}]\s*(\d{4})").expect("Invalid period regex"));

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn row_cells(row: ElementRef) -> Vec<String> {
    row.select(&SEL_CELL)
        .map(|td| normalize_whitespace(&elem_text(td)))
        .collect()
}

/// Parses one part page into a regular grid.
///
/// Row 0 of the table supplies the corner and annual labels, row 1 the twelve
/// month labels. Every following group of three rows is one region: the
/// first row carries the region name, the other two get that name prefixed.
/// Any deviation from this layout is an error; nothing is padded.
pub fn parse_table(html: &str) -> Result<Grid, ParseError> {
    let document = Html::parse_document(html);

    let mut tables = document.select(&SEL_TABLE);
    let table = tables.next().ok_or(ParseError::MissingTable)?;
    let extra = tables.count();
    if extra > 0 {
        return Err(ParseError::UnexpectedTableCount(extra + 1));
    }

    let rows: Vec<Vec<String>> = table.select(&SEL_ROW).map(row_cells).collect();
    if rows.len() < 2 {
        return Err(ParseError::MissingHeader(rows.len()));
    }

    let skeleton = &rows[0];
    let months = &rows[1];
    if months.len() != 12 {
        return Err(ParseError::HeaderWidth(months.len()));
    }
    let corner = skeleton
        .first()
        .cloned()
        .ok_or_else(|| ParseError::MissingField("header corner cell".to_string()))?;
    let annual = skeleton
        .last()
        .cloned()
        .ok_or_else(|| ParseError::MissingField("header annual cell".to_string()))?;

    let mut header = Vec::with_capacity(COLUMN_COUNT);
    header.push(corner);
    header.push(String::new());
    header.extend(months.iter().cloned());
    header.push(annual);

    let body = &rows[2..];
    if body.len() % ROWS_PER_REGION != 0 {
        return Err(ParseError::IncompleteTriplet(body.len()));
    }
    let regions = body.len() / ROWS_PER_REGION;
    if regions != REGION_COUNT {
        return Err(ParseError::RegionCount(regions));
    }

    let mut grid = Vec::with_capacity(1 + body.len());
    grid.push(header);
    for triplet in body.chunks(ROWS_PER_REGION) {
        let name = triplet[0]
            .first()
            .cloned()
            .ok_or_else(|| ParseError::MissingField("region name cell".to_string()))?;
        grid.push(triplet[0].clone());
        for row in &triplet[1..] {
            let mut prefixed = Vec::with_capacity(COLUMN_COUNT);
            prefixed.push(name.clone());
            prefixed.extend(row.iter().cloned());
            grid.push(prefixed);
        }
    }

    if let Some((row, width)) = grid
        .iter()
        .enumerate()
        .map(|(i, r)| (i, r.len()))
        .find(|(_, width)| *width != COLUMN_COUNT)
    {
        return Err(ParseError::RowWidth { row, width });
    }

    Ok(Grid::new(grid))
}

/// Parses an index page into its normal-period tables, in document order.
pub fn parse_index(html: &str) -> Result<Vec<NormalPeriod>, ParseError> {
    let document = Html::parse_document(html);
    let mut periods = Vec::new();

    for (i, table) in document.select(&SEL_TABLE).enumerate() {
        let links = table
            .select(&SEL_LINK)
            .map(|a| -> Result<YearLink, ParseError> {
                let text = normalize_whitespace(&elem_text(a));
                let year = text
                    .parse::<i32>()
                    .map_err(|_| ParseError::InvalidYear(text.clone()))?;
                let href = a
                    .value()
                    .attr("href")
                    .ok_or_else(|| ParseError::MissingField(format!("href of link {text}")))?
                    .to_string();
                Ok(YearLink { year, href })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        if links.is_empty() {
            return Err(ParseError::EmptyPeriod(i));
        }

        let mut period = NormalPeriod {
            label: String::new(),
            links,
        };
        let span = period.year_span();
        period.label = table
            .select(&SEL_CAPTION)
            .next()
            .and_then(|c| caption_label(&elem_text(c)))
            .or_else(|| span.map(|(min, max)| span_label(min, max)))
            .unwrap_or_default();
        periods.push(period);
    }

    if periods.is_empty() {
        return Err(ParseError::MissingTable);
    }

    Ok(periods)
}

/// The `YYYY-YYYY` span named in a caption, else the whole caption.
fn caption_label(caption: &str) -> Option<String> {
    let caption = normalize_whitespace(caption);
    if let Some(caps) = PERIOD_RE.captures(&caption) {
        return Some(format!("{}-{}", &caps[1], &caps[2]));
    }
    (!caption.is_empty()).then_some(caption)
}

fn span_label(min: i32, max: i32) -> String {
    if min == max {
        min.to_string()
    } else {
        format!("{min}-{max}")
    }
}

/// Joins a part href found on an index page with the base path.
pub fn part_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let path = href.trim_start_matches("./").trim_start_matches('/');
    format!("{}/{}", base.trim_end_matches('/'), path)
}
