//! Selector-driven detail page processor
//!
//! For each facility: build the detail page URL, fetch it through the retrying
//! fetcher, extract the configured fields with CSS selectors, then download every
//! linked inspection report to `<reports-dir>/<id>/<name>`. With `required = true`
//! a report that cannot be downloaded fails the whole item, so the next run retries
//! it; otherwise the report is skipped with a warning.

use crate::config::{Config, HarvestConfig};
use crate::fetch::{build_http_client, download_to, fetch_text, RetryPolicy, RetryingFetcher};
use crate::harvest::FacilityPayload;
use crate::pipeline::{ItemError, ItemOutput, ItemProcessor, WorkItem};
use crate::sink::{sanitize_file_name, OutputRow};
use crate::{ConfigError, HarvestError};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use url::Url;

/// Where an item's detail page URL comes from
#[derive(Debug, Clone)]
enum UrlSource {
    /// `{id}` is replaced with the URL-encoded item ID
    Template(String),
    /// Read from a payload field
    Field(String),
}

#[derive(Debug)]
struct FieldRule {
    name: String,
    selector: Selector,
    attribute: Option<String>,
    required: bool,
}

#[derive(Debug)]
struct ReportRule {
    selector: Selector,
    attribute: String,
    directory: PathBuf,
    required: bool,
}

/// Values extracted from one detail page
#[derive(Debug, Default, PartialEq)]
struct ExtractedPage {
    values: Vec<String>,
    report_links: Vec<Url>,
}

/// Fetches and scrapes facility detail pages
pub struct DetailPageProcessor {
    client: Client,
    fetcher: RetryingFetcher,
    url_source: UrlSource,
    fields: Vec<FieldRule>,
    reports: Option<ReportRule>,
}

impl DetailPageProcessor {
    /// Compiles the harvest configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The `[harvest]` section
    /// * `client` - HTTP client shared by all items
    /// * `fetcher` - Retry policy for page fetches and report downloads
    ///
    /// # Returns
    ///
    /// * `Ok(DetailPageProcessor)` - Ready to process items
    /// * `Err(ConfigError)` - A selector does not parse or no URL source is set
    pub fn new(
        config: &HarvestConfig,
        client: Client,
        fetcher: RetryingFetcher,
    ) -> Result<Self, ConfigError> {
        let url_source = match (&config.url_template, &config.url_field) {
            (Some(template), _) => UrlSource::Template(template.clone()),
            (None, Some(field)) => UrlSource::Field(field.clone()),
            (None, None) => {
                return Err(ConfigError::Validation(
                    "harvest needs either url-template or url-field".to_string(),
                ))
            }
        };

        let fields = config
            .fields
            .iter()
            .map(|field| {
                Ok(FieldRule {
                    name: field.name.clone(),
                    selector: compile(&field.selector)?,
                    attribute: field.attribute.clone(),
                    required: field.required,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let reports = match &config.reports {
            Some(reports) => Some(ReportRule {
                selector: compile(&reports.selector)?,
                attribute: reports.attribute.clone(),
                directory: PathBuf::from(&reports.directory),
                required: reports.required,
            }),
            None => None,
        };

        Ok(Self {
            client,
            fetcher,
            url_source,
            fields,
            reports,
        })
    }

    /// Builds the processor with the configured HTTP client and retry policy
    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        let client = build_http_client(&config.http)?;
        let fetcher = RetryingFetcher::new(RetryPolicy::from(&config.retry));
        Ok(Self::new(&config.harvest, client, fetcher)?)
    }

    /// Detail page URL for one item
    fn detail_url(&self, item: &WorkItem<FacilityPayload>) -> Result<String, ItemError> {
        match &self.url_source {
            UrlSource::Template(template) => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(item.id().as_bytes()).collect();
                Ok(template.replace("{id}", &encoded))
            }
            UrlSource::Field(field) => item
                .payload()
                .get(field)
                .and_then(Value::as_str)
                .filter(|url| !url.trim().is_empty())
                .map(|url| url.trim().to_string())
                .ok_or_else(|| ItemError::MissingData(format!("no '{}' in work item", field))),
        }
    }

    /// Downloads every report link, returning the saved paths and file names
    async fn download_reports(
        &self,
        rule: &ReportRule,
        item_id: &str,
        links: &[Url],
    ) -> Result<(Vec<PathBuf>, Vec<String>), ItemError> {
        let dir = rule.directory.join(sanitize_file_name(item_id));
        let names = report_file_names(links);
        let mut artifacts = Vec::with_capacity(links.len());
        let mut saved = Vec::with_capacity(links.len());

        for (link, name) in links.iter().zip(names) {
            let dest = dir.join(&name);

            // Left by an earlier attempt at this item
            if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                tracing::debug!(item_id = %item_id, "Report {} already downloaded", name);
                artifacts.push(dest);
                saved.push(name);
                continue;
            }

            let client = &self.client;
            let url = link.as_str();
            let target = dest.as_path();
            let downloaded = self
                .fetcher
                .execute(move || download_to(client, url, target))
                .await;
            match downloaded {
                Ok(bytes) => {
                    tracing::debug!(item_id = %item_id, bytes, "Saved report {}", dest.display());
                    artifacts.push(dest);
                    saved.push(name);
                }
                Err(e) if rule.required => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(item_id = %item_id, "Skipping report {}: {}", url, e);
                }
            }
        }

        Ok((artifacts, saved))
    }
}

impl ItemProcessor<FacilityPayload> for DetailPageProcessor {
    fn columns(&self) -> Vec<String> {
        let mut columns = vec!["id".to_string()];
        columns.extend(self.fields.iter().map(|field| field.name.clone()));
        columns.push("detail_url".to_string());
        if self.reports.is_some() {
            columns.push("reports".to_string());
        }
        columns
    }

    fn process(
        &self,
        item: &WorkItem<FacilityPayload>,
    ) -> impl Future<Output = Result<ItemOutput, ItemError>> + Send {
        async move {
            let url = self.detail_url(item)?;
            let page_url = Url::parse(&url)
                .map_err(|e| ItemError::MissingData(format!("bad detail URL '{}': {}", url, e)))?;

            let client = &self.client;
            let target = url.as_str();
            let html = self
                .fetcher
                .execute(move || fetch_text(client, target))
                .await?;

            let page = extract_page(&html, &page_url, &self.fields, self.reports.as_ref())?;

            let mut values = Vec::with_capacity(page.values.len() + 3);
            values.push(item.id().to_string());
            values.extend(page.values);
            values.push(url.clone());

            let mut artifacts = Vec::new();
            if let Some(rule) = &self.reports {
                let (paths, names) = self
                    .download_reports(rule, item.id(), &page.report_links)
                    .await?;
                artifacts = paths;
                values.push(names.join(";"));
            }

            Ok(ItemOutput::row(OutputRow::from(values)).with_artifacts(artifacts))
        }
    }
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

/// Parses the page and pulls out field values and report links
///
/// Synchronous so the parsed document never lives across an await.
fn extract_page(
    html: &str,
    page_url: &Url,
    fields: &[FieldRule],
    reports: Option<&ReportRule>,
) -> Result<ExtractedPage, ItemError> {
    let document = Html::parse_document(html);
    let mut page = ExtractedPage::default();

    for field in fields {
        let value = document
            .select(&field.selector)
            .next()
            .and_then(|element| element_value(element, field.attribute.as_deref()));

        match value {
            Some(value) => page.values.push(value),
            None if field.required => {
                return Err(ItemError::MissingData(format!(
                    "required field '{}' not found",
                    field.name
                )))
            }
            None => page.values.push(String::new()),
        }
    }

    if let Some(rule) = reports {
        let mut seen = HashSet::new();
        for element in document.select(&rule.selector) {
            let Some(href) = element.value().attr(&rule.attribute) else {
                continue;
            };
            match page_url.join(href.trim()) {
                Ok(link) if matches!(link.scheme(), "http" | "https") => {
                    if seen.insert(link.clone()) {
                        page.report_links.push(link);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Ignoring report link '{}': {}", href, e),
            }
        }
    }

    Ok(page)
}

/// Element text with whitespace collapsed, or an attribute value
fn element_value(element: ElementRef<'_>, attribute: Option<&str>) -> Option<String> {
    let raw = match attribute {
        Some(name) => element.value().attr(name)?.to_string(),
        None => element.text().collect::<Vec<_>>().join(" "),
    };
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// File names for a set of report links, unique within the set
fn report_file_names(links: &[Url]) -> Vec<String> {
    let mut used = HashSet::new();
    links
        .iter()
        .enumerate()
        .map(|(index, link)| {
            let base = link
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .map(sanitize_file_name)
                .unwrap_or_else(|| format!("report-{}", index + 1));

            let name = if used.contains(&base) {
                format!("{}-{}", index + 1, base)
            } else {
                base
            };
            used.insert(name.clone());
            name
        })
        .collect()
}
