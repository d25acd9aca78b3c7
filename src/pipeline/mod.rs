pub mod entry;
pub mod field;
pub mod filters;
pub mod pagination;
pub mod walker;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::{Device, SiteDefinition, Version};
use crate::sink::{self, ResultSink};
use crate::source::PageSource;
use entry::Rejection;
use field::SiteSelectors;
use filters::FilterLists;
use walker::RunState;

/// Counts reported by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub accepted: usize,
    pub persisted: usize,
    pub walks: usize,
    pub pages_visited: usize,
    pub pages_failed: usize,
    pub no_link: usize,
    pub duplicates: usize,
    pub blacklisted: usize,
    pub not_whitelisted: usize,
}

impl RunSummary {
    pub fn record_rejection(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::NoLink => self.no_link += 1,
            Rejection::Duplicate { .. } => self.duplicates += 1,
            Rejection::Blacklisted { .. } => self.blacklisted += 1,
            Rejection::NotWhitelisted { .. } => self.not_whitelisted += 1,
        }
    }

    pub fn rejected(&self) -> usize {
        self.no_link + self.duplicates + self.blacklisted + self.not_whitelisted
    }
}

/// Reads the filter lists afresh; called once at the start of every run.
pub type FilterLoader = Box<dyn Fn() -> Result<FilterLists> + Send + Sync>;

/// Every (site, device, version) a run walks, in declared order.
pub fn plan(sites: &[SiteDefinition]) -> Vec<(&SiteDefinition, &Device, &Version)> {
    sites
        .iter()
        .filter(|site| !site.is_template())
        .flat_map(|site| {
            site.devices.iter().flat_map(move |device| {
                device.versions.iter().map(move |version| (site, device, version))
            })
        })
        .collect()
}

pub struct Pipeline<'a> {
    source: &'a dyn PageSource,
    sink: Option<&'a dyn ResultSink>,
    load_filters: FilterLoader,
}

impl<'a> Pipeline<'a> {
    pub fn new(source: &'a dyn PageSource, load_filters: FilterLoader) -> Self {
        Self {
            source,
            sink: None,
            load_filters,
        }
    }

    /// Persist every accepted entry to `sink`.
    pub fn with_sink(mut self, sink: &'a dyn ResultSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Walk every configured site, device and version once.
    pub async fn run(&self, sites: &[SiteDefinition]) -> Result<RunSummary> {
        let filters = (self.load_filters)().context("Failed to load filter lists")?;
        let mut state = RunState::new(filters);
        let total = plan(sites).len();

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );

        for site in sites.iter().filter(|s| !s.is_template()) {
            let selectors = SiteSelectors::compile(site)
                .with_context(|| format!("site {:?}", site.key))?;

            for device in &site.devices {
                for version in &device.versions {
                    info!("[{}] Scraping {}-{}...", site.storefront, device.name, version.name);
                    pb.set_message(format!("{} {}-{}", site.storefront, device.name, version.name));

                    let entries =
                        walker::walk(self.source, site, &selectors, device, version, &mut state)
                            .await?;

                    for entry in &entries {
                        state.summary.accepted += 1;
                        if let Some(sink) = self.sink {
                            sink::persist(sink, entry).await?;
                            state.summary.persisted += 1;
                        }
                    }
                    pb.inc(1);
                }
            }
        }

        pb.finish_and_clear();
        info!(
            "Accepted {} entries from {} unique links ({} rejected, {} pages failed)",
            state.summary.accepted,
            state.seen.len(),
            state.summary.rejected(),
            state.summary.pages_failed
        );
        Ok(state.summary)
    }
}
