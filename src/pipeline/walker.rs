use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::entry::{self, Entry, Preset, SeenLinks};
use super::field::SiteSelectors;
use super::filters::FilterLists;
use super::pagination;
use super::RunSummary;
use crate::config::{Device, SiteDefinition, Version};
use crate::source::{PageSession, PageSnapshot, PageSource};

/// Mutable state shared by every walk of one run.
#[derive(Debug, Default)]
pub struct RunState {
    pub filters: FilterLists,
    pub seen: SeenLinks,
    pub summary: RunSummary,
}

impl RunState {
    pub fn new(filters: FilterLists) -> Self {
        Self {
            filters,
            ..Default::default()
        }
    }
}

/// Collect the accepted entries for one storefront/device/version.
///
/// One session is launched for the walk and closed afterwards, whether or
/// not the walk succeeded.
pub async fn walk(
    source: &dyn PageSource,
    site: &SiteDefinition,
    selectors: &SiteSelectors,
    device: &Device,
    version: &Version,
    state: &mut RunState,
) -> Result<Vec<Entry>> {
    let mut session = source
        .launch()
        .await
        .with_context(|| format!("[{}] Failed to start page session", site.storefront))?;

    let preset = Preset {
        storefront: &site.storefront,
        device: &device.name,
        version: &version.name,
    };
    let template = site.url_for(device, version);
    let result = walk_pages(session.as_mut(), site, selectors, &template, preset, state).await;

    if let Err(e) = session.close().await {
        warn!("[{}] Failed to close page session: {:#}", site.storefront, e);
    }
    state.summary.walks += 1;
    result
}

async fn walk_pages(
    session: &mut dyn PageSession,
    site: &SiteDefinition,
    selectors: &SiteSelectors,
    template: &str,
    preset: Preset<'_>,
    state: &mut RunState,
) -> Result<Vec<Entry>> {
    let rule = site.pagination();
    let pages = pagination::resolve(
        session,
        &site.storefront,
        template,
        rule,
        selectors.item_amount.as_ref(),
    )
    .await?;

    let mut reusable = match rule {
        Some(rule) if !rule.rescan_count_page => pages.count_page,
        _ => None,
    };

    let first = pagination::page_url(template, 1);
    let mut entries = Vec::new();
    for url in &pages.urls {
        let cached = if *url == first { reusable.take() } else { None };
        let snapshot = match cached {
            Some(snapshot) => {
                debug!("[{}] Reusing count page {}", site.storefront, url);
                snapshot
            }
            None => match session.open(url).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("[{}] Error loading page {}: {:#}", site.storefront, url, e);
                    state.summary.pages_failed += 1;
                    continue;
                }
            },
        };
        state.summary.pages_visited += 1;
        entries.extend(scan_page(&snapshot, preset, selectors, state));
    }
    Ok(entries)
}

/// Run the entry builder over every container element on a loaded page.
pub fn scan_page(
    snapshot: &PageSnapshot,
    preset: Preset<'_>,
    selectors: &SiteSelectors,
    state: &mut RunState,
) -> Vec<Entry> {
    let doc = snapshot.document();
    let elements: Vec<_> = doc.select(&selectors.container).collect();
    debug!(
        "[{}] {} elements on {}",
        preset.storefront,
        elements.len(),
        snapshot.url
    );

    let mut accepted = Vec::new();
    for element in elements {
        match entry::build(element, preset, selectors, &state.filters, &mut state.seen) {
            Ok(entry) => accepted.push(entry),
            Err(rejection) => {
                debug!(
                    "[{} - {}] Skipping Entry ({}): {}",
                    preset.storefront,
                    rejection.field().label(),
                    rejection.reason(),
                    rejection
                );
                state.summary.record_rejection(&rejection);
            }
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{filters, listing, product, sample_site, MockPageSource};

    fn paged_site(rescan: bool) -> SiteDefinition {
        let mut site = sample_site(
            "acme",
            "https://acme.test/<device>/<version>?page=<page>",
            Some(2),
        );
        if let Some(pages) = site.pages.as_mut() {
            pages.rescan_count_page = rescan;
        }
        site
    }

    fn page_one() -> String {
        listing(
            Some(3),
            &[
                product(Some("/p/1"), Some("Battery Pack"), "$10"),
                product(Some("/p/2"), Some("Screen"), "$20"),
            ],
        )
    }

    fn page_two() -> String {
        listing(None, &[product(Some("/p/3"), Some("Screen Glass"), "$5")])
    }

    async fn run_walk(source: &MockPageSource, site: &SiteDefinition) -> (Vec<Entry>, RunState) {
        let selectors = SiteSelectors::compile(site).unwrap();
        let device = &site.devices[0];
        let version = &device.versions[0];
        let mut state = RunState::new(filters());
        let entries = walk(source, site, &selectors, device, version, &mut state)
            .await
            .unwrap();
        (entries, state)
    }

    #[tokio::test]
    async fn walks_every_page_and_rescans_count_page() {
        let source = MockPageSource::default()
            .with_page("https://acme.test/phones/g-1?page=1", &page_one())
            .with_page("https://acme.test/phones/g-1?page=2", &page_two());
        let site = paged_site(true);

        let (entries, state) = run_walk(&source, &site).await;
        let links: Vec<_> = entries.iter().map(|e| e.link.as_str()).collect();
        assert_eq!(links, vec!["/p/1", "/p/2", "/p/3"]);
        assert_eq!(entries[0].device, "phone");
        assert_eq!(entries[0].version, "gen1");
        assert_eq!(
            source.opened(),
            vec![
                "https://acme.test/phones/g-1?page=1",
                "https://acme.test/phones/g-1?page=1",
                "https://acme.test/phones/g-1?page=2",
            ]
        );
        assert_eq!(state.summary.pages_visited, 2);
        assert_eq!(state.summary.walks, 1);
        assert_eq!(source.launched(), 1);
        assert_eq!(source.closed(), 1);
    }

    #[tokio::test]
    async fn count_page_reused_when_rescan_disabled() {
        let source = MockPageSource::default()
            .with_page("https://acme.test/phones/g-1?page=1", &page_one())
            .with_page("https://acme.test/phones/g-1?page=2", &page_two());
        let site = paged_site(false);

        let (entries, _) = run_walk(&source, &site).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(
            source.opened(),
            vec![
                "https://acme.test/phones/g-1?page=1",
                "https://acme.test/phones/g-1?page=2",
            ]
        );
    }

    #[tokio::test]
    async fn failed_page_is_skipped() {
        let source = MockPageSource::default()
            .with_page("https://acme.test/phones/g-1?page=1", &page_one())
            .failing("https://acme.test/phones/g-1?page=2");
        let site = paged_site(false);

        let (entries, state) = run_walk(&source, &site).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(state.summary.pages_failed, 1);
        assert_eq!(state.summary.pages_visited, 1);
        assert_eq!(source.closed(), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_an_error() {
        let source = MockPageSource::default().refusing_launch();
        let site = paged_site(true);
        let selectors = SiteSelectors::compile(&site).unwrap();
        let device = &site.devices[0];
        let mut state = RunState::new(filters());
        let result = walk(&source, &site, &selectors, device, &device.versions[0], &mut state).await;
        assert!(result.is_err());
    }

    #[test]
    fn scan_page_counts_rejections() {
        let site = sample_site("acme", "https://acme.test/", None);
        let selectors = SiteSelectors::compile(&site).unwrap();
        let snapshot = PageSnapshot {
            url: "https://acme.test/".to_string(),
            html: listing(
                None,
                &[
                    product(Some("/p/1"), Some("Battery Pack"), "$1"),
                    product(Some("/p/1"), Some("Battery Pack"), "$1"),
                    product(None, Some("Screen"), "$1"),
                    product(Some("/p/2"), Some("Phone Case"), "$1"),
                    product(Some("/p/3"), Some("Cable"), "$1"),
                ],
            ),
        };
        let preset = Preset {
            storefront: "Acme Parts",
            device: "phone",
            version: "gen1",
        };
        let mut state = RunState::new(filters());
        let accepted = scan_page(&snapshot, preset, &selectors, &mut state);
        assert_eq!(accepted.len(), 1);
        assert_eq!(state.summary.duplicates, 1);
        assert_eq!(state.summary.no_link, 1);
        assert_eq!(state.summary.blacklisted, 1);
        assert_eq!(state.summary.not_whitelisted, 1);
        assert_eq!(state.summary.rejected(), 4);
    }
}
