use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::Config;
use regex::Regex;
use serde::Deserialize;

use crate::pipeline::field::SiteSelectors;

/// Site key reserved for the template entry in the sites file. Never walked.
pub const TEMPLATE_SITE_KEY: &str = "default";

const DEFAULT_STRIP_PATTERN: &str = "[^0-9]";
const DEFAULT_MAX_PAGES: u32 = 500;

// ── Run options ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    /// Plain HTTP fetch of the listing HTML.
    Http,
    /// Rendered HTML through spider.cloud.
    Spider,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub update_database: bool,
    pub run_right_away: bool,
    pub run_at_hour: u32,
    pub utc_offset_hours: i32,
    pub debug: bool,
    pub database_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub renderer: Renderer,
    pub sites_path: PathBuf,
    pub filters_path: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            update_database: true,
            run_right_away: true,
            run_at_hour: 8,
            utc_offset_hours: -8,
            debug: false,
            database_path: PathBuf::from("data/parts.sqlite"),
            log_dir: None,
            renderer: Renderer::Http,
            sites_path: PathBuf::from("config/sites.json"),
            filters_path: PathBuf::from("config/scraping.json"),
        }
    }
}

impl RunOptions {
    /// Defaults, then the optional options file, then `PARTS_*` environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("PARTS").try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read run options from {}", path.display()))?;

        let options: RunOptions = settings
            .try_deserialize()
            .context("Invalid run options")?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<()> {
        if self.run_at_hour > 23 {
            bail!("run_at_hour must be within 0-23, got {}", self.run_at_hour);
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            bail!(
                "utc_offset_hours must be within -12..=14, got {}",
                self.utc_offset_hours
            );
        }
        Ok(())
    }
}

// ── Site definitions ──

#[derive(Debug, Clone, Deserialize)]
pub struct FieldRule {
    pub selector: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRuleSet {
    pub link: FieldRule,
    pub name: FieldRule,
    pub cost: FieldRule,
    pub image: FieldRule,
    #[serde(default)]
    pub badge_image: Option<FieldRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationRule {
    pub item_amount: FieldRule,
    pub items_per_page: u32,
    #[serde(default = "default_strip_pattern")]
    pub strip_pattern: String,
    #[serde(default = "enabled")]
    pub multiple: bool,
    /// Reload page 1 for the element scan even though it was opened to read the count.
    #[serde(default = "enabled")]
    pub rescan_count_page: bool,
    /// Page counts above this are treated as a misread item amount.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_strip_pattern() -> String {
    DEFAULT_STRIP_PATTERN.to_string()
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Version {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    pub link_path: String,
    #[serde(default)]
    pub versions: Vec<Version>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteDefinition {
    pub key: String,
    pub storefront: String,
    /// URL template with `<device>`, `<version>` and `<page>` placeholders.
    pub link: String,
    pub container: String,
    pub elements: FieldRuleSet,
    #[serde(default)]
    pub pages: Option<PaginationRule>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl SiteDefinition {
    pub fn is_template(&self) -> bool {
        self.key == TEMPLATE_SITE_KEY
    }

    /// Listing URL for one device/version; `<page>` is left for the pagination resolver.
    pub fn url_for(&self, device: &Device, version: &Version) -> String {
        self.link
            .replace("<device>", &device.link_path)
            .replace("<version>", &version.value)
    }

    /// Pagination rule, if this site actually spans several pages.
    pub fn pagination(&self) -> Option<&PaginationRule> {
        self.pages.as_ref().filter(|p| p.multiple)
    }

    fn validate(&self) -> Result<()> {
        if self.storefront.trim().is_empty() {
            bail!("site {:?}: storefront must not be empty", self.key);
        }
        if self.link.trim().is_empty() {
            bail!("site {:?}: link template must not be empty", self.key);
        }
        SiteSelectors::compile(self).with_context(|| format!("site {:?}", self.key))?;
        if let Some(pages) = &self.pages {
            if pages.items_per_page == 0 {
                bail!("site {:?}: itemsPerPage must be positive", self.key);
            }
            if pages.max_pages == 0 {
                bail!("site {:?}: maxPages must be positive", self.key);
            }
            Regex::new(&pages.strip_pattern).with_context(|| {
                format!("site {:?}: invalid stripPattern {:?}", self.key, pages.strip_pattern)
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SitesFile {
    sites: Vec<SiteDefinition>,
}

pub fn load_sites(path: &Path) -> Result<Vec<SiteDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read site definitions from {}", path.display()))?;
    parse_sites(&raw).with_context(|| format!("Invalid site definitions in {}", path.display()))
}

pub fn parse_sites(raw: &str) -> Result<Vec<SiteDefinition>> {
    let file: SitesFile = serde_json::from_str(raw)?;
    for site in file.sites.iter().filter(|s| !s.is_template()) {
        site.validate()?;
    }
    Ok(file.sites)
}
