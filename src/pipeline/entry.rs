use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::field::{extract_field, Field, SiteSelectors};
use super::filters::FilterLists;

static COST_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9.\-]+").unwrap());

/// What name filtering sees when a product has no name. Existing keyword
/// lists rely on this exact literal.
const MISSING_NAME: &str = "undefined";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub storefront: String,
    pub device: String,
    pub version: String,
    pub category: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_image: Option<String>,
}

/// Fields known before anything is read off the product element.
#[derive(Debug, Clone, Copy)]
pub struct Preset<'a> {
    pub storefront: &'a str,
    pub device: &'a str,
    pub version: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("No Link Found")]
    NoLink,
    #[error("Duplicate {link}")]
    Duplicate { link: String },
    #[error("Blacklisted ({name}) {link}")]
    Blacklisted { name: String, link: String },
    #[error("Not Whitelisted ({name}) {link}")]
    NotWhitelisted { name: String, link: String },
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NoLink => "no-link",
            Rejection::Duplicate { .. } => "duplicate",
            Rejection::Blacklisted { .. } => "blacklisted",
            Rejection::NotWhitelisted { .. } => "not-whitelisted",
        }
    }

    /// The field whose value caused the rejection.
    pub fn field(&self) -> Field {
        match self {
            Rejection::NoLink | Rejection::Duplicate { .. } => Field::Link,
            Rejection::Blacklisted { .. } | Rejection::NotWhitelisted { .. } => Field::Name,
        }
    }
}

/// Links accepted so far in one run.
#[derive(Debug, Default)]
pub struct SeenLinks(HashSet<String>);

impl SeenLinks {
    /// Returns false when the link was already present.
    pub fn insert(&mut self, link: &str) -> bool {
        self.0.insert(link.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Strip everything but digits, dots and minus signs, then parse.
pub fn parse_cost(text: &str) -> Option<f64> {
    let cleaned = COST_STRIP_RE.replace_all(text, "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Turn one product element into an accepted entry, or say why it was dropped.
///
/// Fields are read in a fixed order (link, name, cost, image, badge image) and
/// each read fails on its own without affecting the next one.
pub fn build(
    element: ElementRef<'_>,
    preset: Preset<'_>,
    rules: &SiteSelectors,
    filters: &FilterLists,
    seen: &mut SeenLinks,
) -> Result<Entry, Rejection> {
    let storefront = preset.storefront;

    let link = extract_field(storefront, Field::Link, element, &rules.link)
        .ok_or(Rejection::NoLink)?;
    if !seen.insert(&link) {
        return Err(Rejection::Duplicate { link });
    }

    let name = extract_field(storefront, Field::Name, element, &rules.name);
    let subject = name.as_deref().unwrap_or(MISSING_NAME);
    if filters.blacklisted(subject) {
        return Err(Rejection::Blacklisted {
            name: subject.to_string(),
            link,
        });
    }
    if !filters.whitelisted(subject) {
        return Err(Rejection::NotWhitelisted {
            name: subject.to_string(),
            link,
        });
    }

    let cost = extract_field(storefront, Field::Cost, element, &rules.cost).and_then(|text| {
        let cost = parse_cost(&text);
        if cost.is_none() {
            debug!("[{} - {}] Not a number: {:?}", storefront, Field::Cost.label(), text);
        }
        cost
    });

    let image = extract_field(storefront, Field::Image, element, &rules.image);
    let badge_image = rules
        .badge_image
        .as_ref()
        .and_then(|rule| extract_field(storefront, Field::BadgeImage, element, rule));

    let category = filters.categorize(subject).to_string();

    Ok(Entry {
        storefront: storefront.to_string(),
        device: preset.device.to_string(),
        version: preset.version.to_string(),
        category,
        link,
        name,
        cost,
        image,
        badge_image,
    })
}
