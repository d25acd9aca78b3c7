use scraper::{ElementRef, Selector};
use thiserror::Error;
use tracing::debug;

use crate::config::{FieldRule, SiteDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Link,
    Name,
    Cost,
    Image,
    BadgeImage,
    ItemAmount,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::Link => "Product Link",
            Field::Name => "Product Name",
            Field::Cost => "Product Cost",
            Field::Image => "Product Image",
            Field::BadgeImage => "Product Badge Image",
            Field::ItemAmount => "Item Amount",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("no element matches {0:?}")]
    NoMatch(String),
    #[error("element {selector:?} has no {attribute:?} attribute")]
    MissingAttribute { selector: String, attribute: String },
}

fn parse_selector(raw: &str) -> Result<Selector, ExtractError> {
    Selector::parse(raw).map_err(|e| ExtractError::InvalidSelector {
        selector: raw.to_string(),
        reason: e.to_string(),
    })
}

/// A field rule with its selector parsed once.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    raw: String,
    selector: Selector,
    attribute: Option<String>,
}

impl FieldSelector {
    pub fn compile(rule: &FieldRule) -> Result<Self, ExtractError> {
        Ok(Self {
            raw: rule.selector.clone(),
            selector: parse_selector(&rule.selector)?,
            attribute: rule.attribute.clone(),
        })
    }

    /// Reads the attribute (or trimmed text) of the first element under `scope`
    /// matching the selector.
    pub fn extract(&self, scope: ElementRef<'_>) -> Result<String, ExtractError> {
        let target = scope
            .select(&self.selector)
            .next()
            .ok_or_else(|| ExtractError::NoMatch(self.raw.clone()))?;

        match &self.attribute {
            Some(attribute) => target
                .value()
                .attr(attribute)
                .map(str::to_string)
                .ok_or_else(|| ExtractError::MissingAttribute {
                    selector: self.raw.clone(),
                    attribute: attribute.clone(),
                }),
            None => Ok(target.text().collect::<String>().trim().to_string()),
        }
    }
}

/// Extract one field, turning any failure into `None` plus a debug event.
pub fn extract_field(
    storefront: &str,
    field: Field,
    scope: ElementRef<'_>,
    rule: &FieldSelector,
) -> Option<String> {
    match rule.extract(scope) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("[{} - {}] {}", storefront, field.label(), e);
            None
        }
    }
}

/// Every selector a site needs, compiled up front for a walk.
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    pub container: Selector,
    pub link: FieldSelector,
    pub name: FieldSelector,
    pub cost: FieldSelector,
    pub image: FieldSelector,
    pub badge_image: Option<FieldSelector>,
    pub item_amount: Option<FieldSelector>,
}

impl SiteSelectors {
    pub fn compile(site: &SiteDefinition) -> Result<Self, ExtractError> {
        let rules = &site.elements;
        Ok(Self {
            container: parse_selector(&site.container)?,
            link: FieldSelector::compile(&rules.link)?,
            name: FieldSelector::compile(&rules.name)?,
            cost: FieldSelector::compile(&rules.cost)?,
            image: FieldSelector::compile(&rules.image)?,
            badge_image: rules
                .badge_image
                .as_ref()
                .map(FieldSelector::compile)
                .transpose()?,
            item_amount: site
                .pages
                .as_ref()
                .map(|p| FieldSelector::compile(&p.item_amount))
                .transpose()?,
        })
    }
}
