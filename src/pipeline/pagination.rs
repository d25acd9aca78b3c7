use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use super::field::{Field, FieldSelector};
use crate::config::PaginationRule;
use crate::source::{PageSession, PageSnapshot};

const PAGE_PLACEHOLDER: &str = "<page>";

/// Pages to visit for one walk.
#[derive(Debug)]
pub struct PageList {
    pub urls: Vec<String>,
    /// Page 1 as loaded while reading the item count, if it was loaded.
    pub count_page: Option<PageSnapshot>,
}

pub fn page_url(template: &str, page: u64) -> String {
    template.replace(PAGE_PLACEHOLDER, &page.to_string())
}

pub fn page_count(item_amount: u64, items_per_page: u32) -> u64 {
    item_amount.div_ceil(u64::from(items_per_page.max(1)))
}

/// Read the total item count off a loaded page.
pub fn read_item_amount(
    snapshot: &PageSnapshot,
    selector: &FieldSelector,
    strip: &Regex,
) -> Result<u64> {
    let doc = snapshot.document();
    let text = selector.extract(doc.root_element())?;
    let digits = strip.replace_all(&text, "");
    digits
        .parse::<u64>()
        .with_context(|| format!("item amount {:?} is not a number", text))
}

/// Work out which page URLs a walk should visit.
///
/// Without a rule this is just page 1. With one, page 1 is loaded to read the
/// item count; if that fails for any reason the walk falls back to page 1.
pub async fn resolve(
    session: &mut dyn PageSession,
    storefront: &str,
    template: &str,
    rule: Option<&PaginationRule>,
    item_amount: Option<&FieldSelector>,
) -> Result<PageList> {
    let first = page_url(template, 1);
    let (rule, selector) = match (rule, item_amount) {
        (Some(rule), Some(selector)) => (rule, selector),
        _ => {
            return Ok(PageList {
                urls: vec![first],
                count_page: None,
            })
        }
    };
    let strip = Regex::new(&rule.strip_pattern)
        .map_err(|e| anyhow!("invalid strip pattern {:?}: {}", rule.strip_pattern, e))?;

    let snapshot = match session.open(&first).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("[{}] Error loading page {}: {:#}", storefront, first, e);
            return Ok(PageList {
                urls: vec![first],
                count_page: None,
            });
        }
    };

    match read_item_amount(&snapshot, selector, &strip) {
        Ok(amount) => {
            let pages = page_count(amount, rule.items_per_page);
            if pages > u64::from(rule.max_pages) {
                warn!(
                    "[{} - {}] {} items would span {} pages (max {}), visiting {} only",
                    storefront,
                    Field::ItemAmount.label(),
                    amount,
                    pages,
                    rule.max_pages,
                    first
                );
                return Ok(PageList {
                    urls: vec![first],
                    count_page: Some(snapshot),
                });
            }
            debug!("[{}] {} items over {} pages", storefront, amount, pages);
            Ok(PageList {
                urls: (1..=pages).map(|n| page_url(template, n)).collect(),
                count_page: Some(snapshot),
            })
        }
        Err(e) => {
            warn!(
                "[{} - {}] Could not read item amount on {}: {:#}",
                storefront,
                Field::ItemAmount.label(),
                first,
                e
            );
            Ok(PageList {
                urls: vec![first],
                count_page: Some(snapshot),
            })
        }
    }
}
