//! Fixtures shared by the unit tests: canned listing pages, an in-memory page
//! source and in-memory sinks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{
    Device, FieldRule, FieldRuleSet, PaginationRule, SiteDefinition, Version,
};
use crate::pipeline::filters::{CategoryRule, FilterLists};
use crate::sink::{assemble, is_within, normalize, ResultSink};
use crate::source::{PageSession, PageSnapshot, PageSource};

// ── HTML fixtures ──

pub fn product(link: Option<&str>, name: Option<&str>, cost: &str) -> String {
    let link_html = link
        .map(|l| format!(r#"<a class="link" href="{}">View</a>"#, l))
        .unwrap_or_default();
    let name_html = name
        .map(|n| format!(r#"<span class="name"> {} </span>"#, n))
        .unwrap_or_default();
    format!(
        r#"<li class="product">{}{}<span class="price">{}</span><img class="photo" src="/img{}.png"></li>"#,
        link_html,
        name_html,
        cost,
        link.unwrap_or("/none")
    )
}

pub fn listing(count: Option<u64>, products: &[String]) -> String {
    let count_html = count
        .map(|c| format!(r#"<span class="count">{} items</span>"#, c))
        .unwrap_or_default();
    format!(
        "<html><body>{}<ul>{}</ul></body></html>",
        count_html,
        products.concat()
    )
}

fn rule(selector: &str, attribute: Option<&str>) -> FieldRule {
    FieldRule {
        selector: selector.to_string(),
        attribute: attribute.map(str::to_string),
    }
}

pub fn sample_site(key: &str, link: &str, items_per_page: Option<u32>) -> SiteDefinition {
    SiteDefinition {
        key: key.to_string(),
        storefront: "Acme Parts".to_string(),
        link: link.to_string(),
        container: "li.product".to_string(),
        elements: FieldRuleSet {
            link: rule("a.link", Some("href")),
            name: rule(".name", None),
            cost: rule(".price", None),
            image: rule("img.photo", Some("src")),
            badge_image: None,
        },
        pages: items_per_page.map(|per_page| PaginationRule {
            item_amount: rule(".count", None),
            items_per_page: per_page,
            strip_pattern: "[^0-9]".to_string(),
            multiple: true,
            rescan_count_page: true,
            max_pages: 500,
        }),
        devices: vec![Device {
            name: "phone".to_string(),
            link_path: "phones".to_string(),
            versions: vec![
                Version {
                    name: "gen1".to_string(),
                    value: "g-1".to_string(),
                },
                Version {
                    name: "gen2".to_string(),
                    value: "g-2".to_string(),
                },
            ],
        }],
    }
}

pub fn filters() -> FilterLists {
    FilterLists {
        blacklist: vec!["Case".to_string()],
        whitelist: vec!["Battery".to_string(), "Screen".to_string()],
        categories: vec![CategoryRule {
            name: "Power".to_string(),
            keywords: vec!["Battery".to_string()],
        }],
    }
}

// ── Page source ──

#[derive(Default)]
struct MockState {
    pages: HashMap<String, String>,
    failing: HashSet<String>,
    refuse_launch: bool,
    opened: Mutex<Vec<String>>,
    launched: AtomicUsize,
    closed: AtomicUsize,
}

/// Serves canned HTML by URL. Unknown URLs fail to load.
#[derive(Clone, Default)]
pub struct MockPageSource {
    state: Arc<MockState>,
}

impl MockPageSource {
    fn state_mut(&mut self) -> &mut MockState {
        Arc::get_mut(&mut self.state).expect("configure the mock before sharing it")
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.state_mut()
            .pages
            .insert(url.to_string(), html.to_string());
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.state_mut().failing.insert(url.to_string());
        self
    }

    pub fn refusing_launch(mut self) -> Self {
        self.state_mut().refuse_launch = true;
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.opened.lock().unwrap().clone()
    }

    pub fn launched(&self) -> usize {
        self.state.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for MockPageSource {
    async fn launch(&self) -> Result<Box<dyn PageSession>> {
        if self.state.refuse_launch {
            bail!("browser unavailable");
        }
        self.state.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
}

#[async_trait]
impl PageSession for MockSession {
    async fn open(&mut self, url: &str) -> Result<PageSnapshot> {
        self.state.opened.lock().unwrap().push(url.to_string());
        if self.state.failing.contains(url) {
            bail!("navigation to {} failed", url);
        }
        let html = self
            .state
            .pages
            .get(url)
            .ok_or_else(|| anyhow!("no page at {}", url))?;
        Ok(PageSnapshot {
            url: url.to_string(),
            html: html.clone(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Sinks ──

#[derive(Default)]
pub struct MemorySink {
    nodes: Mutex<BTreeMap<String, Value>>,
}

impl MemorySink {
    pub fn dump(&self) -> BTreeMap<String, Value> {
        self.nodes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        let path = normalize(path);
        let mut nodes = self.nodes.lock().unwrap();
        nodes.retain(|p, _| !is_within(p, path) || p == path);
        nodes.insert(path.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let nodes = self.nodes.lock().unwrap();
        let subtree = nodes
            .iter()
            .filter(|(p, _)| is_within(p, path))
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect();
        Ok(assemble(path, subtree))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.nodes.lock().unwrap().keys().any(|p| is_within(p, path)))
    }

    async fn delete_subtree(&self, path: &str) -> Result<usize> {
        let mut nodes = self.nodes.lock().unwrap();
        let before = nodes.len();
        nodes.retain(|p, _| !is_within(p, path));
        Ok(before - nodes.len())
    }

    async fn paths(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .keys()
            .filter(|p| is_within(p, prefix))
            .cloned()
            .collect())
    }
}

/// Fails the first `failures` writes, then behaves like a [`MemorySink`].
pub struct FlakySink {
    pub inner: MemorySink,
    failures: u32,
    attempts: AtomicU32,
}

impl FlakySink {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemorySink::default(),
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultSink for FlakySink {
    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            bail!("connection reset");
        }
        self.inner.set(path, value).await
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.inner.get(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn delete_subtree(&self, path: &str) -> Result<usize> {
        self.inner.delete_subtree(path).await
    }

    async fn paths(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.paths(prefix).await
    }
}
