use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use scraper::Html;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Renderer;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// HTML of one loaded page. Parsed on demand so nothing `!Send` is held across awaits.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
}

impl PageSnapshot {
    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

/// Something that can start a browsing session.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageSession>>;
}

/// One session, owned by a single walk and closed when the walk ends.
#[async_trait]
pub trait PageSession: Send {
    /// Load a page. There is no navigation timeout.
    async fn open(&mut self, url: &str) -> Result<PageSnapshot>;
    async fn close(&mut self) -> Result<()>;
}

pub fn from_renderer(renderer: Renderer) -> Result<Box<dyn PageSource>> {
    Ok(match renderer {
        Renderer::Http => Box::new(HttpPageSource::new()?),
        Renderer::Spider => Box::new(SpiderPageSource::from_env()?),
    })
}

// ── Plain HTTP ──

pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parts_collector/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn launch(&self) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
}

#[async_trait]
impl PageSession for HttpSession {
    async fn open(&mut self, url: &str) -> Result<PageSnapshot> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }

        let final_url = response.url().to_string();
        let html = response.text().await?;
        debug!("Loaded {} ({} bytes, {}ms)", url, html.len(), start.elapsed().as_millis());
        Ok(PageSnapshot {
            url: final_url,
            html,
        })
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── spider.cloud ──

pub struct SpiderPageSource {
    api_key: String,
}

impl SpiderPageSource {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SPIDER_API_KEY")
            .map_err(|_| anyhow!("SPIDER_API_KEY environment variable must be set"))?;
        Ok(Self { api_key })
    }
}

#[async_trait]
impl PageSource for SpiderPageSource {
    async fn launch(&self) -> Result<Box<dyn PageSession>> {
        let spider = Spider::new(Some(self.api_key.clone()))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Box::new(SpiderSession { spider }))
    }
}

struct SpiderSession {
    spider: Spider,
}

#[derive(Debug, Error)]
enum RenderError {
    #[error("Spider scrape failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Spider returned status {status} for {url}")]
    Status { status: i64, url: String },
    #[error("No content in spider response for {0}")]
    NoContent(String),
}

impl RenderError {
    /// Rate limits, server errors and timeouts are worth another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Transport(e) => match e.status() {
                Some(status) => is_retryable_status(i64::from(status.as_u16())),
                None => e.is_timeout() || e.is_connect(),
            },
            Self::NoContent(_) => false,
        }
    }
}

fn is_retryable_status(status: i64) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

impl SpiderSession {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_i64()) {
            if !(200..300).contains(&status) {
                return Err(RenderError::Status {
                    status,
                    url: url.to_string(),
                });
            }
        }

        first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| RenderError::NoContent(url.to_string()))
    }

    async fn render_with_retry(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.render(url).await {
                Ok(html) => return Ok(html),
                Err(e) if attempt < MAX_RETRIES && e.is_retryable() => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl PageSession for SpiderSession {
    async fn open(&mut self, url: &str) -> Result<PageSnapshot> {
        let html = self.render_with_retry(url).await?;
        Ok(PageSnapshot {
            url: url.to_string(),
            html,
        })
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
