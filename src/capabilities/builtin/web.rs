//! Network capabilities: fetch a URL and store either the raw body or its
//! readable text.
//!
//! Both share one client (from [`CapabilityContext::http`]) so connect and
//! read timeouts, redirects and the User-Agent are configured in one place.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::write_output;
use crate::capabilities::{arg, Capability, CapabilityContext, Param};

/// Maximum response body size (5 MB).
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024;

/// Text wrapping width for html2text conversion.
const TEXT_WIDTH: usize = 100;

/// A successful response body and its content type.
struct Fetched {
    content_type: String,
    body: Vec<u8>,
}

/// Validates the URL, then GETs it with the size cap applied.
async fn fetch(ctx: &CapabilityContext, url_str: &str) -> Result<Fetched> {
    let parsed = url::Url::parse(url_str).with_context(|| format!("invalid URL '{url_str}'"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => bail!("unsupported scheme '{scheme}' (only http/https)"),
    }

    debug!("Fetching URL: {parsed}");
    let response = ctx
        .http
        .get(parsed)
        .send()
        .await
        .with_context(|| format!("fetching {url_str}"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("fetching {url_str}: HTTP {status}");
    }

    if let Some(len) = response.content_length() {
        if len as usize > MAX_RESPONSE_SIZE {
            bail!("response too large ({len} bytes, limit is {MAX_RESPONSE_SIZE} bytes)");
        }
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/html")
        .to_string();

    let body = response
        .bytes()
        .await
        .with_context(|| format!("reading response from {url_str}"))?;
    if body.len() > MAX_RESPONSE_SIZE {
        bail!(
            "response too large ({} bytes, limit is {MAX_RESPONSE_SIZE} bytes)",
            body.len()
        );
    }

    Ok(Fetched {
        content_type,
        body: body.to_vec(),
    })
}

fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

/// Readable text from a body, based on its content type.
fn extract_text(content_type: &str, body: &[u8]) -> Result<String> {
    if is_html(content_type) {
        return Ok(html2text::from_read(body, TEXT_WIDTH)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned()));
    }
    let text = String::from_utf8_lossy(body);
    if text.chars().take(200).any(|c| c == '\0') {
        bail!("cannot extract text from binary content ({content_type})");
    }
    Ok(text.into_owned())
}

// ── fetch_api_data ───────────────────────────────────────

pub struct FetchApiData;

const FETCH_API_DATA_PARAMS: &[Param] = &[Param::url("url"), Param::path("output_file")];

#[async_trait]
impl Capability for FetchApiData {
    fn name(&self) -> &str {
        "fetch_api_data"
    }

    fn description(&self) -> &str {
        "Fetch data from an API URL and save the response body to a file"
    }

    fn params(&self) -> &[Param] {
        FETCH_API_DATA_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let url = arg(args, 0).unwrap_or_default();
        let output = ctx.path_or(arg(args, 1), "api-data.json")?;

        let fetched = fetch(ctx, url).await?;
        write_output(&output, &fetched.body).await?;

        Ok(json!({
            "status": "success",
            "content_type": fetched.content_type,
            "bytes": fetched.body.len(),
        }))
    }
}

// ── scrape_website ───────────────────────────────────────

pub struct ScrapeWebsite;

const SCRAPE_WEBSITE_PARAMS: &[Param] = &[Param::url("url"), Param::path("output_file")];

#[async_trait]
impl Capability for ScrapeWebsite {
    fn name(&self) -> &str {
        "scrape_website"
    }

    fn description(&self) -> &str {
        "Fetch a web page, convert it to plain text and save it to a file"
    }

    fn params(&self) -> &[Param] {
        SCRAPE_WEBSITE_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let url = arg(args, 0).unwrap_or_default();
        let output = ctx.path_or(arg(args, 1), "scraped.txt")?;

        let fetched = fetch(ctx, url).await?;
        let text = extract_text(&fetched.content_type, &fetched.body)?;
        let text = text.trim();
        write_output(&output, text).await?;

        Ok(json!({"status": "success", "chars": text.chars().count()}))
    }
}
