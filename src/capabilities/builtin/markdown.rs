//! Markdown capabilities: formatting, HTML conversion, and title indexing.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pulldown_cmark::{html, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde_json::{json, Map, Value};
use tracing::debug;
use walkdir::WalkDir;

use super::process::run_command;
use super::{read_text, write_output};
use crate::capabilities::{arg, Capability, CapabilityContext, Param};

fn markdown_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

// ── format_markdown ──────────────────────────────────────

/// Runs the configured formatter (prettier by default) in place.
pub struct FormatMarkdown;

const FORMAT_MARKDOWN_PARAMS: &[Param] = &[Param::path("file").optional()];

#[async_trait]
impl Capability for FormatMarkdown {
    fn name(&self) -> &str {
        "format_markdown"
    }

    fn description(&self) -> &str {
        "Format a Markdown file in place with the configured formatter"
    }

    fn params(&self) -> &[Param] {
        FORMAT_MARKDOWN_PARAMS
    }

    fn aliases(&self) -> &[&str] {
        &["format-md", "format"]
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let file = ctx.path_or(arg(args, 0), "format.md")?;
        tokio::fs::metadata(&file)
            .await
            .with_context(|| format!("formatting {}", file.display()))?;

        let (program, prefix) = ctx
            .settings
            .formatter
            .split_first()
            .ok_or_else(|| anyhow!("no formatter configured"))?;
        let file_arg = file.to_string_lossy();
        let mut command_args: Vec<&str> = prefix.iter().map(String::as_str).collect();
        command_args.push(&*file_arg);

        run_command(program, &command_args, ctx.guard.root(), ctx.handler_timeout).await?;
        Ok(json!({"status": "success", "file": file}))
    }
}

// ── convert_md_to_html ───────────────────────────────────

pub struct ConvertMdToHtml;

const CONVERT_MD_TO_HTML_PARAMS: &[Param] = &[
    Param::path("input_file").optional(),
    Param::path("output_file").optional(),
];

pub(crate) fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, markdown_options());
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

#[async_trait]
impl Capability for ConvertMdToHtml {
    fn name(&self) -> &str {
        "convert_md_to_html"
    }

    fn description(&self) -> &str {
        "Convert a Markdown file to HTML"
    }

    fn params(&self) -> &[Param] {
        CONVERT_MD_TO_HTML_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let input = ctx.path_or(arg(args, 0), "docs/index.md")?;
        let output = ctx.path_or(arg(args, 1), "docs/index.html")?;

        let markdown = read_text(&input).await?;
        let rendered = markdown_to_html(&markdown);
        write_output(&output, &rendered).await?;

        Ok(json!({"status": "success", "bytes": rendered.len()}))
    }
}

// ── extract_markdown_headers ─────────────────────────────

pub struct ExtractMarkdownHeaders;

const EXTRACT_MARKDOWN_HEADERS_PARAMS: &[Param] = &[
    Param::path("docs_dir").optional(),
    Param::path("output_file").optional(),
];

/// Text of the first level-1 heading (ATX or setext).
fn first_h1(markdown: &str) -> Option<String> {
    let mut in_h1 = false;
    let mut title = String::new();
    for event in Parser::new_ext(markdown, markdown_options()) {
        match event {
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) => in_h1 = true,
            Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
                return Some(title.trim().to_string());
            }
            Event::Text(text) | Event::Code(text) if in_h1 => title.push_str(&text),
            Event::SoftBreak | Event::HardBreak if in_h1 => title.push(' '),
            _ => {}
        }
    }
    None
}

/// `(relative path, title)` for every `.md` file under `dir`, sorted by path.
fn index_titles(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut titles = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("md")
        {
            continue;
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if let Some(title) = first_h1(&content) {
            let relative: PathBuf = path.strip_prefix(dir)?.to_path_buf();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            titles.push((key, title));
        }
    }
    Ok(titles)
}

#[async_trait]
impl Capability for ExtractMarkdownHeaders {
    fn name(&self) -> &str {
        "extract_markdown_headers"
    }

    fn description(&self) -> &str {
        "Index every Markdown file under a directory by its first H1 title, as JSON"
    }

    fn params(&self) -> &[Param] {
        EXTRACT_MARKDOWN_HEADERS_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let dir = ctx.path_or(arg(args, 0), "docs")?;
        let output = ctx.path_or(arg(args, 1), "docs/index.json")?;

        tokio::fs::metadata(&dir)
            .await
            .with_context(|| format!("indexing {}", dir.display()))?;
        let titles = {
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || index_titles(&dir)).await??
        };

        let mut index = Map::new();
        for (file, title) in titles {
            index.insert(file, Value::String(title));
        }
        debug!("Indexed {} Markdown titles under {}", index.len(), dir.display());

        let count = index.len();
        write_output(&output, serde_json::to_string_pretty(&Value::Object(index))?).await?;
        Ok(json!({"status": "success", "files": count}))
    }
}
