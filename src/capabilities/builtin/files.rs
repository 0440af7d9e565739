//! Plain-file capabilities: date counting, contact sorting, log digests,
//! and near-duplicate comment detection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde_json::{json, Value};
use tracing::debug;

use super::{read_text, write_output};
use crate::capabilities::{arg, Capability, CapabilityContext, Param};

/// Number of log files summarized by `extract_log_lines`.
const RECENT_LOG_COUNT: usize = 10;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%b-%Y", "%b %d, %Y", "%d %B %Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

// ── count_weekdays ───────────────────────────────────────

pub struct CountWeekdays;

const COUNT_WEEKDAYS_PARAMS: &[Param] = &[
    Param::path("input_file"),
    Param::text("weekday"),
    Param::path("output_file"),
];

fn parse_date(line: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(line, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(line, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Accepts "Wednesday", "wed", and the plural "Wednesdays".
fn parse_weekday(value: &str) -> Result<Weekday> {
    let value = value.trim();
    value
        .parse::<Weekday>()
        .or_else(|_| {
            value
                .strip_suffix('s')
                .ok_or(())
                .and_then(|v| v.parse::<Weekday>().map_err(|_| ()))
        })
        .map_err(|_| anyhow!("unknown weekday '{value}'"))
}

/// Counts lines whose date falls on `weekday`; blank lines are skipped.
fn count_matching(content: &str, weekday: Weekday) -> Result<usize> {
    let mut count = 0;
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let date = parse_date(line)
            .ok_or_else(|| anyhow!("line {}: unrecognized date '{line}'", number + 1))?;
        if date.weekday() == weekday {
            count += 1;
        }
    }
    Ok(count)
}

#[async_trait]
impl Capability for CountWeekdays {
    fn name(&self) -> &str {
        "count_weekdays"
    }

    fn description(&self) -> &str {
        "Count the dates in a file (one per line) that fall on a weekday and write the count"
    }

    fn params(&self) -> &[Param] {
        COUNT_WEEKDAYS_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let input = ctx.path_or(arg(args, 0), "dates.txt")?;
        let weekday = parse_weekday(arg(args, 1).unwrap_or_default())?;
        let output = ctx.path_or(arg(args, 2), "dates-count.txt")?;

        let content = read_text(&input).await?;
        let count = count_matching(&content, weekday)?;
        write_output(&output, count.to_string()).await?;

        debug!("count_weekdays: {count} x {weekday} in {}", input.display());
        Ok(json!({"status": "success", "count": count}))
    }
}

// ── sort_contacts ────────────────────────────────────────

pub struct SortContacts;

const SORT_CONTACTS_PARAMS: &[Param] = &[
    Param::path("input_file").optional(),
    Param::path("output_file").optional(),
];

fn sort_key(contact: &Value) -> (String, String) {
    let field = |name: &str| contact[name].as_str().unwrap_or_default().to_string();
    (field("last_name"), field("first_name"))
}

#[async_trait]
impl Capability for SortContacts {
    fn name(&self) -> &str {
        "sort_contacts"
    }

    fn description(&self) -> &str {
        "Sort a JSON array of contacts by last_name, then first_name"
    }

    fn params(&self) -> &[Param] {
        SORT_CONTACTS_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let input = ctx.path_or(arg(args, 0), "contacts.json")?;
        let output = ctx.path_or(arg(args, 1), "contacts-sorted.json")?;

        let content = read_text(&input).await?;
        let mut contacts: Vec<Value> = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a JSON array", input.display()))?;
        contacts.sort_by_cached_key(sort_key);

        write_output(&output, serde_json::to_string_pretty(&contacts)?).await?;
        Ok(json!({"status": "success", "count": contacts.len()}))
    }
}

// ── extract_log_lines ────────────────────────────────────

pub struct ExtractLogLines;

const EXTRACT_LOG_LINES_PARAMS: &[Param] = &[
    Param::path("logs_dir").optional(),
    Param::path("output_file").optional(),
];

/// `.log` files in `dir`, newest first.
async fn recent_logs(dir: &std::path::Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("listing {}", dir.display()))?;

    let mut logs: Vec<(SystemTime, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            logs.push((metadata.modified()?, path));
        }
    }

    logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(logs.into_iter().take(limit).map(|(_, path)| path).collect())
}

#[async_trait]
impl Capability for ExtractLogLines {
    fn name(&self) -> &str {
        "extract_log_lines"
    }

    fn description(&self) -> &str {
        "Write the first line of the 10 most recent .log files, newest first"
    }

    fn params(&self) -> &[Param] {
        EXTRACT_LOG_LINES_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let dir = ctx.path_or(arg(args, 0), "logs")?;
        let output = ctx.path_or(arg(args, 1), "logs-recent.txt")?;

        let logs = recent_logs(&dir, RECENT_LOG_COUNT).await?;
        let mut digest = String::new();
        for log in &logs {
            let content = read_text(log).await?;
            digest.push_str(content.lines().next().unwrap_or_default());
            digest.push('\n');
        }

        write_output(&output, &digest).await?;
        Ok(json!({"status": "success", "files": logs.len()}))
    }
}

// ── find_similar_comments ────────────────────────────────

pub struct FindSimilarComments;

const FIND_SIMILAR_COMMENTS_PARAMS: &[Param] = &[
    Param::path("input_file").optional(),
    Param::path("output_file").optional(),
];

/// Lowercased word counts.
fn term_counts(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm = |v: &HashMap<String, f64>| v.values().map(|x| x * x).sum::<f64>().sqrt();
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

/// Indices of the most similar pair; ties keep the earliest pair.
fn most_similar_pair(comments: &[&str]) -> Option<(usize, usize, f64)> {
    let vectors: Vec<_> = comments.iter().map(|c| term_counts(c)).collect();
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            let score = cosine(&vectors[i], &vectors[j]);
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((i, j, score));
            }
        }
    }
    best
}

#[async_trait]
impl Capability for FindSimilarComments {
    fn name(&self) -> &str {
        "find_similar_comments"
    }

    fn description(&self) -> &str {
        "Find the two most similar comments (one per line) and write them, one per line"
    }

    fn params(&self) -> &[Param] {
        FIND_SIMILAR_COMMENTS_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let input = ctx.path_or(arg(args, 0), "comments.txt")?;
        let output = ctx.path_or(arg(args, 1), "comments-similar.txt")?;

        let content = read_text(&input).await?;
        let comments: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if comments.len() < 2 {
            bail!("need at least two comments, found {}", comments.len());
        }

        let (i, j, score) = most_similar_pair(&comments)
            .ok_or_else(|| anyhow!("no comment pair to compare"))?;
        write_output(&output, format!("{}\n{}\n", comments[i], comments[j])).await?;

        Ok(json!({"status": "success", "similarity": score}))
    }
}
