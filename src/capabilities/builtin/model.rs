//! Capabilities that delegate reading to the model.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{read_text, write_output};
use crate::capabilities::{arg, Capability, CapabilityContext, Param};
use crate::llm::{strip_code_fence, ImageSource, InputContentBlock, Message};

const EXTRACTION_SYSTEM_PROMPT: &str =
    "You extract a single requested value from the user's input. Reply with JSON only.";

// ── extract_email ────────────────────────────────────────

pub struct ExtractEmail;

const EXTRACT_EMAIL_PARAMS: &[Param] = &[
    Param::path("input_file").optional(),
    Param::path("output_file").optional(),
];

#[derive(Deserialize)]
struct EmailReply {
    email: String,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
            .unwrap_or_else(|e| unreachable!("static email pattern: {e}"))
    })
}

/// Pulls the address out of the model's `{"email": ...}` reply.
fn parse_email_reply(reply: &str) -> Result<String> {
    let parsed: EmailReply = serde_json::from_str(strip_code_fence(reply))
        .with_context(|| format!("invalid LLM response: {reply}"))?;
    let email = parsed.email.trim().to_string();
    if !email_pattern().is_match(&email) {
        bail!("LLM returned an invalid email address: '{email}'");
    }
    Ok(email)
}

#[async_trait]
impl Capability for ExtractEmail {
    fn name(&self) -> &str {
        "extract_email"
    }

    fn description(&self) -> &str {
        "Ask the model for the sender's address in an email file and write it"
    }

    fn params(&self) -> &[Param] {
        EXTRACT_EMAIL_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let input = ctx.path_or(arg(args, 0), "email.txt")?;
        let output = ctx.path_or(arg(args, 1), "email-sender.txt")?;

        let email_text = read_text(&input).await?;
        let prompt = format!(
            "Extract the sender's email address from the following email text. \
             Respond only with a JSON object of the form {{\"email\": \"email@example.com\"}}.\n\n\
             Email Text:\n{email_text}"
        );

        let response = ctx
            .llm
            .complete(EXTRACTION_SYSTEM_PROMPT, &[Message::user(prompt)])
            .await
            .context("asking the model for the sender address")?;
        let email = parse_email_reply(&response.text)?;
        debug!("Extracted sender {email}");

        write_output(&output, &email).await?;
        Ok(json!({"status": "success", "email": email}))
    }
}

// ── extract_credit_card ──────────────────────────────────

pub struct ExtractCreditCard;

const EXTRACT_CREDIT_CARD_PARAMS: &[Param] = &[
    Param::path("image_file").optional(),
    Param::path("output_file").optional(),
];

fn image_media_type(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        other => Err(anyhow!("unsupported image type '{other}'")),
    }
}

/// First run of 12 to 19 digits, ignoring spaces and dashes between groups.
fn card_number(reply: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\d(?:[ \-]?\d){11,18}")
            .unwrap_or_else(|e| unreachable!("static card pattern: {e}"))
    });
    let found = pattern.find(strip_code_fence(reply))?;
    Some(found.as_str().chars().filter(char::is_ascii_digit).collect())
}

#[async_trait]
impl Capability for ExtractCreditCard {
    fn name(&self) -> &str {
        "extract_credit_card"
    }

    fn description(&self) -> &str {
        "Ask the model to read the card number from an image and write the digits"
    }

    fn params(&self) -> &[Param] {
        EXTRACT_CREDIT_CARD_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let image = ctx.path_or(arg(args, 0), "credit_card.png")?;
        let output = ctx.path_or(arg(args, 1), "credit-card.txt")?;

        let media_type = image_media_type(&image)?;
        let bytes = tokio::fs::read(&image)
            .await
            .with_context(|| format!("reading {}", image.display()))?;

        let message = Message::user_blocks(vec![
            InputContentBlock::Image {
                source: ImageSource::base64(media_type, STANDARD.encode(&bytes)),
            },
            InputContentBlock::Text {
                text: "Read the credit card number in this image. \
                       Respond only with a JSON object of the form {\"number\": \"<digits>\"}."
                    .to_string(),
            },
        ]);

        let response = ctx
            .llm
            .complete(EXTRACTION_SYSTEM_PROMPT, &[message])
            .await
            .context("asking the model for the card number")?;
        let number = card_number(&response.text)
            .ok_or_else(|| anyhow!("no card number in LLM response: {}", response.text))?;

        write_output(&output, &number).await?;
        Ok(json!({"status": "success", "digits": number.len()}))
    }
}
