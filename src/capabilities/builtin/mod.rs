//! Builtin capabilities.
//!
//! Every handler here works inside the sandbox root: path arguments are
//! guarded by the coordinator, and default file names are resolved
//! through [`CapabilityContext::path_or`](super::CapabilityContext::path_or).

pub mod database;
pub mod files;
pub mod markdown;
pub mod model;
pub mod process;
pub mod scripts;
pub mod web;

use std::path::Path;

use anyhow::{Context, Result};

use super::registry::RegistryBuilder;

pub use database::{CalculateSales, RunSql};
pub use files::{CountWeekdays, ExtractLogLines, FindSimilarComments, SortContacts};
pub use markdown::{ConvertMdToHtml, ExtractMarkdownHeaders, FormatMarkdown};
pub use model::{ExtractCreditCard, ExtractEmail};
pub use scripts::{CloneAndCommit, InstallAndRun};
pub use web::{FetchApiData, ScrapeWebsite};

/// Registers every builtin capability.
pub fn register_all(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(Box::new(InstallAndRun))
        .register(Box::new(FormatMarkdown))
        .register(Box::new(CountWeekdays))
        .register(Box::new(SortContacts))
        .register(Box::new(ExtractLogLines))
        .register(Box::new(ExtractEmail))
        .register(Box::new(CalculateSales))
        .register(Box::new(FetchApiData))
        .register(Box::new(CloneAndCommit))
        .register(Box::new(RunSql))
        .register(Box::new(ScrapeWebsite))
        .register(Box::new(ConvertMdToHtml))
        .register(Box::new(ExtractMarkdownHeaders))
        .register(Box::new(ExtractCreditCard))
        .register(Box::new(FindSimilarComments))
}

/// Reads a UTF-8 file, keeping the I/O error in the chain.
pub(crate) async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

/// Writes `contents`, creating parent directories as needed.
pub(crate) async fn write_output(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
