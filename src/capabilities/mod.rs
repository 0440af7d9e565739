pub mod builtin;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::CapabilitiesConfig;
use crate::llm::LlmClient;
use crate::sandbox::{AccessDenied, PathGuard};

pub use registry::CapabilityRegistry;

/// How the coordinator treats a positional argument before invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Passed through the path guard and replaced with its canonical form
    Path,
    /// Handed over untouched
    Text,
    /// Must be an http(s) URL
    Url,
}

/// One declared positional parameter.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl Param {
    pub const fn path(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Path,
            required: true,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Text,
            required: true,
        }
    }

    pub const fn url(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Url,
            required: true,
        }
    }

    pub const fn optional(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }
}

/// Shared, immutable services handed to every handler.
pub struct CapabilityContext {
    pub guard: PathGuard,
    pub llm: Arc<dyn LlmClient>,
    pub http: reqwest::Client,
    pub settings: CapabilitiesConfig,
    pub handler_timeout: Duration,
}

impl CapabilityContext {
    /// Guards the supplied argument, or `default` (root-relative) when absent or blank.
    pub fn path_or(&self, arg: Option<&str>, default: &str) -> Result<PathBuf, AccessDenied> {
        match arg.map(str::trim).filter(|a| !a.is_empty()) {
            Some(path) => self.guard.guard(path),
            None => self.guard.guard(default),
        }
    }
}

/// An allowlisted operation the agent may run.
///
/// Handlers receive their arguments positionally, already checked against
/// [`Capability::params`]: arity is valid, path arguments are canonical
/// paths inside the sandbox, URL arguments are http(s).
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique, case-sensitive name used in step expressions.
    fn name(&self) -> &str;

    /// One-line summary shown to the model.
    fn description(&self) -> &str;

    /// Positional parameters; optional ones come last.
    fn params(&self) -> &[Param];

    /// Extra HTTP endpoint names besides the default one.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Primary HTTP endpoint: the name with `_` replaced by `-`.
    fn endpoint(&self) -> String {
        self.name().replace('_', "-")
    }

    /// `name(param, optional?)`, as listed in the interpreter prompt.
    fn signature(&self) -> String {
        let params: Vec<String> = self
            .params()
            .iter()
            .map(|p| {
                if p.required {
                    p.name.to_string()
                } else {
                    format!("{}?", p.name)
                }
            })
            .collect();
        format!("{}({})", self.name(), params.join(", "))
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> anyhow::Result<Value>;
}

/// Checks an argument count against declared parameters.
pub fn check_arity(params: &[Param], given: usize) -> Result<(), String> {
    let required = params.iter().filter(|p| p.required).count();
    let total = params.len();
    if given < required || given > total {
        let expected = if required == total {
            format!("{total}")
        } else {
            format!("{required} to {total}")
        };
        return Err(format!("expected {expected} arguments, got {given}"));
    }
    Ok(())
}

/// Argument at `index`, if supplied.
pub fn arg(args: &[String], index: usize) -> Option<&str> {
    args.get(index).map(String::as_str)
}


#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &[Param] = &[
        Param::path("input_file"),
        Param::text("weekday"),
        Param::path("output_file").optional(),
    ];

    struct Dummy;

    #[async_trait]
    impl Capability for Dummy {
        fn name(&self) -> &str {
            "count_weekdays"
        }
        fn description(&self) -> &str {
            "dummy"
        }
        fn params(&self) -> &[Param] {
            PARAMS
        }
        async fn execute(&self, _args: &[String], _ctx: &CapabilityContext) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_check_arity() {
        assert!(check_arity(PARAMS, 2).is_ok());
        assert!(check_arity(PARAMS, 3).is_ok());
        assert_eq!(
            check_arity(PARAMS, 1).unwrap_err(),
            "expected 2 to 3 arguments, got 1"
        );
        assert!(check_arity(PARAMS, 4).is_err());
        assert_eq!(
            check_arity(&[Param::text("a")], 0).unwrap_err(),
            "expected 1 arguments, got 0"
        );
        assert!(check_arity(&[], 0).is_ok());
    }

    #[test]
    fn test_signature_and_endpoint() {
        assert_eq!(
            Dummy.signature(),
            "count_weekdays(input_file, weekday, output_file?)"
        );
        assert_eq!(Dummy.endpoint(), "count-weekdays");
        assert!(Dummy.aliases().is_empty());
    }

    #[test]
    fn test_path_or_uses_default_when_blank() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let root = ctx.guard.root().to_path_buf();
        assert_eq!(
            ctx.path_or(None, "contacts.json").unwrap(),
            root.join("contacts.json")
        );
        assert_eq!(
            ctx.path_or(Some("  "), "contacts.json").unwrap(),
            root.join("contacts.json")
        );
        assert_eq!(
            ctx.path_or(Some("/data/other.json"), "contacts.json").unwrap(),
            root.join("other.json")
        );
        assert!(ctx.path_or(Some("/etc/passwd"), "contacts.json").is_err());
    }
}
