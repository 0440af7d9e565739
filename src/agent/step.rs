//! Step expressions: `name(arg1, arg2, ...)`.
//!
//! The format is deliberately simple: no nested calls, no escaping, and
//! commas always separate arguments. The parser knows nothing about the
//! capability registry; the name it returns is unverified.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// One parsed capability invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepExpression {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Error)]
#[error("malformed step '{step}': {reason}")]
pub struct MalformedStep {
    pub step: String,
    pub reason: &'static str,
}

impl StepExpression {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Parses `name(args...)` into a step.
    ///
    /// An empty argument section yields zero arguments. Each argument is
    /// trimmed and loses one layer of enclosing `'` or `"` quotes.
    pub fn parse(text: &str) -> Result<Self, MalformedStep> {
        let malformed = |reason| MalformedStep {
            step: text.to_string(),
            reason,
        };

        let text = text.trim();
        let (name, rest) = text
            .split_once('(')
            .ok_or_else(|| malformed("missing '('"))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(malformed("missing capability name"));
        }

        let inner = rest
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| malformed("missing closing ')'"))?;

        let args = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(clean_argument).collect()
        };

        Ok(Self::new(name, args))
    }
}

/// Trims whitespace and strips one matching pair of enclosing quotes.
fn clean_argument(raw: &str) -> String {
    let arg = raw.trim();
    for quote in ['\'', '"'] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            return arg[1..arg.len() - 1].to_string();
        }
    }
    arg.to_string()
}

impl fmt::Display for StepExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{arg}\"")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positional_args() {
        let step = StepExpression::parse("foo(1, 2, 3)").unwrap();
        assert_eq!(step.name, "foo");
        assert_eq!(step.args, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_parse_empty_args() {
        let step = StepExpression::parse("foo()").unwrap();
        assert_eq!(step.name, "foo");
        assert!(step.args.is_empty());

        let step = StepExpression::parse("foo(   )").unwrap();
        assert!(step.args.is_empty());
    }

    #[test]
    fn test_parse_without_parenthesis_is_malformed() {
        let err = StepExpression::parse("foo").unwrap_err();
        assert_eq!(err.reason, "missing '('");
        assert_eq!(err.step, "foo");
    }

    #[test]
    fn test_parse_without_closing_parenthesis_is_malformed() {
        let err = StepExpression::parse("foo(1, 2").unwrap_err();
        assert_eq!(err.reason, "missing closing ')'");
    }

    #[test]
    fn test_parse_empty_name_is_malformed() {
        assert!(StepExpression::parse("(1)").is_err());
        assert!(StepExpression::parse("   ()").is_err());
    }

    #[test]
    fn test_quote_stripping() {
        let single = StepExpression::parse("foo('a')").unwrap();
        let double = StepExpression::parse("foo(\"a\")").unwrap();
        assert_eq!(single.args, vec!["a"]);
        assert_eq!(double.args, vec!["a"]);
    }

    #[test]
    fn test_only_one_quote_layer_is_stripped() {
        let step = StepExpression::parse("foo(\"'a'\")").unwrap();
        assert_eq!(step.args, vec!["'a'"]);
    }

    #[test]
    fn test_mismatched_quotes_are_kept() {
        let step = StepExpression::parse("foo('a\")").unwrap();
        assert_eq!(step.args, vec!["'a\""]);
    }

    #[test]
    fn test_whitespace_around_name_and_args() {
        let step =
            StepExpression::parse("  count_weekdays ( '/data/d.txt' ,  Wednesday , \"/data/o.txt\" )  ")
                .unwrap();
        assert_eq!(step.name, "count_weekdays");
        assert_eq!(step.args, vec!["/data/d.txt", "Wednesday", "/data/o.txt"]);
    }

    #[test]
    fn test_quoted_whitespace_is_preserved() {
        let step = StepExpression::parse("foo(' padded ')").unwrap();
        assert_eq!(step.args, vec![" padded "]);
    }

    #[test]
    fn test_embedded_commas_split() {
        // No escaping: a comma inside quotes still separates arguments
        let step = StepExpression::parse("foo('a, b')").unwrap();
        assert_eq!(step.args, vec!["'a", "b'"]);
    }

    #[test]
    fn test_empty_middle_argument() {
        let step = StepExpression::parse("foo(1, , 3)").unwrap();
        assert_eq!(step.args, vec!["1", "", "3"]);
    }

    #[test]
    fn test_display() {
        let step = StepExpression::new(
            "count_weekdays",
            vec![
                "/data/d.txt".to_string(),
                "Wednesday".to_string(),
                "/data/out.txt".to_string(),
            ],
        );
        assert_eq!(
            step.to_string(),
            "count_weekdays(\"/data/d.txt\", \"Wednesday\", \"/data/out.txt\")"
        );
        assert_eq!(StepExpression::new("foo", vec![]).to_string(), "foo()");
    }

    #[test]
    fn test_display_parses_back() {
        let step = StepExpression::parse("sort_contacts('a.json', 'b.json')").unwrap();
        assert_eq!(StepExpression::parse(&step.to_string()).unwrap(), step);
    }
}
