//! Matching rules evaluated against a single stack frame.
//!
//! A [`Filter`] selects one [`FrameField`] of a frame and compares it with a
//! [`MatchRule`]. Filters are immutable once built and evaluating one never
//! fails: a frame that lacks the selected field simply doesn't match.
//!
//! Filters have a compact text form used on the command line,
//! `FIELD:RULE:VALUE`, where a `/i` suffix on the rule makes the comparison
//! case-insensitive:
//!
//! ```
//! use minidump_triage::{FrameField, Filter, StackFrame};
//!
//! let filter: Filter = "symbol:substring/i:!JS_".parse().unwrap();
//! assert_eq!(filter.field(), FrameField::Symbol);
//! assert!(filter.matches(&StackFrame::in_function("xul.dll", "js_GC", 0x10)));
//! ```

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::StackFrame;

/// The part of a [`StackFrame`] a filter looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameField {
    /// Module basename, e.g. `ntdll.dll`.
    Module,
    /// Function name, e.g. `RtlAllocateHeap`.
    Function,
    /// `module!function`, e.g. `ntdll.dll!RtlAllocateHeap`.
    Symbol,
    /// Full source file path as recorded in the symbols.
    SourceFile,
}

impl FrameField {
    pub fn name(&self) -> &'static str {
        match self {
            FrameField::Module => "module",
            FrameField::Function => "function",
            FrameField::Symbol => "symbol",
            FrameField::SourceFile => "source_file",
        }
    }

    fn extract<'a>(&self, frame: &'a StackFrame) -> Option<Cow<'a, str>> {
        match self {
            FrameField::Module => frame.module.as_deref().map(Cow::Borrowed),
            FrameField::Function => frame.function.as_deref().map(Cow::Borrowed),
            FrameField::Symbol => frame.symbol().map(Cow::Owned),
            FrameField::SourceFile => frame
                .source
                .as_ref()
                .map(|source| Cow::Borrowed(source.file.as_str())),
        }
    }
}

impl FromStr for FrameField {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(FrameField::Module),
            "function" => Ok(FrameField::Function),
            "symbol" => Ok(FrameField::Symbol),
            "source_file" => Ok(FrameField::SourceFile),
            _ => Err(FilterError::UnknownField(s.to_owned())),
        }
    }
}

/// How the selected field is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Exact,
    Substring,
    Pattern,
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Exact => "exact",
            RuleKind::Substring => "substring",
            RuleKind::Pattern => "pattern",
        }
    }
}

impl FromStr for RuleKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(RuleKind::Exact),
            "substring" => Ok(RuleKind::Substring),
            "pattern" => Ok(RuleKind::Pattern),
            _ => Err(FilterError::UnknownRule(s.to_owned())),
        }
    }
}

/// A comparison together with its operand.
#[derive(Debug, Clone)]
pub enum MatchRule {
    Exact(String),
    Substring(String),
    /// A regular expression, searched anywhere in the field unless anchored.
    Pattern(Regex),
}

impl MatchRule {
    pub fn kind(&self) -> RuleKind {
        match self {
            MatchRule::Exact(_) => RuleKind::Exact,
            MatchRule::Substring(_) => RuleKind::Substring,
            MatchRule::Pattern(_) => RuleKind::Pattern,
        }
    }

    /// The operand as it was written.
    pub fn value(&self) -> &str {
        match self {
            MatchRule::Exact(value) | MatchRule::Substring(value) => value,
            MatchRule::Pattern(regex) => regex.as_str(),
        }
    }
}

impl PartialEq for MatchRule {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.value() == other.value()
    }
}

impl Eq for MatchRule {}

/// Something went wrong building a [`Filter`].
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("unknown frame field {0:?} (expected module, function, symbol or source_file)")]
    UnknownField(String),
    #[error("unknown match rule {0:?} (expected exact, substring or pattern)")]
    UnknownRule(String),
    #[error("filter value must not be empty")]
    EmptyValue,
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("malformed filter {0:?} (expected FIELD:RULE:VALUE)")]
    Malformed(String),
}

/// A matching rule over one field of a [`StackFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFilter", into = "RawFilter")]
pub struct Filter {
    field: FrameField,
    rule: MatchRule,
    ignore_case: bool,
}

impl Filter {
    pub fn new(
        field: FrameField,
        kind: RuleKind,
        value: impl Into<String>,
        ignore_case: bool,
    ) -> Result<Filter, FilterError> {
        let value = value.into();
        if value.is_empty() {
            return Err(FilterError::EmptyValue);
        }
        let rule = match kind {
            RuleKind::Exact => MatchRule::Exact(value),
            RuleKind::Substring => MatchRule::Substring(value),
            RuleKind::Pattern => MatchRule::Pattern(
                RegexBuilder::new(&value)
                    .case_insensitive(ignore_case)
                    .build()?,
            ),
        };
        Ok(Filter {
            field,
            rule,
            ignore_case,
        })
    }

    /// Case-sensitive exact match.
    pub fn exact(field: FrameField, value: &str) -> Result<Filter, FilterError> {
        Filter::new(field, RuleKind::Exact, value, false)
    }

    /// Case-sensitive substring match.
    pub fn substring(field: FrameField, value: &str) -> Result<Filter, FilterError> {
        Filter::new(field, RuleKind::Substring, value, false)
    }

    pub fn field(&self) -> FrameField {
        self.field
    }

    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Whether `frame` satisfies this filter.
    pub fn matches(&self, frame: &StackFrame) -> bool {
        let Some(haystack) = self.field.extract(frame) else {
            return false;
        };
        match &self.rule {
            MatchRule::Exact(value) if self.ignore_case => {
                haystack.to_lowercase() == value.to_lowercase()
            }
            MatchRule::Exact(value) => haystack == value.as_str(),
            MatchRule::Substring(value) if self.ignore_case => haystack
                .to_lowercase()
                .contains(value.to_lowercase().as_str()),
            MatchRule::Substring(value) => haystack.contains(value.as_str()),
            MatchRule::Pattern(regex) => regex.is_match(&haystack),
        }
    }
}

impl AsRef<Filter> for Filter {
    fn as_ref(&self) -> &Filter {
        self
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.field.name(), self.rule.kind().name())?;
        if self.ignore_case {
            write!(f, "/i")?;
        }
        write!(f, ":{}", self.rule.value())
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(field), Some(rule), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(FilterError::Malformed(s.to_owned()));
        };
        let (rule, ignore_case) = match rule.strip_suffix("/i") {
            Some(rule) => (rule, true),
            None => (rule, false),
        };
        Filter::new(field.parse()?, rule.parse()?, value, ignore_case)
    }
}

/// Serialized form of a [`Filter`].
#[derive(Serialize, Deserialize)]
struct RawFilter {
    field: FrameField,
    rule: RuleKind,
    value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ignore_case: bool,
}

impl TryFrom<RawFilter> for Filter {
    type Error = FilterError;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        Filter::new(raw.field, raw.rule, raw.value, raw.ignore_case)
    }
}

impl From<Filter> for RawFilter {
    fn from(filter: Filter) -> Self {
        RawFilter {
            field: filter.field,
            rule: filter.rule.kind(),
            value: filter.rule.value().to_owned(),
            ignore_case: filter.ignore_case,
        }
    }
}
