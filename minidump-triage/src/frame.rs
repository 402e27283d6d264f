//! Stack frames as seen by the classifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A source file and line a frame maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// One entry of a call stack, innermost first.
///
/// Produced by a [`DumpReader`](crate::DumpReader) and never modified
/// afterwards. Two frames are equal if all of their descriptive fields are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Basename of the module's code file (`ntdll.dll`, `libxul.so`).
    pub module: Option<String>,
    /// Symbolized function name, if symbols were available.
    pub function: Option<String>,
    /// Offset from the function base, else from the module base, else the
    /// absolute instruction address.
    pub offset: u64,
    pub source: Option<SourceLocation>,
}

impl StackFrame {
    /// A frame with only an instruction address, no module or symbols.
    pub fn with_address(address: u64) -> StackFrame {
        StackFrame {
            module: None,
            function: None,
            offset: address,
            source: None,
        }
    }

    /// A frame inside `module` with no symbols.
    pub fn in_module(module: impl Into<String>, offset: u64) -> StackFrame {
        StackFrame {
            module: Some(module.into()),
            function: None,
            offset,
            source: None,
        }
    }

    /// A symbolized frame.
    pub fn in_function(
        module: impl Into<String>,
        function: impl Into<String>,
        offset: u64,
    ) -> StackFrame {
        StackFrame {
            module: Some(module.into()),
            function: Some(function.into()),
            offset,
            source: None,
        }
    }

    pub fn with_source(mut self, file: impl Into<String>, line: u32) -> StackFrame {
        self.source = Some(SourceLocation {
            file: file.into(),
            line,
        });
        self
    }

    /// The `module!function` pair, when both halves are known.
    pub fn symbol(&self) -> Option<String> {
        match (&self.module, &self.function) {
            (Some(module), Some(function)) => Some(format!("{module}!{function}")),
            _ => None,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.module, &self.function) {
            (Some(module), Some(function)) => write!(f, "{module}!{function} + {:#x}", self.offset)?,
            (Some(module), None) => write!(f, "{module} + {:#x}", self.offset)?,
            (None, Some(function)) => write!(f, "{function} + {:#x}", self.offset)?,
            (None, None) => write!(f, "{:#x}", self.offset)?,
        }
        if let Some(source) = &self.source {
            write!(f, " [{} : {}]", basename(&source.file), source.line)?;
        }
        Ok(())
    }
}

/// Last component of a path, for either path separator.
///
/// Dumps routinely carry Windows paths while being processed on Linux, so
/// `std::path` can't be used here.
pub fn basename(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}
