// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Human and machine readable reports of a classified dump.

use std::io;
use std::io::prelude::*;
use std::path::Path;

use owo_colors::OwoColorize;
use serde_json::json;

use crate::{Classification, FaultEvent, Owner, StackFrame};

/// Everything known about a dump once it has been classified.
#[derive(Debug, Clone, Copy)]
pub struct DumpReport<'a> {
    pub dump: &'a Path,
    pub fault: &'a FaultEvent,
    pub classification: Classification<'a>,
    /// Owner of the matched filter, or the default owner.
    pub owner: &'a Owner,
}

/// Whether colored output should be produced, honoring `NO_COLOR`.
pub fn use_colors(requested: bool) -> bool {
    requested && std::env::var_os("NO_COLOR").is_none()
}

/// The lines [`print_stack`] writes, without their newlines.
///
/// The frame at `highlight` is prefixed with `=>` so it stays
/// distinguishable without colors; with `color` it is also bold red.
pub fn stack_lines(stack: &[StackFrame], highlight: Option<usize>, color: bool) -> Vec<String> {
    if stack.is_empty() {
        return vec!["   <no frames>".to_owned()];
    }
    stack
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            if highlight != Some(i) {
                return format!("   {i:2}  {frame}");
            }
            let line = format!("=> {i:2}  {frame}");
            if color {
                line.red().bold().to_string()
            } else {
                line
            }
        })
        .collect()
}

/// Write `stack` one frame per line, marking the frame at `highlight`.
pub fn print_stack<T: Write>(
    f: &mut T,
    stack: &[StackFrame],
    highlight: Option<usize>,
    color: bool,
) -> io::Result<()> {
    for line in stack_lines(stack, highlight, color) {
        writeln!(f, "{line}")?;
    }
    Ok(())
}

impl DumpReport<'_> {
    /// Write a human-readable description of the dump to `f`.
    pub fn print<T: Write>(&self, f: &mut T, color: bool) -> io::Result<()> {
        writeln!(f, "Dump: {}", self.dump.display())?;
        if let Some(reason) = &self.fault.reason {
            writeln!(f, "Crash reason:  {reason}")?;
        }
        if let Some(address) = self.fault.address {
            writeln!(f, "Crash address: {address:#x}")?;
        }
        writeln!(f, "Faulting thread: {:#x}", self.fault.thread_id)?;
        match self.classification.matched {
            Some(m) => writeln!(f, "Matched rule: {} (frame {})", m.filter, m.frame_index)?,
            None => writeln!(f, "Matched rule: none")?,
        }
        writeln!(f, "Owner: {}", self.owner)?;
        writeln!(f)?;
        writeln!(f, "Call stack of the last fault event:")?;
        print_stack(
            f,
            self.classification.stack,
            self.classification.matched.map(|m| m.frame_index),
            color,
        )?;
        writeln!(f)
    }

    /// The report as a JSON value, one object per dump.
    pub fn to_json(&self) -> serde_json::Value {
        let matched = self.classification.matched;
        json!({
            "dump": self.dump.display().to_string(),
            "thread_id": self.fault.thread_id,
            "reason": self.fault.reason,
            "address": self.fault.address.map(|address| format!("{address:#x}")),
            "frames": self.classification.stack.iter().map(|frame| frame.to_string()).collect::<Vec<_>>(),
            "matched_frame": matched.map(|m| m.frame_index),
            "matched_rule": matched.map(|m| m.filter.to_string()),
            "owner": self.owner.name(),
        })
    }
}
