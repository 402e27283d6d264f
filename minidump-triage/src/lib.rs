//! A library for deciding who owns a crash, given its minidump.
//!
//! Each dump is read with a [`DumpReader`] to obtain its last fault event and
//! the call stack of the faulting thread. The stack is [`classify`]'d against
//! an ordered list of [`Filter`]s, each bound to an [`Owner`] by an
//! [`OwnershipTable`]. The result can be printed as a [`DumpReport`] and, with
//! a [`TicketRouter`], filed as an issue in a [`tracker`] assigned to that
//! owner. [`BatchProcessor`] ties the steps together for many dumps.

mod batch;
mod classifier;
mod config;
mod dump;
mod error;
mod filter;
mod frame;
mod ownership;
mod report;
mod router;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use batch::*;
pub use classifier::*;
pub use config::*;
pub use dump::*;
pub use error::*;
pub use filter::*;
pub use frame::*;
pub use ownership::*;
pub use report::*;
pub use router::*;
