//! Processing a batch of dumps one after the other.
//!
//! Every dump goes through the same steps: open it, read the last fault event
//! and its stack, classify the stack, report, and (when a router is attached)
//! file a ticket. A failure in any step is attributed to that dump and the
//! batch moves on; nothing a single dump does can stop the run.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::{
    Classification, ConfigError, DumpReader, DumpReport, DumpSession, DumpSource,
    OwnershipTable, RoutedIssue, TicketRouter, TriageError,
};
use crate::tracker::TrackerSession;

/// Find the dumps `source` designates, in enumeration order.
///
/// A file is returned as is. A directory is searched for files matching the
/// source's pattern, recursively if asked to.
pub fn discover_dumps(source: &DumpSource) -> Result<Vec<PathBuf>, ConfigError> {
    let path = &source.path;
    if path.is_file() {
        return Ok(vec![path.clone()]);
    }
    if !path.is_dir() {
        return Err(ConfigError::MissingInput(path.clone()));
    }

    let dir = path.to_str().ok_or_else(|| {
        ConfigError::BadArgument(format!("{} is not valid UTF-8", path.display()))
    })?;
    let dir = glob::Pattern::escape(dir.trim_end_matches(|c: char| c == '/' || c == '\\'));
    let pattern = if source.recursive {
        format!("{dir}/**/{}", source.pattern)
    } else {
        format!("{dir}/{}", source.pattern)
    };
    debug!("looking for dumps matching {pattern}");

    let mut dumps = Vec::new();
    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(dump) if dump.is_file() => dumps.push(dump),
            Ok(_) => {}
            Err(err) => warn!("skipping {}: {}", err.path().display(), err.error()),
        }
    }
    info!("found {} dumps under {}", dumps.len(), path.display());
    Ok(dumps)
}

/// Receives the progress of a batch.
///
/// For any dump, all calls about it happen before the first call about the
/// next dump.
pub trait BatchObserver {
    fn dump_started(&mut self, _index: usize, _dump: &Path) {}

    /// The dump was read and classified.
    fn dump_classified(&mut self, report: &DumpReport<'_>);

    /// A ticket was filed for the dump.
    fn ticket_created(&mut self, _dump: &Path, _issue: &RoutedIssue) {}

    /// Processing the dump failed; the batch continues with the next one.
    fn dump_failed(&mut self, dump: &Path, error: &TriageError);
}

/// Totals of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Dumps that were read and classified.
    pub processed: usize,
    /// Classified dumps where some rule matched.
    pub matched: usize,
    /// Dumps that couldn't be read or classified.
    pub failed: usize,
    /// Classified dumps whose ticket couldn't be filed. These also count as
    /// processed.
    pub unfiled: usize,
    pub tickets: usize,
}

/// Runs dumps through reading, classification, reporting and routing.
pub struct BatchProcessor<'a, R, S> {
    reader: &'a R,
    ownership: &'a OwnershipTable,
    router: Option<TicketRouter<'a, S>>,
}

impl<'a, R: DumpReader, S: TrackerSession> BatchProcessor<'a, R, S> {
    /// A processor that classifies and reports, but files no tickets.
    pub fn new(reader: &'a R, ownership: &'a OwnershipTable) -> Self {
        BatchProcessor {
            reader,
            ownership,
            router: None,
        }
    }

    /// Also file a ticket for every classified dump.
    pub fn with_router(mut self, router: TicketRouter<'a, S>) -> Self {
        self.router = Some(router);
        self
    }

    /// Process `dumps` in order.
    pub async fn run(&self, dumps: &[PathBuf], observer: &mut dyn BatchObserver) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (index, dump) in dumps.iter().enumerate() {
            observer.dump_started(index, dump);
            if let Err(err) = self.process(dump, observer, &mut summary).await {
                error!("{} - {}", err.name(), err);
                match &err {
                    TriageError::TrackerUnavailable(_) => summary.unfiled += 1,
                    _ => summary.failed += 1,
                }
                observer.dump_failed(dump, &err);
            }
        }
        info!(
            "processed {} of {} dumps ({} matched a rule, {} failed, {} tickets filed, {} not filed)",
            summary.processed,
            dumps.len(),
            summary.matched,
            summary.failed,
            summary.tickets,
            summary.unfiled
        );
        summary
    }

    async fn process(
        &self,
        dump: &Path,
        observer: &mut dyn BatchObserver,
        summary: &mut BatchSummary,
    ) -> Result<(), TriageError> {
        info!("processing {}", dump.display());
        let unreadable = |err| TriageError::unreadable(dump, err);

        // The session only lives for the reads; it's released on every path.
        let (fault, stack) = {
            let session = self.reader.open(dump).await.map_err(unreadable)?;
            let fault = session.last_fault_event().map_err(unreadable)?;
            let stack = session.stack_trace(fault.thread_id).map_err(unreadable)?;
            (fault, stack)
        };

        let classification = Classification::new(&stack, self.ownership.entries());
        let owner = match classification.matched_filter() {
            Some(filter) => self.ownership.owner_for(filter),
            None => self.ownership.default_owner(),
        };
        match classification.matched {
            Some(m) => info!(
                "{}: frame {} ({}) matched {}, owner {owner}",
                dump.display(),
                m.frame_index,
                m.frame,
                m.filter
            ),
            None => info!("{}: no rule matched, owner {owner}", dump.display()),
        }
        summary.processed += 1;
        if classification.matched.is_some() {
            summary.matched += 1;
        }

        observer.dump_classified(&DumpReport {
            dump,
            fault: &fault,
            classification,
            owner,
        });

        if let Some(router) = &self.router {
            let issue = router.route(dump, &fault, &classification).await?;
            summary.tickets += 1;
            observer.ticket_created(dump, &issue);
        }
        Ok(())
    }
}
