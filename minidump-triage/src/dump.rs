//! Reading the last fault event and its call stack out of a dump.
//!
//! [`DumpReader`] is the seam the batch processor talks to. [`MinidumpReader`]
//! implements it on top of `minidump` and `minidump-processor`: the dump is
//! parsed and every thread is walked when the session is opened, so the
//! session itself only answers questions about an already processed state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use minidump::{Minidump, Module};
use minidump_processor::ProcessState;
use minidump_unwind::{
    simple_symbol_supplier, MultiSymbolProvider, StackFrame as WalkedFrame, Symbolizer,
};
use serde::Serialize;
use tracing::{debug, trace};

use crate::frame::basename;
use crate::StackFrame;

/// The event that made the process write the dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultEvent {
    /// Id of the thread the fault happened on.
    pub thread_id: u32,
    /// Human readable crash reason (`EXCEPTION_ACCESS_VIOLATION_READ`, `SIGSEGV`...).
    pub reason: Option<String>,
    /// The memory address implicated in the fault.
    pub address: Option<u64>,
}

/// A dump couldn't be turned into a fault event and a stack.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("{} - {}", .0.name(), .0)]
    Read(#[from] minidump::Error),
    #[error("{0}")]
    Process(#[from] minidump_processor::ProcessError),
    #[error("the dump holds no fault event")]
    NoFaultEvent,
    #[error("thread {0:#x} is not part of the dump")]
    UnknownThread(u32),
}

/// Opens dumps. One session per dump; dropping the session releases the dump.
#[async_trait(?Send)]
pub trait DumpReader {
    type Session: DumpSession;

    async fn open(&self, path: &Path) -> Result<Self::Session, DumpError>;
}

/// An open dump.
pub trait DumpSession {
    /// The last fault recorded in the dump.
    fn last_fault_event(&self) -> Result<FaultEvent, DumpError>;

    /// The call stack of `thread_id`, innermost frame first.
    fn stack_trace(&self, thread_id: u32) -> Result<Vec<StackFrame>, DumpError>;
}

/// [`DumpReader`] for Breakpad/Crashpad minidumps.
#[derive(Debug, Clone, Default)]
pub struct MinidumpReader {
    symbols_paths: Vec<PathBuf>,
}

impl MinidumpReader {
    /// A reader that symbolizes frames with the Breakpad `.sym` files found
    /// under `symbols_paths`. With no paths, frames only carry module offsets.
    pub fn new(symbols_paths: Vec<PathBuf>) -> MinidumpReader {
        MinidumpReader { symbols_paths }
    }
}

#[async_trait(?Send)]
impl DumpReader for MinidumpReader {
    type Session = MinidumpSession;

    async fn open(&self, path: &Path) -> Result<MinidumpSession, DumpError> {
        debug!("reading minidump {}", path.display());
        let dump = Minidump::read_path(path)?;

        let mut provider = MultiSymbolProvider::new();
        if !self.symbols_paths.is_empty() {
            provider.add(Box::new(Symbolizer::new(simple_symbol_supplier(
                self.symbols_paths.clone(),
            ))));
        }

        let state = minidump_processor::process_minidump(&dump, &provider).await?;
        trace!(
            "processed {}: {} threads, requesting thread {:?}",
            path.display(),
            state.threads.len(),
            state.requesting_thread
        );
        Ok(MinidumpSession { state })
    }
}

/// A processed minidump.
pub struct MinidumpSession {
    state: ProcessState,
}

impl DumpSession for MinidumpSession {
    fn last_fault_event(&self) -> Result<FaultEvent, DumpError> {
        let exception = self
            .state
            .exception_info
            .as_ref()
            .ok_or(DumpError::NoFaultEvent)?;
        let thread = self
            .state
            .requesting_thread
            .and_then(|index| self.state.threads.get(index))
            .ok_or(DumpError::NoFaultEvent)?;
        Ok(FaultEvent {
            thread_id: thread.thread_id,
            reason: Some(exception.reason.to_string()),
            address: Some(u64::from(exception.address)),
        })
    }

    fn stack_trace(&self, thread_id: u32) -> Result<Vec<StackFrame>, DumpError> {
        let stack = self
            .state
            .threads
            .iter()
            .find(|stack| stack.thread_id == thread_id)
            .ok_or(DumpError::UnknownThread(thread_id))?;
        Ok(stack.frames.iter().map(convert_frame).collect())
    }
}

fn convert_frame(frame: &WalkedFrame) -> StackFrame {
    let address = frame.instruction;
    let offset = match (&frame.function_name, frame.function_base, &frame.module) {
        (Some(_), Some(function_base), _) => address.wrapping_sub(function_base),
        (_, _, Some(module)) => address.wrapping_sub(module.base_address()),
        _ => address,
    };
    let source = match (&frame.source_file_name, frame.source_line) {
        (Some(file), Some(line)) => Some(crate::SourceLocation {
            file: file.clone(),
            line,
        }),
        _ => None,
    };
    StackFrame {
        module: frame
            .module
            .as_ref()
            .map(|module| basename(&module.code_file()).to_owned()),
        function: frame.function_name.clone(),
        offset,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minidump_synth::{
        x86_context, DumpString, Exception, Memory, Module as SynthModule, SynthMinidump,
        SystemInfo, Thread, STOCK_VERSION_INFO,
    };
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_assembler::{Endian, Section};

    const THREAD_ID: u32 = 0x1234;

    /// One x86 thread stopped at 0xf00800, inside `crashy.dll` (0xf00000..0xf01000).
    fn minimal_minidump() -> SynthMinidump {
        let context = x86_context(Endian::Little, 0xf00800, 0x1010);
        let stack = Memory::with_section(
            Section::with_endian(Endian::Little).append_repeated(0, 0x1000),
            0x1000,
        );
        let thread = Thread::new(Endian::Little, THREAD_ID, &stack, &context);
        let system_info = SystemInfo::new(Endian::Little);
        let name = DumpString::new("C:\\crashy\\crashy.dll", Endian::Little);
        let module = SynthModule::new(
            Endian::Little,
            0xf00000,
            0x1000,
            &name,
            0,
            0,
            Some(&STOCK_VERSION_INFO),
        );
        SynthMinidump::with_endian(Endian::Little)
            .add_thread(thread)
            .add_system_info(system_info)
            .add_module(module)
            .add(name)
            .add(context)
            .add_memory(stack)
    }

    fn write_dump(dump: SynthMinidump) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&dump.finish().unwrap()).unwrap();
        file
    }

    #[tokio::test]
    async fn dump_without_exception_has_no_fault_event() {
        let file = write_dump(minimal_minidump());
        let session = MinidumpReader::default().open(file.path()).await.unwrap();

        let err = session.last_fault_event().err().unwrap();
        assert!(matches!(err, DumpError::NoFaultEvent), "{err:?}");
        // The threads were still walked.
        assert!(!session.stack_trace(THREAD_ID).unwrap().is_empty());
    }

    #[tokio::test]
    async fn fault_event_names_the_crashing_thread() {
        let mut exception = Exception::new(Endian::Little);
        exception.thread_id = THREAD_ID;
        exception.exception_record.exception_code = 0xc0000005;
        exception.exception_record.exception_address = 0xf00800;
        let file = write_dump(minimal_minidump().add_exception(exception));
        let session = MinidumpReader::default().open(file.path()).await.unwrap();

        let fault = session.last_fault_event().unwrap();
        assert_eq!(fault.thread_id, THREAD_ID);
        assert!(fault.reason.is_some());

        let stack = session.stack_trace(fault.thread_id).unwrap();
        assert!(!stack.is_empty());
        // Without symbols the innermost frame is an offset into its module,
        // named by the basename of the module's path.
        assert_eq!(stack[0].module.as_deref(), Some("crashy.dll"));
        assert_eq!(stack[0].function, None);
        assert_eq!(stack[0].offset, 0x800);

        let err = session.stack_trace(0x9999).err().unwrap();
        assert!(matches!(err, DumpError::UnknownThread(0x9999)), "{err:?}");
    }

    #[tokio::test]
    async fn garbage_is_unreadable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a minidump, just some bytes")
            .unwrap();

        let reader = MinidumpReader::default();
        let err = reader.open(file.path()).await.err().unwrap();
        assert!(matches!(err, DumpError::Read(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let reader = MinidumpReader::new(vec![dir.path().to_owned()]);
        let err = reader.open(&dir.path().join("gone.dmp")).await.err().unwrap();
        assert!(matches!(err, DumpError::Read(_)), "{err:?}");
    }
}
