//! In-memory stand-ins for the dump reader and the tracker.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Url;

use crate::tracker::*;
use crate::{DumpError, DumpReader, DumpSession, FaultEvent, StackFrame};

/// A reader serving canned stacks; dumps it doesn't know hold no fault event.
#[derive(Default)]
pub struct FakeReader {
    dumps: HashMap<PathBuf, (u32, Vec<StackFrame>)>,
    /// Sessions currently open.
    pub open: Rc<Cell<usize>>,
    /// Sessions opened in total.
    pub opened: Rc<Cell<usize>>,
}

impl FakeReader {
    pub fn with_dump(mut self, path: &str, thread_id: u32, stack: Vec<StackFrame>) -> Self {
        self.dumps.insert(PathBuf::from(path), (thread_id, stack));
        self
    }
}

pub struct FakeSession {
    dump: Option<(u32, Vec<StackFrame>)>,
    open: Rc<Cell<usize>>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.open.set(self.open.get() - 1);
    }
}

#[async_trait(?Send)]
impl DumpReader for FakeReader {
    type Session = FakeSession;

    async fn open(&self, path: &Path) -> Result<FakeSession, DumpError> {
        self.open.set(self.open.get() + 1);
        self.opened.set(self.opened.get() + 1);
        // The session is created (and released) even for dumps that turn out
        // unreadable, like a real reader that fails after mapping the file.
        Ok(FakeSession {
            dump: self.dumps.get(path).cloned(),
            open: self.open.clone(),
        })
    }
}

impl DumpSession for FakeSession {
    fn last_fault_event(&self) -> Result<FaultEvent, DumpError> {
        match &self.dump {
            Some((thread_id, _)) => Ok(FaultEvent {
                thread_id: *thread_id,
                reason: Some("EXCEPTION_ACCESS_VIOLATION_READ".into()),
                address: Some(0x45),
            }),
            None => Err(DumpError::NoFaultEvent),
        }
    }

    fn stack_trace(&self, thread_id: u32) -> Result<Vec<StackFrame>, DumpError> {
        match &self.dump {
            Some((id, stack)) if *id == thread_id => Ok(stack.clone()),
            _ => Err(DumpError::UnknownThread(thread_id)),
        }
    }
}

pub fn identity(id: u64, name: &str) -> Identity {
    Identity {
        id,
        name: name.into(),
    }
}

/// A tracker with one account and one project.
pub struct FakeTracker {
    user: String,
    password: String,
}

impl FakeTracker {
    pub fn new(user: &str, password: &str) -> Self {
        FakeTracker {
            user: user.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl TrackerClient for FakeTracker {
    type Session = FakeTrackerSession;

    async fn authenticate(
        &self,
        _url: &Url,
        credentials: &Credentials,
    ) -> Result<FakeTrackerSession, TrackerError> {
        if credentials.user == self.user && credentials.password == self.password {
            Ok(FakeTrackerSession::new(identity(1, &self.user), vec![]))
        } else {
            Err(TrackerError::AuthenticationFailed)
        }
    }
}

pub struct FakeTrackerSession {
    user: Identity,
    project: Project,
    /// Issue creation answers with HTTP 503 while set.
    pub unavailable: bool,
    pub issues: Mutex<Vec<IssueDraft>>,
}

impl FakeTrackerSession {
    pub fn new(user: Identity, members: Vec<Identity>) -> Self {
        FakeTrackerSession {
            user,
            project: Project {
                id: 3,
                identifier: "crashes".into(),
                members,
            },
            unavailable: false,
            issues: Mutex::new(Vec::new()),
        }
    }

    pub fn issues(&self) -> Vec<IssueDraft> {
        self.issues.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackerSession for FakeTrackerSession {
    async fn current_user(&self) -> Result<Identity, TrackerError> {
        Ok(self.user.clone())
    }

    async fn resolve_project(&self, identifier: &str) -> Result<Project, TrackerError> {
        if identifier == self.project.identifier || identifier == self.project.id.to_string() {
            Ok(self.project.clone())
        } else {
            Err(TrackerError::ProjectNotFound(identifier.into()))
        }
    }

    async fn create_issue(&self, issue: &IssueDraft) -> Result<IssueId, TrackerError> {
        if self.unavailable {
            return Err(TrackerError::Status {
                status: 503,
                url: "https://tracker.invalid/issues.json".into(),
            });
        }
        let mut issues = self.issues.lock().unwrap();
        issues.push(issue.clone());
        Ok(1000 + issues.len() as u64)
    }
}
