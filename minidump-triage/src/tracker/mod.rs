//! An interface for the issue tracker tickets get filed in.
//!
//! Routing only needs four things from a tracker: logging in, knowing who
//! logged in, resolving a project with its members, and creating an issue.
//! [`TrackerClient`] and [`TrackerSession`] capture exactly that; the
//! [`redmine`] module implements them for Redmine's REST API.

use async_trait::async_trait;
pub use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod redmine;

/// A tracker account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    /// Display name, the thing [`Owner`](crate::Owner) names are matched against.
    pub name: String,
}

/// A resolved project and a snapshot of its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: u64,
    pub identifier: String,
    pub members: Vec<Identity>,
}

impl Project {
    /// The member whose display name is exactly `name`.
    pub fn member(&self, name: &str) -> Option<&Identity> {
        self.members.iter().find(|member| member.name == name)
    }
}

/// What a created issue is identified by.
pub type IssueId = u64;

/// An issue ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDraft {
    pub project_id: u64,
    pub subject: String,
    pub description: String,
    pub assignee: Option<u64>,
    pub author: u64,
}

/// Login details for a tracker account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// An error produced talking to the tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("project {0:?} not found")]
    ProjectNotFound(String),
    #[error("bad tracker url: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered with HTTP {status}")]
    Status { status: u16, url: String },
}

/// Something that can log into a tracker.
#[async_trait]
pub trait TrackerClient {
    type Session: TrackerSession;

    async fn authenticate(
        &self,
        url: &Url,
        credentials: &Credentials,
    ) -> Result<Self::Session, TrackerError>;
}

/// A logged in tracker connection.
#[async_trait]
pub trait TrackerSession: Send + Sync {
    /// The account this session is logged in as.
    async fn current_user(&self) -> Result<Identity, TrackerError>;

    /// Look up a project by id or identifier, with its assignable members.
    async fn resolve_project(&self, identifier: &str) -> Result<Project, TrackerError>;

    async fn create_issue(&self, issue: &IssueDraft) -> Result<IssueId, TrackerError>;
}

/// The answer to a login attempt.
#[derive(Debug)]
pub enum Login<S> {
    Accepted(S),
    Rejected,
}

/// Try `credentials` once, separating "wrong credentials" from real failures.
pub async fn login<C: TrackerClient + Sync>(
    client: &C,
    url: &Url,
    credentials: &Credentials,
) -> Result<Login<C::Session>, TrackerError> {
    match client.authenticate(url, credentials).await {
        Ok(session) => Ok(Login::Accepted(session)),
        Err(TrackerError::AuthenticationFailed) => Ok(Login::Rejected),
        Err(err) => Err(err),
    }
}

/// Where credentials come from, e.g. the command line then a terminal prompt.
pub trait CredentialSource {
    /// Credentials for attempt number `attempt` (starting at 0), or `None` to
    /// give up.
    fn next_credentials(&mut self, attempt: u32) -> Option<Credentials>;
}

impl CredentialSource for Vec<Credentials> {
    fn next_credentials(&mut self, _attempt: u32) -> Option<Credentials> {
        if self.is_empty() {
            None
        } else {
            Some(self.remove(0))
        }
    }
}

/// Log in, asking `source` for new credentials after every rejection.
///
/// Fails with [`TrackerError::AuthenticationFailed`] once `source` gives up.
/// Errors other than a rejection are returned immediately.
pub async fn authenticate_with_retry<C, S>(
    client: &C,
    url: &Url,
    source: &mut S,
) -> Result<C::Session, TrackerError>
where
    C: TrackerClient + Sync,
    S: CredentialSource + ?Sized,
{
    let mut attempt = 0;
    while let Some(credentials) = source.next_credentials(attempt) {
        match login(client, url, &credentials).await? {
            Login::Accepted(session) => {
                info!("logged into {url} as {}", credentials.user);
                return Ok(session);
            }
            Login::Rejected => {
                warn!("{url} rejected the credentials of {}", credentials.user);
                attempt += 1;
            }
        }
    }
    Err(TrackerError::AuthenticationFailed)
}
