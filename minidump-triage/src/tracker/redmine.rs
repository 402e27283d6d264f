//! [`TrackerClient`] for Redmine's REST API.
//!
//! Every request authenticates with HTTP basic auth. Redmine records the API
//! user as the author of the issues it creates, so the author of an
//! [`IssueDraft`] is always the session's own user.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::*;

/// Memberships are fetched in pages of this size.
const PAGE_SIZE: usize = 100;

/// Logs into Redmine servers.
#[derive(Debug, Clone)]
pub struct RedmineClient {
    timeout: Duration,
}

impl RedmineClient {
    /// A client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> RedmineClient {
        RedmineClient { timeout }
    }
}

impl Default for RedmineClient {
    fn default() -> Self {
        RedmineClient::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl TrackerClient for RedmineClient {
    type Session = RedmineSession;

    async fn authenticate(
        &self,
        url: &Url,
        credentials: &Credentials,
    ) -> Result<RedmineSession, TrackerError> {
        let client = Client::builder().timeout(self.timeout).build()?;
        let mut base = url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut session = RedmineSession {
            client,
            base,
            credentials: credentials.clone(),
            user: Identity {
                id: 0,
                name: String::new(),
            },
        };
        // Fails with AuthenticationFailed on bad credentials.
        let url = session.endpoint(&["users", "current.json"])?;
        let current: UserEnvelope = session.get(url, &[]).await?;
        session.user = current.user.into_identity();
        Ok(session)
    }
}

/// A logged in Redmine connection.
pub struct RedmineSession {
    client: Client,
    base: Url,
    credentials: Credentials,
    user: Identity,
}

impl RedmineSession {
    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.credentials.user, Some(&self.credentials.password))
    }

    /// `segments` appended to the base URL, each one percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TrackerError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TrackerError::BadUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, TrackerError> {
        debug!("GET {url}");
        let res = self
            .request(self.client.get(url))
            .query(query)
            .send()
            .await?;
        Ok(check_status(res)?.json().await?)
    }
}

/// Redmine answers 403 for projects the user can't see, 404 for unknown ones.
fn project_error(identifier: &str, err: TrackerError) -> TrackerError {
    match err {
        TrackerError::Status {
            status: 403 | 404, ..
        } => TrackerError::ProjectNotFound(identifier.to_owned()),
        other => other,
    }
}

fn check_status(res: Response) -> Result<Response, TrackerError> {
    let status = res.status();
    trace!("{} answered {status}", res.url());
    if status == StatusCode::UNAUTHORIZED {
        Err(TrackerError::AuthenticationFailed)
    } else if status.is_success() {
        Ok(res)
    } else {
        Err(TrackerError::Status {
            status: status.as_u16(),
            url: res.url().to_string(),
        })
    }
}

#[async_trait]
impl TrackerSession for RedmineSession {
    async fn current_user(&self) -> Result<Identity, TrackerError> {
        Ok(self.user.clone())
    }

    async fn resolve_project(&self, identifier: &str) -> Result<Project, TrackerError> {
        if matches!(identifier.trim(), "" | "." | "..") {
            return Err(TrackerError::ProjectNotFound(identifier.to_owned()));
        }
        let url = self.endpoint(&["projects", &format!("{identifier}.json")])?;
        let project: ProjectEnvelope = self
            .get(url, &[])
            .await
            .map_err(|err| project_error(identifier, err))?;
        let memberships = self.endpoint(&["projects", identifier, "memberships.json"])?;

        let mut members = Vec::new();
        let mut offset = 0;
        loop {
            let page: MembershipPage = self
                .get(
                    memberships.clone(),
                    &[("offset", offset.to_string()), ("limit", PAGE_SIZE.to_string())],
                )
                .await?;
            let fetched = page.memberships.len();
            members.extend(page.memberships.into_iter().filter_map(|m| m.user));
            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
                break;
            }
        }
        debug!("project {identifier} has {} user members", members.len());

        Ok(Project {
            id: project.project.id,
            identifier: project.project.identifier,
            members,
        })
    }

    async fn create_issue(&self, issue: &IssueDraft) -> Result<IssueId, TrackerError> {
        if issue.author != self.user.id {
            warn!(
                "Redmine files issues as {} (id {}), not as user id {}",
                self.user.name, self.user.id, issue.author
            );
        }
        let url = self.endpoint(&["issues.json"])?;
        debug!("POST {url}");
        let res = self
            .request(self.client.post(url))
            .json(&NewIssueEnvelope::from(issue))
            .send()
            .await?;
        let created: CreatedIssueEnvelope = check_status(res)?.json().await?;
        Ok(created.issue.id)
    }
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: RedmineUser,
}

#[derive(Debug, Deserialize)]
struct RedmineUser {
    id: u64,
    #[serde(default)]
    login: String,
    #[serde(default)]
    firstname: String,
    #[serde(default)]
    lastname: String,
}

impl RedmineUser {
    /// Redmine's default "Firstname Lastname" format, the one memberships use.
    fn into_identity(self) -> Identity {
        let full = format!("{} {}", self.firstname, self.lastname);
        let full = full.trim();
        let name = if full.is_empty() {
            self.login
        } else {
            full.to_owned()
        };
        Identity { id: self.id, name }
    }
}

#[derive(Debug, Deserialize)]
struct ProjectEnvelope {
    project: RedmineProject,
}

#[derive(Debug, Deserialize)]
struct RedmineProject {
    id: u64,
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct MembershipPage {
    memberships: Vec<Membership>,
    #[serde(default)]
    total_count: usize,
}

/// Either `user` or `group` is set; groups can't be assigned.
#[derive(Debug, Deserialize)]
struct Membership {
    user: Option<Identity>,
}

#[derive(Debug, Serialize)]
struct NewIssueEnvelope<'a> {
    issue: NewIssue<'a>,
}

#[derive(Debug, Serialize)]
struct NewIssue<'a> {
    project_id: u64,
    subject: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_to_id: Option<u64>,
}

impl<'a> From<&'a IssueDraft> for NewIssueEnvelope<'a> {
    fn from(draft: &'a IssueDraft) -> Self {
        NewIssueEnvelope {
            issue: NewIssue {
                project_id: draft.project_id,
                subject: &draft.subject,
                description: &draft.description,
                assigned_to_id: draft.assignee,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedIssueEnvelope {
    issue: CreatedIssue,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    id: u64,
}
