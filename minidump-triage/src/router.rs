//! Filing a ticket for a classified dump and assigning it to its owner.

use std::path::Path;

use tracing::{info, warn};

use crate::report::stack_lines;
use crate::tracker::{Identity, IssueDraft, IssueId, Project, TrackerSession};
use crate::{Classification, FaultEvent, Owner, OwnershipTable, TriageError};

/// Subject of every issue the router files.
pub const ISSUE_SUBJECT: &str = "Crash dump triage: unhandled fault";

/// The logged in tracker session, who it belongs to, and the project tickets
/// go to. Built once per run and shared by reference.
pub struct RoutingContext<S> {
    session: S,
    operator: Identity,
    project: Project,
}

impl<S: TrackerSession> RoutingContext<S> {
    /// Resolve the operator and `project` (with its members) over `session`.
    pub async fn connect(session: S, project: &str) -> Result<RoutingContext<S>, TriageError> {
        let operator = session.current_user().await?;
        let project = session.resolve_project(project).await?;
        info!(
            "filing tickets in project {} (id {}, {} members) as {}",
            project.identifier,
            project.id,
            project.members.len(),
            operator.name
        );
        Ok(RoutingContext {
            session,
            operator,
            project,
        })
    }
}

impl<S> RoutingContext<S> {
    pub fn new(session: S, operator: Identity, project: Project) -> RoutingContext<S> {
        RoutingContext {
            session,
            operator,
            project,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn operator(&self) -> &Identity {
        &self.operator
    }

    pub fn project(&self) -> &Project {
        &self.project
    }
}

/// Who a ticket ended up assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// The owner of the matched rule (or the default owner, when nothing
    /// matched) is a project member.
    Owner(Identity),
    /// The wanted owner isn't a project member but the default owner is.
    DefaultOwner { wanted: Owner, assignee: Identity },
    /// Neither the wanted owner nor the default owner are project members.
    /// The ticket is filed without an assignee.
    Unassigned { wanted: Owner },
}

impl Assignment {
    pub fn assignee(&self) -> Option<&Identity> {
        match self {
            Assignment::Owner(assignee) | Assignment::DefaultOwner { assignee, .. } => {
                Some(assignee)
            }
            Assignment::Unassigned { .. } => None,
        }
    }

    /// The wanted owner couldn't be assigned.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Assignment::Owner(_))
    }
}

/// A ticket the router filed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedIssue {
    pub id: IssueId,
    pub assignment: Assignment,
}

/// Files one ticket per dump, assigned according to an [`OwnershipTable`].
pub struct TicketRouter<'a, S> {
    context: &'a RoutingContext<S>,
    ownership: &'a OwnershipTable,
}

impl<'a, S: TrackerSession> TicketRouter<'a, S> {
    pub fn new(context: &'a RoutingContext<S>, ownership: &'a OwnershipTable) -> Self {
        TicketRouter { context, ownership }
    }

    /// The owner a classification calls for.
    pub fn wanted_owner(&self, classification: &Classification<'_>) -> &'a Owner {
        match classification.matched_filter() {
            Some(filter) => self.ownership.owner_for(filter),
            None => self.ownership.default_owner(),
        }
    }

    /// Resolve the wanted owner against the project members, falling back to
    /// the default owner and then to no assignee at all.
    pub fn assign(&self, classification: &Classification<'_>) -> Assignment {
        let wanted = self.wanted_owner(classification);
        let project = &self.context.project;
        if let Some(member) = project.member(wanted.name()) {
            return Assignment::Owner(member.clone());
        }
        let default_owner = self.ownership.default_owner();
        match project.member(default_owner.name()) {
            Some(member) => {
                warn!(
                    "{wanted} is not a member of {}, assigning {default_owner} instead",
                    project.identifier
                );
                Assignment::DefaultOwner {
                    wanted: wanted.clone(),
                    assignee: member.clone(),
                }
            }
            None => {
                warn!(
                    "neither {wanted} nor {default_owner} are members of {}, leaving the ticket unassigned",
                    project.identifier
                );
                Assignment::Unassigned {
                    wanted: wanted.clone(),
                }
            }
        }
    }

    /// The issue body: where the dump is, what matched, and the full stack.
    pub fn describe(
        &self,
        dump: &Path,
        fault: &FaultEvent,
        classification: &Classification<'_>,
    ) -> String {
        let mut lines = vec![
            format!("Crash dump: {}", dump.display()),
            format!("Faulting thread: {:#x}", fault.thread_id),
        ];
        if let Some(reason) = &fault.reason {
            lines.push(match fault.address {
                Some(address) => format!("Fault: {reason} at {address:#x}"),
                None => format!("Fault: {reason}"),
            });
        }
        lines.push(match classification.matched {
            Some(m) => format!(
                "Matched rule: {} on frame {} (owner: {})",
                m.filter,
                m.frame_index,
                self.ownership.owner_for(m.filter)
            ),
            None => format!(
                "Matched rule: none (default owner: {})",
                self.ownership.default_owner()
            ),
        });
        lines.push(String::new());
        lines.push("Call stack of the last fault event:".to_owned());
        lines.push("<pre>".to_owned());
        lines.extend(stack_lines(
            classification.stack,
            classification.matched.map(|m| m.frame_index),
            false,
        ));
        lines.push("</pre>".to_owned());

        let mut description = lines.join("\n");
        description.push('\n');
        description
    }

    /// File the ticket for `dump`. Exactly one issue is created per call.
    pub async fn route(
        &self,
        dump: &Path,
        fault: &FaultEvent,
        classification: &Classification<'_>,
    ) -> Result<RoutedIssue, TriageError> {
        let assignment = self.assign(classification);
        let draft = IssueDraft {
            project_id: self.context.project.id,
            subject: ISSUE_SUBJECT.to_owned(),
            description: self.describe(dump, fault, classification),
            assignee: assignment.assignee().map(|assignee| assignee.id),
            author: self.context.operator.id,
        };
        let id = self
            .context
            .session
            .create_issue(&draft)
            .await
            .map_err(TriageError::TrackerUnavailable)?;
        info!(
            "filed issue #{id} for {} ({})",
            dump.display(),
            assignment
                .assignee()
                .map_or("unassigned", |assignee| assignee.name.as_str())
        );
        Ok(RoutedIssue { id, assignment })
    }
}
