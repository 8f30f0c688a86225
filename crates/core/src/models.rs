use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    #[serde(alias = "gh")]
    GitHub,
    #[serde(alias = "bb")]
    Bitbucket,
}

impl VcsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Bitbucket => "bitbucket",
        }
    }

    /// Short form used in CircleCI project slugs.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::GitHub => "gh",
            Self::Bitbucket => "bb",
        }
    }
}

impl FromStr for VcsKind {
    type Err = ProjectParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" | "gh" => Ok(Self::GitHub),
            "bitbucket" | "bb" => Ok(Self::Bitbucket),
            _ => Err(ProjectParseError::UnknownVcs(s.to_string())),
        }
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProjectParseError {
    #[error("invalid project `{0}`, expected `<vcs>/<owner>/<repository>`")]
    Malformed(String),
    #[error("unknown VCS `{0}`, expected `github` or `bitbucket`")]
    UnknownVcs(String),
}

/// A CI project: one source repository on one VCS provider.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProjectIdentifier {
    pub vcs: VcsKind,
    pub owner: String,
    pub repository: String,
}

impl ProjectIdentifier {
    pub fn new(vcs: VcsKind, owner: impl Into<String>, repository: impl Into<String>) -> Self {
        Self { vcs, owner: owner.into(), repository: repository.into() }
    }

    /// Project slug as understood by the CircleCI v2 API, e.g. `gh/acme/widgets`.
    pub fn slug(&self) -> String {
        format!("{}/{}/{}", self.vcs.slug(), self.owner, self.repository)
    }

    pub fn full_name(&self) -> String { format!("{}/{}", self.owner, self.repository) }

    pub fn pipelines_url(&self) -> String {
        format!(
            "https://app.circleci.com/pipelines/{}/{}/{}",
            self.vcs.as_str(),
            self.owner,
            self.repository
        )
    }

    pub fn to_markdown(&self) -> String {
        format!("[{}]({})", self.full_name(), self.pipelines_url())
    }
}

impl FromStr for ProjectIdentifier {
    type Err = ProjectParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().trim_matches('/').split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(vcs), Some(owner), Some(repository), None)
                if !owner.is_empty() && !repository.is_empty() =>
            {
                Ok(Self::new(vcs.parse()?, owner, repository))
            }
            _ => Err(ProjectParseError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for ProjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.vcs, self.owner, self.repository)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unknown subscription flag `{flag}`")]
pub struct UnknownFlagError {
    pub flag: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionFlag {
    /// Only notify for failed jobs.
    OnlyFailedJobs,
}

impl SubscriptionFlag {
    pub const fn variants() -> &'static [Self] { &[Self::OnlyFailedJobs] }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlyFailedJobs => "only-failed-jobs",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::OnlyFailedJobs => "Only receive notifications for failed jobs",
        }
    }
}

impl FromStr for SubscriptionFlag {
    type Err = UnknownFlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "only-failed-jobs" => Ok(Self::OnlyFailedJobs),
            _ => Err(UnknownFlagError { flag: s.to_string() }),
        }
    }
}

/// Filters attached to a subscription. Stored sorted, so the display form does not
/// depend on the order flags were given in.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionFlags(BTreeSet<SubscriptionFlag>);

impl SubscriptionFlags {
    pub fn add_flag(&mut self, name: &str) -> Result<(), UnknownFlagError> {
        self.0.insert(name.parse()?);
        Ok(())
    }

    pub fn contains(&self, flag: SubscriptionFlag) -> bool { self.0.contains(&flag) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = SubscriptionFlag> + '_ { self.0.iter().copied() }
}

impl FromIterator<SubscriptionFlag> for SubscriptionFlags {
    fn from_iter<T: IntoIterator<Item = SubscriptionFlag>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for SubscriptionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        for (i, flag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(flag.as_str())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub channel_id: String,
    pub creator_id: String,
    #[serde(default)]
    pub flags: SubscriptionFlags,
    pub project: ProjectIdentifier,
}

impl Subscription {
    /// Whether this subscription has the identity key `(channel_id, project)`.
    pub fn is_for(&self, channel_id: &str, project: &ProjectIdentifier) -> bool {
        self.channel_id == channel_id && self.project == *project
    }
}

/// Every subscription of an installation, persisted as a single document.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl SubscriptionList {
    /// Insert `subscription`, or replace the flags and creator of the existing entry with
    /// the same channel and project. Returns `true` when an existing entry was updated.
    pub fn add_or_update(&mut self, subscription: Subscription) -> bool {
        match self
            .subscriptions
            .iter_mut()
            .find(|s| s.is_for(&subscription.channel_id, &subscription.project))
        {
            Some(existing) => {
                existing.flags = subscription.flags;
                existing.creator_id = subscription.creator_id;
                true
            }
            None => {
                self.subscriptions.push(subscription);
                false
            }
        }
    }

    /// Returns `false` if the channel was not subscribed to the project.
    pub fn remove(&mut self, channel_id: &str, project: &ProjectIdentifier) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| !s.is_for(channel_id, project));
        self.subscriptions.len() != before
    }

    pub fn by_channel<'a>(&'a self, channel_id: &'a str) -> impl Iterator<Item = &'a Subscription> {
        self.subscriptions.iter().filter(move |s| s.channel_id == channel_id)
    }

    pub fn for_project<'a>(
        &'a self,
        project: &'a ProjectIdentifier,
    ) -> impl Iterator<Item = &'a Subscription> {
        self.subscriptions.iter().filter(move |s| s.project == *project)
    }

    /// Channels of this installation watching `project`.
    pub fn channels_for_project(&self, project: &ProjectIdentifier) -> Vec<&str> {
        self.subscriptions
            .iter()
            .filter(|s| s.project == *project)
            .map(|s| s.channel_id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize { self.subscriptions.len() }

    pub fn is_empty(&self) -> bool { self.subscriptions.is_empty() }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    Success,
    Failed,
    AwaitingApproval,
    Running,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl EventStatus {
    pub fn is_failure(&self) -> bool { matches!(self, Self::Failed) }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Running => "running",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

/// An inbound CI notification, as posted by the notify step of a CI job.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CiEvent {
    pub project: ProjectIdentifier,
    pub workflow_id: String,
    pub job_name: String,
    pub status: EventStatus,
    #[serde(default)]
    pub approval_request_id: Option<String>,
    #[serde(default)]
    pub build_url: Option<String>,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl CiEvent {
    pub fn approval_request_id(&self) -> Option<&str> {
        self.approval_request_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn workflow_url(&self) -> String { workflow_run_url(&self.workflow_id) }
}

/// Context attached to the approve action of a notification. Read back verbatim when
/// the action is clicked.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApprovalContext {
    pub workflow_id: String,
    pub project: ProjectIdentifier,
}

/// Link to a workflow run in the CircleCI web app.
pub fn workflow_run_url(workflow_id: &str) -> String {
    format!("https://app.circleci.com/workflow-run/{workflow_id}")
}
