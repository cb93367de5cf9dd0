//! Issue tracker collaborators
//!
//! The pipeline only sees two narrow traits: [`IssueFetcher`] for reading the
//! requested issue and [`IssueWriter`] for creating synthesized items. Two
//! reference implementations ship with the crate:
//! - [`PlaceholderTracker`] returns fixed sample data, for wiring tests
//! - [`InMemoryTracker`] serves issues seeded from a JSON/YAML file

use crate::error::{BreakdownError, TrackerError};
use crate::types::{project_key, Breakdown, IssueRecord, ItemKind, WorkItem};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Reads issues from the tracker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueFetcher: Send + Sync {
    /// Fetch a structured issue record
    ///
    /// # Errors
    /// - `TrackerError::NotFound` if the identifier does not resolve
    /// - `TrackerError::Upstream` for transport or auth failures
    async fn fetch(&self, issue_id: &str) -> Result<IssueRecord, TrackerError>;
}

/// Creates items in the tracker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueWriter: Send + Sync {
    /// Create one item in `project`, returning its tracker key
    ///
    /// `parent_key` is the key already assigned to the story's parent epic.
    ///
    /// # Errors
    /// - `TrackerError::Upstream` on any write failure
    async fn create_item(
        &self,
        project: &str,
        item: &WorkItem,
        parent_key: Option<String>,
    ) -> Result<String, TrackerError>;
}

/// Fetch an issue with a deadline
///
/// # Errors
/// - `BreakdownError::NotFound` if the issue does not exist
/// - `BreakdownError::Upstream` on tracker failure or timeout
pub async fn fetch_issue(
    fetcher: &dyn IssueFetcher,
    issue_id: &str,
    timeout: Duration,
) -> Result<IssueRecord, BreakdownError> {
    match tokio::time::timeout(timeout, fetcher.fetch(issue_id)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(BreakdownError::Upstream(format!(
            "fetching {issue_id} timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Write a breakdown to the tracker, epics first
///
/// Items are created one at a time. Each story is linked to the key of its
/// parent epic. The first failure stops the write; nothing already created is
/// rolled back, and the error message lists those keys.
///
/// # Errors
/// - `BreakdownError::Upstream` on the first failed, timed out or keyless write
pub async fn write_items(
    writer: &dyn IssueWriter,
    project: &str,
    breakdown: &Breakdown,
    timeout: Duration,
) -> Result<Vec<String>, BreakdownError> {
    let mut created = Vec::with_capacity(breakdown.len());
    let mut epic_keys: HashMap<&str, String> = HashMap::with_capacity(breakdown.epics.len());

    for item in breakdown.epics.iter().chain(&breakdown.stories) {
        let parent_key = item
            .parent
            .as_deref()
            .and_then(|title| epic_keys.get(title).cloned());

        let outcome = tokio::time::timeout(timeout, writer.create_item(project, item, parent_key))
            .await
            .unwrap_or_else(|_| {
                Err(TrackerError::upstream(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )))
            })
            .and_then(|key| {
                if key.trim().is_empty() {
                    Err(TrackerError::upstream("tracker returned an empty key"))
                } else {
                    Ok(key)
                }
            });

        match outcome {
            Ok(key) => {
                tracing::debug!(kind = %item.kind, title = %item.title, %key, "Created item");
                if item.kind == ItemKind::Epic {
                    epic_keys.insert(item.title.as_str(), key.clone());
                }
                created.push(key);
            }
            Err(err) => {
                tracing::warn!(
                    kind = %item.kind,
                    title = %item.title,
                    created = created.len(),
                    %err,
                    "Write-back failed"
                );
                return Err(BreakdownError::Upstream(format!(
                    "failed to create {} {:?}: {err}; already created: [{}]",
                    item.kind,
                    item.title,
                    created.join(", ")
                )));
            }
        }
    }

    Ok(created)
}

/// Tracker stand-in returning fixed sample data
///
/// Created keys are `{project}-{n}` with `n` counting up from 1000.
#[derive(Debug)]
pub struct PlaceholderTracker {
    next: AtomicU64,
}

impl PlaceholderTracker {
    /// First number handed out
    pub const FIRST_KEY: u64 = 1000;

    /// Create placeholder tracker
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(Self::FIRST_KEY),
        }
    }
}

impl Default for PlaceholderTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IssueFetcher for PlaceholderTracker {
    async fn fetch(&self, issue_id: &str) -> Result<IssueRecord, TrackerError> {
        Ok(IssueRecord::placeholder(issue_id))
    }
}

#[async_trait]
impl IssueWriter for PlaceholderTracker {
    async fn create_item(
        &self,
        project: &str,
        _item: &WorkItem,
        _parent_key: Option<String>,
    ) -> Result<String, TrackerError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{project}-{n}"))
    }
}

/// Item created through [`InMemoryTracker`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedItem {
    /// Assigned key
    pub key: String,
    /// Key of the parent epic
    pub parent_key: Option<String>,
    /// Item as written
    pub item: WorkItem,
}

#[derive(Debug, Default)]
struct TrackerState {
    issues: BTreeMap<String, IssueRecord>,
    next_number: HashMap<String, u64>,
    created: Vec<CreatedItem>,
}

impl TrackerState {
    fn insert(&mut self, mut issue: IssueRecord) {
        if issue.project.is_empty() {
            issue.project = project_key(&issue.id).to_string();
        }
        if let Some(n) = issue
            .id
            .rsplit_once('-')
            .and_then(|(_, n)| n.parse::<u64>().ok())
        {
            let next = self.next_number.entry(issue.project.clone()).or_insert(1);
            *next = (*next).max(n + 1);
        }
        self.issues.insert(issue.id.clone(), issue);
    }
}

/// Tracker backed by an in-memory issue map
///
/// Created items become fetchable issues of their own.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<TrackerState>,
}

impl InMemoryTracker {
    /// Create tracker seeded with issues
    pub fn new(issues: impl IntoIterator<Item = IssueRecord>) -> Self {
        let mut state = TrackerState::default();
        for issue in issues {
            state.insert(issue);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Load seed issues from a `.json` file, or YAML otherwise
    ///
    /// # Errors
    /// - `BreakdownError::Config` if the file cannot be read or parsed
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BreakdownError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BreakdownError::Config(format!("{}: {e}", path.display())))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let issues: Vec<IssueRecord> = if is_json {
            serde_json::from_str(&text).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&text).map_err(|e| e.to_string())
        }
        .map_err(|e| BreakdownError::Config(format!("{}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), count = issues.len(), "Loaded tracker seed");
        Ok(Self::new(issues))
    }

    /// Number of issues, including created ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().issues.len()
    }

    /// Check if the tracker holds no issues
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().issues.is_empty()
    }

    /// Items created so far, in creation order
    #[must_use]
    pub fn created(&self) -> Vec<CreatedItem> {
        self.state.lock().created.clone()
    }
}

#[async_trait]
impl IssueFetcher for InMemoryTracker {
    async fn fetch(&self, issue_id: &str) -> Result<IssueRecord, TrackerError> {
        self.state
            .lock()
            .issues
            .get(issue_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(issue_id.to_string()))
    }
}

#[async_trait]
impl IssueWriter for InMemoryTracker {
    async fn create_item(
        &self,
        project: &str,
        item: &WorkItem,
        parent_key: Option<String>,
    ) -> Result<String, TrackerError> {
        let mut state = self.state.lock();

        let next = state.next_number.entry(project.to_string()).or_insert(1);
        let key = format!("{project}-{next}");
        *next += 1;

        let issue_type = match item.kind {
            ItemKind::Epic => "Epic",
            ItemKind::Story => "Story",
        };
        state.issues.insert(
            key.clone(),
            IssueRecord {
                id: key.clone(),
                summary: item.title.clone(),
                description: Some(item.description.clone()),
                status: "Open".to_string(),
                project: project.to_string(),
                issue_type: issue_type.to_string(),
                priority: item.priority,
                assignee: None,
                reporter: "breakdown".to_string(),
                labels: item.labels.clone(),
                components: item.components.clone(),
            },
        );
        state.created.push(CreatedItem {
            key: key.clone(),
            parent_key,
            item: item.clone(),
        });

        Ok(key)
    }
}
