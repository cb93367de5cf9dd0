//! Core types for the breakdown pipeline
//!
//! Defines the data exchanged between stages:
//! - Run identifiers and incoming requests
//! - Issue records returned by the tracker
//! - Structured per-persona analyses
//! - Work items (epics and stories) and the terminal result

use crate::error::{SynthesisError, UnknownPriority, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::str::FromStr;
use ulid::Ulid;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Incoming breakdown request
///
/// Created once per pipeline invocation and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownRequest {
    /// Tracker key of the feature to break down
    #[serde(default, alias = "jira_id", deserialize_with = "null_as_default")]
    pub issue_id: String,
    /// Extra context appended to the tracker description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Requester identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Write the synthesized items back to the tracker
    #[serde(
        default,
        alias = "create_jira_items",
        deserialize_with = "null_as_default"
    )]
    pub create_items: bool,
}

impl BreakdownRequest {
    /// Create request for an issue
    #[inline]
    pub fn new(issue_id: impl Into<String>) -> Self {
        Self {
            issue_id: issue_id.into(),
            ..Self::default()
        }
    }

    /// With additional description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With requester identity
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// With write-back flag
    #[inline]
    #[must_use]
    pub fn with_create_items(mut self, create_items: bool) -> Self {
        self.create_items = create_items;
        self
    }

    /// Parse a request body
    ///
    /// Accepts a JSON object, or a JSON string whose content is itself a
    /// JSON object.
    ///
    /// # Errors
    /// - `ValidationError::Malformed` if the body is not a request object
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_str(input).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode a request from an already-parsed JSON value
    ///
    /// # Errors
    /// - `ValidationError::Malformed` if the value is not a request object
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        let value = match value {
            serde_json::Value::String(inner) => serde_json::from_str(&inner)
                .map_err(|e| ValidationError::Malformed(e.to_string()))?,
            other => other,
        };

        if !value.is_object() {
            return Err(ValidationError::Malformed(
                "request must be a JSON object".to_string(),
            ));
        }

        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Validate request fields
    ///
    /// # Errors
    /// - `ValidationError::MissingIssueId` if `issue_id` is blank
    /// - `ValidationError::InvalidIssueId` if it contains whitespace
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.issue_id.trim().is_empty() {
            return Err(ValidationError::MissingIssueId);
        }
        if self.issue_id.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidIssueId(self.issue_id.clone()));
        }
        Ok(())
    }
}

/// Project key of an issue identifier (`PROJ-12` -> `PROJ`)
#[must_use]
pub fn project_key(issue_id: &str) -> &str {
    issue_id
        .rsplit_once('-')
        .map_or(issue_id, |(project, _)| project)
}

/// Structured issue returned by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    /// Tracker key
    pub id: String,
    /// One-line summary
    pub summary: String,
    /// Body text
    #[serde(default)]
    pub description: Option<String>,
    /// Workflow status
    #[serde(default)]
    pub status: String,
    /// Owning project
    #[serde(default)]
    pub project: String,
    /// Issue type (Story, Feature, ...)
    #[serde(default)]
    pub issue_type: String,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Assignee
    #[serde(default)]
    pub assignee: Option<String>,
    /// Reporter
    #[serde(default)]
    pub reporter: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Components
    #[serde(default)]
    pub components: BTreeSet<String>,
}

impl IssueRecord {
    /// Record returned when no real tracker is wired in
    pub fn placeholder(issue_id: impl Into<String>) -> Self {
        let id = issue_id.into();
        Self {
            summary: format!("Feature from {id}"),
            description: Some("Placeholder issue description".to_string()),
            status: "Open".to_string(),
            project: project_key(&id).to_string(),
            issue_type: "Story".to_string(),
            priority: Priority::Medium,
            assignee: None,
            reporter: "system".to_string(),
            labels: BTreeSet::new(),
            components: BTreeSet::new(),
            id,
        }
    }

    /// Text handed to every persona
    ///
    /// Tracker fields first, then the caller's additional context if any.
    #[must_use]
    pub fn feature_description(&self, additional: Option<&str>) -> String {
        let mut parts = vec![
            format!("Issue ID: {}", self.id),
            format!("Summary: {}", self.summary),
            format!(
                "Description: {}",
                self.description.as_deref().unwrap_or("No description")
            ),
        ];

        if let Some(extra) = additional.map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(format!("Additional Context: {extra}"));
        }

        parts.join("\n\n")
    }
}

/// Persona's estimate of implementation complexity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    /// Persona could not tell
    #[default]
    Unknown,
    /// Small change
    Low,
    /// Moderate change
    Medium,
    /// Large change
    High,
}

impl Complexity {
    /// Story points per story at this complexity
    #[inline]
    #[must_use]
    pub fn story_points(self) -> u32 {
        match self {
            Self::Low => 2,
            Self::Medium | Self::Unknown => 3,
            Self::High => 5,
        }
    }
}

/// Structured analysis produced by one persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaAnalysis {
    /// Persona key
    pub persona: String,
    /// Free-text analysis
    #[serde(default)]
    pub analysis: String,
    /// Complexity estimate
    #[serde(default, alias = "estimatedComplexity")]
    pub estimated_complexity: Complexity,
    /// Raised concerns
    #[serde(default)]
    pub concerns: Vec<String>,
    /// Recommended work
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Components the persona expects to change
    #[serde(default, alias = "requiredComponents")]
    pub required_components: Vec<String>,
    /// Persona-defined extra fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PersonaAnalysis {
    /// Create empty analysis for a persona
    pub fn new(persona: impl Into<String>, analysis: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            analysis: analysis.into(),
            estimated_complexity: Complexity::Unknown,
            concerns: Vec::new(),
            recommendations: Vec::new(),
            required_components: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// With complexity estimate
    #[inline]
    #[must_use]
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.estimated_complexity = complexity;
        self
    }

    /// With a concern
    #[inline]
    #[must_use]
    pub fn with_concern(mut self, concern: impl Into<String>) -> Self {
        self.concerns.push(concern.into());
        self
    }

    /// With a recommendation
    #[inline]
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    /// With a required component
    #[inline]
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.required_components.push(component.into());
        self
    }

    /// Check if the analysis gives the synthesizer anything to work with
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !self.recommendations.is_empty() || !self.concerns.is_empty()
    }
}

/// Analyses keyed by persona, one entry per successful persona
pub type AgentAnalyses = BTreeMap<String, PersonaAnalysis>;

/// Work item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Groups stories
    Epic,
    /// Actionable unit
    Story,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epic => write!(f, "epic"),
            Self::Story => write!(f, "story"),
        }
    }
}

/// Work item priority
///
/// Ordered from `Lowest` to `Highest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Lowest
    Lowest,
    /// Low
    Low,
    /// Medium (default)
    #[default]
    Medium,
    /// High
    High,
    /// Highest
    Highest,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lowest => "Lowest",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Highest => "Highest",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lowest" => Ok(Self::Lowest),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "highest" => Ok(Self::Highest),
            _ => Err(UnknownPriority(s.to_string())),
        }
    }
}

/// Epic or story produced by synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Item kind
    #[serde(rename = "item_type")]
    pub kind: ItemKind,
    /// Title (epic titles double as parent references)
    pub title: String,
    /// Description
    pub description: String,
    /// Acceptance criteria, in order
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Story points
    #[serde(default, rename = "story_points")]
    pub estimate: Option<u32>,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Affected components
    #[serde(default)]
    pub components: BTreeSet<String>,
    /// Labels
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Parent epic title (stories only)
    #[serde(default, rename = "parent_epic")]
    pub parent: Option<String>,
}

impl WorkItem {
    fn new(kind: ItemKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
            estimate: None,
            priority: Priority::Medium,
            components: BTreeSet::new(),
            labels: BTreeSet::new(),
            parent: None,
        }
    }

    /// Create an epic
    pub fn epic(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(ItemKind::Epic, title, description)
    }

    /// Create a story
    pub fn story(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(ItemKind::Story, title, description)
    }

    /// With acceptance criterion
    #[inline]
    #[must_use]
    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    /// With story points
    #[inline]
    #[must_use]
    pub fn with_estimate(mut self, points: u32) -> Self {
        self.estimate = Some(points);
        self
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// With component
    #[inline]
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.insert(component.into());
        self
    }

    /// With label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// With parent epic
    #[inline]
    #[must_use]
    pub fn with_parent(mut self, epic_title: impl Into<String>) -> Self {
        self.parent = Some(epic_title.into());
        self
    }
}

/// Synthesized epics and stories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    /// Higher-level items
    pub epics: Vec<WorkItem>,
    /// Actionable items
    pub stories: Vec<WorkItem>,
}

impl Breakdown {
    /// Create breakdown from item lists
    #[inline]
    #[must_use]
    pub fn new(epics: Vec<WorkItem>, stories: Vec<WorkItem>) -> Self {
        Self { epics, stories }
    }

    /// Check structural integrity
    ///
    /// # Errors
    /// - `SynthesisError::NoEpics` if there are no epics
    /// - `SynthesisError::WrongKind` if an item sits in the wrong list
    /// - `SynthesisError::DuplicateEpic` if two epics share a title
    /// - `SynthesisError::DanglingParent` if a story parent names no epic
    pub fn validate(&self) -> Result<(), SynthesisError> {
        if self.epics.is_empty() {
            return Err(SynthesisError::NoEpics);
        }

        let mut titles = HashSet::with_capacity(self.epics.len());
        for epic in &self.epics {
            if epic.kind != ItemKind::Epic {
                return Err(SynthesisError::WrongKind {
                    title: epic.title.clone(),
                    expected: ItemKind::Epic,
                    found: epic.kind,
                });
            }
            if !titles.insert(epic.title.as_str()) {
                return Err(SynthesisError::DuplicateEpic(epic.title.clone()));
            }
        }

        for story in &self.stories {
            if story.kind != ItemKind::Story {
                return Err(SynthesisError::WrongKind {
                    title: story.title.clone(),
                    expected: ItemKind::Story,
                    found: story.kind,
                });
            }
            if let Some(parent) = &story.parent {
                if !titles.contains(parent.as_str()) {
                    return Err(SynthesisError::DanglingParent {
                        story: story.title.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Total number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.epics.len() + self.stories.len()
    }

    /// Check if there are no items
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.epics.is_empty() && self.stories.is_empty()
    }

    /// Sum of story points across stories
    #[must_use]
    pub fn total_points(&self) -> u32 {
        self.stories.iter().filter_map(|s| s.estimate).sum()
    }

    /// Every component named by any item
    #[must_use]
    pub fn components(&self) -> BTreeSet<&str> {
        self.epics
            .iter()
            .chain(&self.stories)
            .flat_map(|item| item.components.iter().map(String::as_str))
            .collect()
    }

    /// Human-readable synopsis
    #[must_use]
    pub fn summary(&self) -> String {
        let components: Vec<&str> = self.components().into_iter().collect();
        let components = if components.is_empty() {
            "none".to_string()
        } else {
            components.join(", ")
        };

        format!(
            "Feature breakdown completed:\n\
             - {} epic(s) identified\n\
             - {} story/stories created\n\
             - Total estimated story points: {}\n\
             - Components involved: {}",
            self.epics.len(),
            self.stories.len(),
            self.total_points(),
            components,
        )
    }
}

/// Terminal artifact of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownResult {
    /// Run that produced this result
    pub run_id: RunId,
    /// Requested issue
    pub original_issue_id: String,
    /// Summary of the requested issue
    pub original_summary: String,
    /// Generated synopsis
    pub breakdown_summary: String,
    /// Epics
    pub epics: Vec<WorkItem>,
    /// Stories
    pub stories: Vec<WorkItem>,
    /// Successful persona analyses
    pub agent_analyses: AgentAnalyses,
    /// Tracker keys of written items, epics first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_items: Option<Vec<String>>,
    /// End-to-end duration in seconds
    pub processing_time: f64,
    /// Completion time
    pub timestamp: DateTime<Utc>,
}
