//! Breakdown synthesis
//!
//! Turns the per-persona analyses into epics and stories. The
//! [`HeuristicSynthesizer`] is deterministic: components that personas agree
//! on become epics, recommendations and concerns become stories under them.
//! With nothing to work from it degrades to a fixed generic breakdown rather
//! than failing.

use crate::error::SynthesisError;
use crate::types::{AgentAnalyses, Breakdown, Complexity, IssueRecord, Priority, WorkItem};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};

/// Title of the epic used by the generic breakdown
pub const GENERIC_EPIC: &str = "Core Feature Implementation";

/// Produces epics and stories from persona analyses
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize a breakdown
    ///
    /// Must tolerate an empty analysis map.
    ///
    /// # Errors
    /// - `SynthesisError` if no usable breakdown can be produced
    async fn synthesize(
        &self,
        issue: &IssueRecord,
        analyses: &AgentAnalyses,
    ) -> Result<Breakdown, SynthesisError>;
}

/// Minimal breakdown used when no persona produced actionable output
#[must_use]
pub fn generic_breakdown(issue: &IssueRecord) -> Breakdown {
    let mut epic = WorkItem::epic(
        GENERIC_EPIC,
        "Main feature implementation based on agent analysis",
    )
    .with_criterion("Feature works as expected")
    .with_criterion("Passes all tests")
    .with_label("feature")
    .with_label("ai-generated");
    epic.components = if issue.components.is_empty() {
        ["backend", "frontend"].into_iter().map(String::from).collect()
    } else {
        issue.components.clone()
    };

    let stories = vec![
        WorkItem::story("Backend API Development", "Develop backend APIs for the feature")
            .with_criterion("API endpoints created")
            .with_criterion("Tests pass")
            .with_estimate(5)
            .with_component("backend")
            .with_label("backend")
            .with_label("api")
            .with_parent(GENERIC_EPIC),
        WorkItem::story("Frontend UI Implementation", "Create frontend user interface")
            .with_criterion("UI components created")
            .with_criterion("UX requirements met")
            .with_estimate(3)
            .with_component("frontend")
            .with_label("frontend")
            .with_label("ui")
            .with_parent(GENERIC_EPIC),
    ];

    Breakdown::new(vec![epic], stories)
}

/// Consensus complexity: most frequent known estimate, ties to the higher one
#[must_use]
pub fn consensus_complexity(analyses: &AgentAnalyses) -> Complexity {
    let mut counts: HashMap<Complexity, usize> = HashMap::new();
    for analysis in analyses.values() {
        if analysis.estimated_complexity != Complexity::Unknown {
            *counts.entry(analysis.estimated_complexity).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(complexity, count)| (count, complexity))
        .map_or(Complexity::Unknown, |(complexity, _)| complexity)
}

/// Text gathered from several personas, merged case-insensitively
#[derive(Debug)]
struct Finding {
    text: String,
    backers: BTreeSet<String>,
}

fn collect_findings<'a>(
    entries: impl Iterator<Item = (&'a str, &'a [String])>,
) -> Vec<Finding> {
    let mut findings: IndexMap<String, Finding> = IndexMap::new();
    for (persona, texts) in entries {
        for text in texts {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            findings
                .entry(text.to_lowercase())
                .or_insert_with(|| Finding {
                    text: text.to_string(),
                    backers: BTreeSet::new(),
                })
                .backers
                .insert(persona.to_string());
        }
    }
    findings.into_values().collect()
}

/// Component named by personas, with its display spelling
#[derive(Debug)]
struct ComponentVote {
    key: String,
    name: String,
    votes: usize,
}

fn rank_components(analyses: &AgentAnalyses) -> Vec<ComponentVote> {
    let mut votes: HashMap<String, ComponentVote> = HashMap::new();
    for analysis in analyses.values() {
        let named: BTreeSet<String> = analysis
            .required_components
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_lowercase)
            .collect();
        for key in named {
            let display = analysis
                .required_components
                .iter()
                .map(|c| c.trim())
                .find(|c| c.to_lowercase() == key)
                .unwrap_or(key.as_str())
                .to_string();
            votes
                .entry(key.clone())
                .or_insert(ComponentVote {
                    key,
                    name: display,
                    votes: 0,
                })
                .votes += 1;
        }
    }

    let mut ranked: Vec<ComponentVote> = votes.into_values().collect();
    ranked.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.key.cmp(&b.key)));
    ranked
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Epic under construction, with the component it covers
#[derive(Debug)]
struct EpicSlot {
    component: Option<String>,
    item: WorkItem,
    stories: usize,
}

/// Deterministic synthesizer driven by structured analyses
#[derive(Debug, Clone, Copy)]
pub struct HeuristicSynthesizer {
    max_epics: usize,
}

impl HeuristicSynthesizer {
    /// Create synthesizer with an epic limit
    #[inline]
    #[must_use]
    pub fn new(max_epics: usize) -> Self {
        Self {
            max_epics: max_epics.max(1),
        }
    }

    fn epic_slots(&self, issue: &IssueRecord, analyses: &AgentAnalyses) -> Vec<EpicSlot> {
        let ranked = rank_components(analyses);
        if ranked.is_empty() {
            let title = match issue.summary.trim() {
                "" => GENERIC_EPIC.to_string(),
                summary => summary.to_string(),
            };
            let mut item = WorkItem::epic(
                title,
                format!("Implementation of {} as analyzed by the personas", issue.id),
            )
            .with_criterion("All child stories complete")
            .with_criterion("Passes all tests")
            .with_label("ai-generated");
            item.components.clone_from(&issue.components);
            return vec![EpicSlot {
                component: None,
                item,
                stories: 0,
            }];
        }

        ranked
            .into_iter()
            .take(self.max_epics)
            .map(|vote| {
                let item = WorkItem::epic(
                    format!("{} Implementation", capitalize(&vote.name)),
                    format!(
                        "Changes to {} for {}, named by {} persona(s)",
                        vote.name, issue.id, vote.votes
                    ),
                )
                .with_criterion(format!("All {} stories complete", vote.name))
                .with_criterion("Passes all tests")
                .with_component(vote.name.clone())
                .with_label("ai-generated");
                EpicSlot {
                    component: Some(vote.key),
                    item,
                    stories: 0,
                }
            })
            .collect()
    }
}

impl Default for HeuristicSynthesizer {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Index of the epic a story text belongs to
fn place(slots: &[EpicSlot], text: &str) -> usize {
    let text = text.to_lowercase();
    slots
        .iter()
        .position(|slot| {
            slot.component
                .as_deref()
                .is_some_and(|component| text.contains(component))
        })
        .unwrap_or(0)
}

#[async_trait]
impl Synthesizer for HeuristicSynthesizer {
    async fn synthesize(
        &self,
        issue: &IssueRecord,
        analyses: &AgentAnalyses,
    ) -> Result<Breakdown, SynthesisError> {
        if !analyses.values().any(|a| a.is_actionable()) {
            tracing::debug!(
                personas = analyses.len(),
                "No actionable analyses, using generic breakdown"
            );
            return Ok(generic_breakdown(issue));
        }

        let mut slots = self.epic_slots(issue, analyses);
        let points = consensus_complexity(analyses).story_points();
        let contributors = analyses.len();

        let recommendations = collect_findings(
            analyses
                .iter()
                .map(|(k, a)| (k.as_str(), a.recommendations.as_slice())),
        );
        let concerns = collect_findings(
            analyses
                .iter()
                .map(|(k, a)| (k.as_str(), a.concerns.as_slice())),
        );

        let mut stories = Vec::with_capacity(recommendations.len() + concerns.len());

        for finding in recommendations {
            let slot = place(&slots, &finding.text);
            let priority = if finding.backers.len() * 2 > contributors {
                Priority::High
            } else {
                Priority::Medium
            };
            let backers: Vec<&str> = finding.backers.iter().map(String::as_str).collect();

            let mut story = WorkItem::story(
                finding.text.clone(),
                format!("{}\n\nRecommended by: {}", finding.text, backers.join(", ")),
            )
            .with_criterion("Recommendation implemented as described")
            .with_criterion("Covered by automated tests")
            .with_estimate(points)
            .with_priority(priority)
            .with_label("ai-generated")
            .with_parent(slots[slot].item.title.clone());
            story.components.clone_from(&slots[slot].item.components);

            slots[slot].stories += 1;
            stories.push(story);
        }

        for finding in concerns {
            let slot = place(&slots, &finding.text);
            let backers: Vec<&str> = finding.backers.iter().map(String::as_str).collect();

            let mut story = WorkItem::story(
                format!("Mitigate risk: {}", finding.text),
                format!("{}\n\nRaised by: {}", finding.text, backers.join(", ")),
            )
            .with_criterion("Risk assessed and mitigation documented")
            .with_criterion("Mitigation verified")
            .with_estimate(points)
            .with_priority(Priority::High)
            .with_label("risk")
            .with_label("ai-generated")
            .with_parent(slots[slot].item.title.clone());
            story.components.clone_from(&slots[slot].item.components);

            slots[slot].stories += 1;
            stories.push(story);
        }

        let epics: Vec<WorkItem> = slots
            .into_iter()
            .enumerate()
            .filter(|(index, slot)| *index == 0 || slot.stories > 0)
            .map(|(_, mut slot)| {
                slot.item.priority = stories
                    .iter()
                    .filter(|s| s.parent.as_deref() == Some(slot.item.title.as_str()))
                    .map(|s| s.priority)
                    .max()
                    .unwrap_or_default();
                slot.item
            })
            .collect();

        tracing::debug!(
            epics = epics.len(),
            stories = stories.len(),
            points,
            "Synthesized breakdown"
        );
        Ok(Breakdown::new(epics, stories))
    }
}
