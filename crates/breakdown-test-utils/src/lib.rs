//! Testing utilities for the breakdown workspace
//!
//! Scripted collaborators, fixtures and progress helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use breakdown_core::{
    IssueFetcher, IssueRecord, IssueWriter, PersonaAnalysis, PersonaAnalyzer, PersonaConfig,
    PersonaError, PersonaRegistry, ProgressEvent, ProgressReporter, TrackerError, WorkItem,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// What a scripted persona does when analyzed
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed(PersonaAnalysis),
    Fail(String),
    /// Sleeps for an hour, for timeout tests under a paused clock
    Hang,
    Delay(Duration, PersonaAnalysis),
}

/// Analyzer whose per-persona behaviour is scripted up front
///
/// Unscripted personas succeed with [`default_analysis`].
#[derive(Debug, Default)]
pub struct ScriptedAnalyzer {
    outcomes: HashMap<String, Outcome>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn succeed(mut self, persona: &str, analysis: PersonaAnalysis) -> Self {
        self.outcomes
            .insert(persona.to_string(), Outcome::Succeed(analysis));
        self
    }

    #[must_use]
    pub fn fail(mut self, persona: &str, reason: &str) -> Self {
        self.outcomes
            .insert(persona.to_string(), Outcome::Fail(reason.to_string()));
        self
    }

    #[must_use]
    pub fn hang(mut self, persona: &str) -> Self {
        self.outcomes.insert(persona.to_string(), Outcome::Hang);
        self
    }

    #[must_use]
    pub fn delay(mut self, persona: &str, delay: Duration) -> Self {
        self.outcomes.insert(
            persona.to_string(),
            Outcome::Delay(delay, default_analysis(persona)),
        );
        self
    }

    /// Personas in the order they were invoked
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PersonaAnalyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        persona: &PersonaConfig,
        _description: &str,
    ) -> Result<PersonaAnalysis, PersonaError> {
        self.calls.lock().push(persona.persona.clone());

        match self.outcomes.get(&persona.persona).cloned() {
            None => Ok(default_analysis(&persona.persona)),
            Some(Outcome::Succeed(analysis)) => Ok(analysis),
            Some(Outcome::Fail(reason)) => Err(PersonaError::failed(&persona.persona, reason)),
            Some(Outcome::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(default_analysis(&persona.persona))
            }
            Some(Outcome::Delay(delay, analysis)) => {
                tokio::time::sleep(delay).await;
                Ok(analysis)
            }
        }
    }
}

pub fn default_analysis(persona: &str) -> PersonaAnalysis {
    PersonaAnalysis::new(persona, format!("{persona} scripted analysis"))
        .with_recommendation(format!("Implement {} changes", persona.to_lowercase()))
}

/// One call received by [`RecordingWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub project: String,
    pub title: String,
    pub parent_key: Option<String>,
}

/// Writer handing out `TEST-1`, `TEST-2`, … and recording every call
#[derive(Debug, Default)]
pub struct RecordingWriter {
    calls: Mutex<Vec<WriteCall>>,
    fail_at: Option<usize>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with this zero-based index
    pub fn failing_at(index: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_at: Some(index),
        }
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl IssueWriter for RecordingWriter {
    async fn create_item(
        &self,
        project: &str,
        item: &WorkItem,
        parent_key: Option<String>,
    ) -> Result<String, TrackerError> {
        let mut calls = self.calls.lock();
        let index = calls.len();
        calls.push(WriteCall {
            project: project.to_string(),
            title: item.title.clone(),
            parent_key,
        });

        if self.fail_at == Some(index) {
            return Err(TrackerError::upstream("503 service unavailable"));
        }
        Ok(format!("TEST-{}", index + 1))
    }
}

/// Tracker that is never reachable
#[derive(Debug, Default)]
pub struct UnreachableTracker;

#[async_trait]
impl IssueFetcher for UnreachableTracker {
    async fn fetch(&self, _issue_id: &str) -> Result<IssueRecord, TrackerError> {
        Err(TrackerError::upstream("connection refused"))
    }
}

#[async_trait]
impl IssueWriter for UnreachableTracker {
    async fn create_item(
        &self,
        _project: &str,
        _item: &WorkItem,
        _parent_key: Option<String>,
    ) -> Result<String, TrackerError> {
        Err(TrackerError::upstream("connection refused"))
    }
}

/// Tracker whose calls never return
#[derive(Debug, Default)]
pub struct StalledTracker;

#[async_trait]
impl IssueFetcher for StalledTracker {
    async fn fetch(&self, issue_id: &str) -> Result<IssueRecord, TrackerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(sample_issue(issue_id))
    }
}

#[async_trait]
impl IssueWriter for StalledTracker {
    async fn create_item(
        &self,
        project: &str,
        _item: &WorkItem,
        _parent_key: Option<String>,
    ) -> Result<String, TrackerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(format!("{project}-1"))
    }
}

pub fn sample_issue(id: &str) -> IssueRecord {
    let mut issue = IssueRecord::placeholder(id);
    issue.summary = "Model registry UI".to_string();
    issue.description =
        Some("Let data scientists browse registered models from the dashboard".to_string());
    issue.labels.insert("feature".to_string());
    issue
}

/// Personas named `PERSONA_1` … `PERSONA_n`
pub fn sample_personas(n: usize) -> PersonaRegistry {
    PersonaRegistry::from_personas((1..=n).map(|i| {
        PersonaConfig::new(format!("PERSONA_{i}"))
            .with_keyword("dashboard")
            .with_recommendation(format!("Deliver part {i}"))
    }))
}

/// Reporter with a lossless tap, and the receiving end
pub fn progress_collector() -> (ProgressReporter, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressReporter::new(64).with_tap(tx), rx)
}

/// Everything currently buffered in the collector
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn progress_values(events: &[ProgressEvent]) -> Vec<u8> {
    events.iter().map(|e| e.progress).collect()
}
