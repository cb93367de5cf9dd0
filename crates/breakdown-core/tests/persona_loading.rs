//! File-backed configuration: persona directories, pipeline config and
//! seeded trackers.

use breakdown_core::{
    BreakdownConfig, BreakdownError, BreakdownPipeline, BreakdownRequest, InMemoryTracker,
    IssueFetcher, PersonaRegistry, Priority,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

fn persona_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "staff_engineer.yaml",
        "persona: STAFF_ENGINEER\n\
         name: Staff Engineer\n\
         keywords: [api, latency, cache]\n\
         components: [gateway, cache]\n\
         concerns:\n  - trigger: latency\n    concern: Latency budget must be defined\n\
         recommendations:\n  - Add a cache in front of the gateway\n",
    );
    write(
        &dir,
        "ux_designer.yml",
        "persona: UX_DESIGNER\n\
         keywords: [dashboard, wizard]\n\
         components: [dashboard]\n\
         recommendations: [Prototype the dashboard flow]\n",
    );
    write(&dir, "agent-schema.yaml", "persona: SCHEMA\n");
    write(&dir, "broken.yaml", "persona: [unterminated\n");
    write(&dir, "anonymous.yaml", "name: Nobody\n");
    write(&dir, "notes.txt", "persona: IGNORED\n");
    dir
}

/// Tenet: only well-formed persona files load, ordered by key.
#[test]
fn load_dir_skips_schema_and_invalid_files() {
    let dir = persona_dir();
    let registry = PersonaRegistry::load_dir(dir.path()).unwrap();

    let keys: Vec<&str> = registry.keys().collect();
    assert_eq!(keys, vec!["STAFF_ENGINEER", "UX_DESIGNER"]);

    let staff = registry.get("STAFF_ENGINEER").unwrap();
    assert_eq!(staff.display_name(), "Staff Engineer");
    assert_eq!(staff.concerns.len(), 1);
    assert_eq!(registry.get("UX_DESIGNER").unwrap().display_name(), "UX_DESIGNER");
}

#[test]
fn load_dir_missing_directory_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = PersonaRegistry::load_dir(dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, BreakdownError::Config(_)));
}

#[test]
fn config_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "breakdown.toml",
        "analysis_timeout_secs = 45\nmax_concurrent_personas = 3\n",
    );

    let config = BreakdownConfig::load(dir.path().join("breakdown.toml")).unwrap();
    assert_eq!(config.analysis_timeout_secs, 45);
    assert_eq!(config.max_concurrent_personas, 3);
    assert_eq!(config.fetch_timeout_secs, 30);
    assert_eq!(config.max_epics, 4);
}

#[tokio::test]
async fn tracker_seeds_from_json_and_yaml() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "issues.json",
        r#"[{"id": "MLOPS-12", "summary": "GPU quotas", "priority": "High"}]"#,
    );
    write(
        &dir,
        "issues.yaml",
        "- id: MLOPS-30\n  summary: Quota dashboard\n  components: [dashboard]\n",
    );

    let from_json = InMemoryTracker::from_path(dir.path().join("issues.json")).unwrap();
    let issue = from_json.fetch("MLOPS-12").await.unwrap();
    assert_eq!(issue.priority, Priority::High);
    assert_eq!(issue.project, "MLOPS");

    let from_yaml = InMemoryTracker::from_path(dir.path().join("issues.yaml")).unwrap();
    assert_eq!(from_yaml.len(), 1);
    assert!(from_yaml
        .fetch("MLOPS-30")
        .await
        .unwrap()
        .components
        .contains("dashboard"));
}

/// Tenet: personas loaded from disk drive the keyword analyzer end to end,
/// and write-back keys continue after the seeded issues.
#[tokio::test]
async fn file_backed_pipeline_end_to_end() {
    let personas = persona_dir();
    let seed = TempDir::new().unwrap();
    write(
        &seed,
        "issues.yaml",
        "- id: MLOPS-41\n  summary: Serve models through the gateway\n  \
         description: Add a cache to cut api latency on the dashboard\n",
    );

    let tracker = Arc::new(InMemoryTracker::from_path(seed.path().join("issues.yaml")).unwrap());
    let pipeline = BreakdownPipeline::builder()
        .with_fetcher(tracker.clone())
        .with_writer(tracker.clone())
        .with_personas(PersonaRegistry::load_dir(personas.path()).unwrap())
        .build()
        .unwrap();

    let result = pipeline
        .run(
            BreakdownRequest::new("MLOPS-41").with_create_items(true),
            &pipeline.reporter(),
        )
        .await
        .unwrap();

    assert_eq!(result.agent_analyses.len(), 2);
    assert!(result
        .stories
        .iter()
        .any(|s| s.title == "Mitigate risk: Latency budget must be defined"));

    let created = result.created_items.unwrap();
    assert_eq!(created[0], "MLOPS-42");
    assert_eq!(tracker.created().len(), created.len());
    assert_eq!(tracker.len(), 1 + created.len());
}
