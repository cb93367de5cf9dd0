use breakdown_core::{
    AgentAnalyses, BreakdownPipeline, BreakdownRequest, Complexity, HeuristicSynthesizer,
    IssueRecord, PersonaAnalysis, ProgressRange, Synthesizer,
};
use breakdown_test_utils::{
    drain, progress_collector, progress_values, sample_issue, sample_personas, RecordingWriter,
    ScriptedAnalyzer,
};
use proptest::prelude::*;
use std::sync::Arc;

fn complexity() -> impl Strategy<Value = Complexity> {
    prop_oneof![
        Just(Complexity::Unknown),
        Just(Complexity::Low),
        Just(Complexity::Medium),
        Just(Complexity::High),
    ]
}

fn analysis() -> impl Strategy<Value = PersonaAnalysis> {
    (
        "[A-Z]{2,6}",
        complexity(),
        proptest::collection::vec("[a-z]{1,8}", 0..4),
        proptest::collection::vec("[a-z ]{1,20}", 0..4),
        proptest::collection::vec("[a-z ]{1,20}", 0..3),
    )
        .prop_map(|(persona, complexity, components, recommendations, concerns)| {
            let mut analysis = PersonaAnalysis::new(persona, "generated").with_complexity(complexity);
            analysis.required_components = components;
            analysis.recommendations = recommendations;
            analysis.concerns = concerns;
            analysis
        })
}

fn analyses() -> impl Strategy<Value = AgentAnalyses> {
    proptest::collection::vec(analysis(), 0..6).prop_map(|items| {
        items
            .into_iter()
            .map(|a| (a.persona.clone(), a))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_synthesis_is_always_valid(analyses in analyses(), max_epics in 1..5usize) {
        let issue: IssueRecord = sample_issue("PROJ-1");
        let breakdown = tokio_test::block_on(
            HeuristicSynthesizer::new(max_epics).synthesize(&issue, &analyses),
        )
        .unwrap();

        // Invariant: at least one epic, and every story parent resolves
        prop_assert!(breakdown.validate().is_ok());
        prop_assert!(!breakdown.epics.is_empty());
        prop_assert!(breakdown.epics.len() <= max_epics.max(1));
        for story in &breakdown.stories {
            let parent = story.parent.as_deref();
            prop_assert!(breakdown.epics.iter().any(|e| Some(e.title.as_str()) == parent));
        }
    }

    #[test]
    fn prop_progress_range_is_monotonic(total in 1..60usize) {
        let range = ProgressRange::ANALYSIS;
        let values: Vec<u8> = (0..=total).map(|k| range.at(k, total)).collect();

        prop_assert_eq!(values[0], range.start);
        prop_assert!(values.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(values.iter().all(|v| *v < range.end));
    }

    #[test]
    fn prop_failures_shrink_analysis_map(
        failing in proptest::collection::vec(any::<bool>(), 0..6),
        create_items in any::<bool>(),
    ) {
        let n = failing.len();
        let mut analyzer = ScriptedAnalyzer::new();
        for (i, fails) in failing.iter().enumerate() {
            if *fails {
                analyzer = analyzer.fail(&format!("PERSONA_{}", i + 1), "scripted");
            }
        }
        let k = failing.iter().filter(|f| **f).count();

        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(breakdown_core::PlaceholderTracker::new()))
            .with_writer(Arc::new(RecordingWriter::new()))
            .with_analyzer(Arc::new(analyzer))
            .with_personas(sample_personas(n))
            .build()
            .unwrap();
        let (reporter, mut rx) = progress_collector();

        let request = BreakdownRequest::new("PROJ-1").with_create_items(create_items);
        let result = tokio_test::block_on(pipeline.run(request, &reporter)).unwrap();

        prop_assert_eq!(result.agent_analyses.len(), n - k);
        prop_assert!(!result.epics.is_empty());

        match result.created_items {
            Some(created) => {
                prop_assert!(create_items);
                prop_assert_eq!(created.len(), result.epics.len() + result.stories.len());
            }
            None => prop_assert!(!create_items),
        }

        let values = progress_values(&drain(&mut rx));
        prop_assert!(values.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(values.last().copied(), Some(100));
    }
}
