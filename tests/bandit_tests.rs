//! Resource bandit behavior over the shared reward store.

mod common;

use std::sync::Arc;
use std::thread;

use learning_path_engine::engine::config::{BanditConfig, SelectionStrategy};
use learning_path_engine::engine::decision::{ResourceSelector, RewardStore, SelectionContext};
use learning_path_engine::engine::types::{LearningStyle, Resource, ResourceKind};
use learning_path_engine::EngineError;

fn twin_resources() -> Vec<Resource> {
    vec![
        Resource::new("strong", "loops", ResourceKind::Video, 0.4, 15.0),
        Resource::new("weak", "loops", ResourceKind::Video, 0.4, 15.0),
    ]
}

fn context() -> SelectionContext {
    SelectionContext::new(0.3, LearningStyle::Visual, 30.0)
}

#[test]
fn thompson_sampling_prefers_the_stronger_record() {
    let store = Arc::new(RewardStore::default());
    store.seed("strong", 9, 1);
    store.seed("weak", 2, 8);

    let config = BanditConfig {
        strategy: SelectionStrategy::ThompsonSampling,
        seed: Some(7),
        ..BanditConfig::default()
    };
    let selector = ResourceSelector::new(config, store);
    let candidates = twin_resources();

    let wins = (0..1_000)
        .filter(|_| {
            selector
                .select("loops", &candidates, &context())
                .map(|r| r.resource.id == "strong")
                .unwrap_or(false)
        })
        .count();
    assert!(wins > 700, "strong resource won only {wins} of 1000 draws");
}

#[test]
fn ucb_tries_unpulled_resources_first() {
    let store = Arc::new(RewardStore::default());
    store.seed("strong", 9, 1);

    let config = BanditConfig {
        strategy: SelectionStrategy::UpperConfidenceBound { exploration: 2.0 },
        ..BanditConfig::default()
    };
    let selector = ResourceSelector::new(config, store);
    let picked = selector
        .select("loops", &twin_resources(), &context())
        .unwrap();
    assert_eq!(picked.resource.id, "weak");
}

#[test]
fn empty_candidate_list_is_reported() {
    let selector = ResourceSelector::new(BanditConfig::default(), Arc::default());
    let err = selector.rank("loops", &[], &context()).unwrap_err();
    assert!(matches!(err, EngineError::ResourceUnavailable { .. }));

    let fallback = selector.fallback("loops");
    assert!(fallback.resource.is_fallback());
    assert_eq!(fallback.resource.concept_id, "loops");
}

#[test]
fn concurrent_feedback_is_not_lost() {
    let engine = common::engine();
    let threads = 8;
    let per_thread = 250;

    thread::scope(|scope| {
        for t in 0..threads {
            let engine = &engine;
            scope.spawn(move || {
                for i in 0..per_thread {
                    engine.record_resource_feedback("loops-video", (t + i) % 2 == 0);
                }
            });
        }
    });

    let counts = engine.reward_store().counts("loops-video");
    assert_eq!(counts.pulls(), (threads * per_thread) as u64);
    assert_eq!(counts.successes, counts.failures);
}

#[test]
fn engines_can_share_one_store() {
    let store = Arc::new(RewardStore::default());
    let a = learning_path_engine::LearningPathEngine::with_store(
        common::ucb_config(),
        common::graph(),
        common::catalog(),
        Arc::clone(&store),
    )
    .unwrap();
    let b = learning_path_engine::LearningPathEngine::with_store(
        common::ucb_config(),
        common::graph(),
        common::catalog(),
        Arc::clone(&store),
    )
    .unwrap();

    a.record_resource_feedback("loops-quiz", true);
    b.record_resource_feedback("loops-quiz", false);
    assert_eq!(store.counts("loops-quiz").pulls(), 2);
}
