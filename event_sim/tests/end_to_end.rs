use detector_models::DetectorLayout;
use event_sim::{Scenario, ScenarioKind};
use std::collections::BTreeSet;
use tracking_core::{
    ClusterId, IterationConfig, IterativeTracker, ReconstructionMetrics, TrackQuality,
};

fn tracker(configs: &[IterationConfig]) -> IterativeTracker {
    match IterativeTracker::new(DetectorLayout::standard(), configs) {
        Ok(t) => t,
        Err(e) => panic!("default configuration rejected: {e}"),
    }
}

#[test]
fn isolated_particles_are_reconstructed() {
    let layout = DetectorLayout::standard();
    let events = Scenario::build(ScenarioKind::Single, 42).generate(&layout);
    let tracker = tracker(&[IterationConfig::second_step()]);

    let mut metrics = ReconstructionMetrics::default();
    for sim in &events {
        let out = tracker.run(&sim.event);
        let tracks: Vec<_> = out.tracks().map(|m| &m.track).collect();
        metrics.accumulate(&tracks, &sim.truth);
        for m in out.tracks() {
            assert!(m.quality >= TrackQuality::HighPurity);
            assert_eq!(m.track.algorithm, "iter2");
        }
    }

    assert!(
        metrics.efficiency() >= 0.8,
        "efficiency {:.2} ({} of {})",
        metrics.efficiency(),
        metrics.n_found,
        metrics.n_reconstructable
    );
    assert!(metrics.fake_rate() <= 0.2, "fake rate {:.2}", metrics.fake_rate());
}

#[test]
fn noisy_events_are_processed_deterministically() {
    let layout = DetectorLayout::standard();
    let mut scenario = Scenario::build(ScenarioKind::LowPt, 3);
    scenario.n_events = 3;
    let events = scenario.generate(&layout);
    let tracker = tracker(&[IterationConfig::second_step()]);

    for sim in &events {
        let a = tracker.run(&sim.event);
        let b = tracker.run(&sim.event);
        let ids_a: Vec<_> = a.tracks().map(|m| m.track.id).collect();
        let ids_b: Vec<_> = b.tracks().map(|m| m.track.id).collect();
        assert_eq!(ids_a, ids_b);
        for (x, y) in a.tracks().zip(b.tracks()) {
            assert_eq!(x.track.params, y.track.params);
            assert_eq!(x.tier, y.tier);
        }
    }
}

#[test]
fn later_iterations_only_see_unused_clusters() {
    let layout = DetectorLayout::standard();
    let mut scenario = Scenario::build(ScenarioKind::Mixed, 11);
    scenario.n_events = 2;
    let events = scenario.generate(&layout);

    let mut mixed_seeds = IterationConfig::second_step();
    mixed_seeds.name = "secStepMixed".into();
    mixed_seeds.seeding.layer_set = "MixedLayerTriplets".into();
    let tracker = tracker(&[IterationConfig::second_step(), mixed_seeds]);

    for sim in &events {
        let out = tracker.run(&sim.event);
        let first = &out.iterations[0];
        let second = &out.iterations[1];

        let removed: BTreeSet<ClusterId> = second.removal.removed.iter().copied().collect();
        for m in &first.merged.tracks {
            assert!(m.track.clusters.iter().all(|c| removed.contains(c)));
        }
        // nothing the second iteration fitted was built from removed clusters
        for t in &second.fitted {
            assert!(t.clusters.iter().all(|c| !removed.contains(c)));
        }
        assert!(second.removal.generation > first.removal.generation);
    }
}
