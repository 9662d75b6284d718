use mimc_engine::bias::{boundary_bias, set_bias};
use mimc_engine::{IterationState, LevelRole};
use mimc_set::IndexSet;

/// Four levels with one-sample sums: fine values 4, 3, 2, 1 and
/// differences 0, -1, -1, -1.
fn sampled_state() -> IterationState<f64> {
    let mut state = IterationState::new(2);
    state.levels_added(4);
    for (level, (fine, delta)) in [(4.0, 0.0), (3.0, -1.0), (2.0, -1.0), (1.0, -1.0)].into_iter().enumerate() {
        state
            .add_samples(level, 1, &[delta, delta * delta], &[fine, fine * fine], 0.5, 2.0)
            .unwrap();
    }
    state
}

#[test]
fn estimator_skips_inactive_and_uses_fine_for_base() {
    let mut state = sampled_state();
    state
        .set_roles(vec![LevelRole::Inactive, LevelRole::Base, LevelRole::Active, LevelRole::Active])
        .unwrap();
    let el = state.calc_el();
    assert_eq!(el[0], None);
    assert_eq!(el[1], Some(3.0));
    assert_eq!(el[2], Some(-1.0));
    assert_eq!(el[3], Some(-1.0));
    assert_eq!(state.used_level_estimator(1, true).len(), 3);
    assert_eq!(state.expectation(), Some(1.0));
}

#[test]
fn next_iteration_then_zeroing_keeps_previous_estimates() {
    let mut state = sampled_state();
    state.set_roles(vec![LevelRole::Base, LevelRole::Active, LevelRole::Active, LevelRole::Active]).unwrap();
    state.bias = 0.25;
    state.total_time = Some(1.5);
    let before = state.calc_el();

    let mut next = state.next_itr();
    assert_eq!(next.total_time, None);
    assert_eq!(next.bias, 0.25);
    next.zero_samples();

    assert_eq!(state.calc_el(), before);
    assert_eq!(next.total_samples(), 0);
    assert!(next.calc_el().iter().all(Option::is_none));
    assert_eq!(next.roles(), state.roles());
    assert_eq!(next.level_count(), 4);
}

#[test]
fn next_iteration_with_zero_new_samples_keeps_every_estimate() {
    let mut state = sampled_state();
    state.set_roles(vec![LevelRole::Base, LevelRole::Active, LevelRole::Active, LevelRole::Active]).unwrap();
    let levels = IndexSet::linear(4);

    let mut next = state.next_itr();
    for level in 0..4 {
        next.add_samples(level, 0, &[0.0, 0.0], &[0.0, 0.0], 0.0, 0.0).unwrap();
    }

    assert_eq!(next.counts(), state.counts());
    assert_eq!(next.calc_el(), state.calc_el());
    assert_eq!(next.calc_vl(), state.calc_vl());
    assert_eq!(next.expectation(), state.expectation());
    assert_eq!(boundary_bias(&next, &levels), boundary_bias(&state, &levels));
    assert_eq!(set_bias(&next, &levels), set_bias(&state, &levels));
}

#[test]
fn per_sample_work_and_time() {
    let state = sampled_state();
    assert_eq!(state.calc_wl(), vec![2.0; 4]);
    assert_eq!(state.calc_tl(), vec![0.5; 4]);
    assert_eq!(state.total_work(), 8.0);
    assert_eq!(state.total_sampling_time(), 2.0);
}

#[test]
fn new_levels_start_active_and_unsampled() {
    let mut state = sampled_state();
    state.levels_added(6);
    assert_eq!(state.roles()[5], LevelRole::Active);
    assert_eq!(state.counts()[5], 0);
    assert!(state.variance_estimate[5].is_nan());
    assert_eq!(state.expectation(), None);
}

#[test]
fn unknown_level_is_rejected() {
    let mut state = sampled_state();
    let err = state.add_samples(7, 1, &[1.0, 1.0], &[1.0, 1.0], 0.0, 1.0).unwrap_err();
    assert_eq!(err.info().code, "level-out-of-range");
    let err = state.set_roles(vec![LevelRole::Active]).unwrap_err();
    assert_eq!(err.info().code, "level-count-mismatch");
}

#[test]
fn level_table_lists_every_level() {
    let state = sampled_state();
    let table = state.level_table(&IndexSet::linear(4));
    assert_eq!(table.lines().count(), 5);
    assert!(table.contains("[3]"));
}

#[test]
fn state_survives_a_yaml_round_trip() {
    let state = sampled_state();
    let yaml = serde_yaml::to_string(&state).unwrap();
    let restored: IterationState<f64> = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(restored.counts(), state.counts());
    assert_eq!(restored.calc_el(), state.calc_el());
}

#[test]
fn role_flags_map_both_ways() {
    for role in [LevelRole::Inactive, LevelRole::Base, LevelRole::Active] {
        assert_eq!(LevelRole::from_flag(role.flag()), role);
    }
    assert_eq!(LevelRole::from_flag(-3), LevelRole::Inactive);
    assert_eq!(LevelRole::from_flag(7), LevelRole::Active);
}
