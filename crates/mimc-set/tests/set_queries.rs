use mimc_core::{LevelSet, MultiIndex};
use mimc_set::{IndexSet, TotalDegreeProfit};

fn idx(coords: &[u32]) -> MultiIndex {
    MultiIndex::new(coords.to_vec())
}

#[test]
fn duplicate_insertions_are_rejected() {
    let mut set = IndexSet::new(2);
    set.add_from_list(&[idx(&[]), idx(&[1])]).expect("insert");
    let err = set.add_from_list(&[idx(&[1])]).expect_err("duplicate");
    assert_eq!(err.info().code, "index-exists");
    assert_eq!(set.len(), 2);
}

#[test]
fn dense_and_sparse_projections_agree() {
    let set = IndexSet::from_indices(2, &[idx(&[]), idx(&[1]), idx(&[0, 1]), idx(&[1, 1])])
        .expect("set");
    assert_eq!(
        set.dense_matrix(),
        vec![vec![0, 0], vec![1, 0], vec![0, 1], vec![1, 1]]
    );
    assert_eq!(set.sparse_matrix()[3], vec![(0, 1), (1, 1)]);
    assert_eq!(set.is_boundary(), vec![false, true, true, true]);
}

#[test]
fn admissibility_detects_holes() {
    let good = IndexSet::from_indices(2, &[idx(&[]), idx(&[1]), idx(&[0, 1])]).expect("set");
    assert!(good.check_admissibility());
    let bad = IndexSet::from_indices(2, &[idx(&[]), idx(&[1, 1])]).expect("set");
    assert!(!bad.check_admissibility());
}

#[test]
fn empty_set_expands_to_seed() {
    let mut set = IndexSet::new(1);
    let added = set
        .expand_set(&TotalDegreeProfit::uniform(1), None, None)
        .expect("expand");
    assert_eq!(added, 1);
    assert_eq!(set.get(0), Some(&MultiIndex::seed()));
}

#[test]
fn expansion_adds_cheapest_neighbours() {
    let mut set = IndexSet::from_indices(2, &[idx(&[])]).expect("set");
    let profit = TotalDegreeProfit::new(vec![0.3, 0.7]);
    set.expand_set(&profit, None, None).expect("expand");
    assert_eq!(set.indices(), vec![idx(&[]), idx(&[1])]);

    let uniform = TotalDegreeProfit::uniform(2);
    set.expand_set(&uniform, None, None).expect("expand");
    assert_eq!(set.len(), 3);
    assert_eq!(set.get(2), Some(&idx(&[0, 1])));
}

#[test]
fn capped_profit_exhausts_expansion() {
    let mut set = IndexSet::linear(3);
    let profit = TotalDegreeProfit::uniform(1).with_max_level(Some(2));
    let added = set.expand_set(&profit, None, None).expect("expand");
    assert_eq!(added, 0);
    assert_eq!(set.len(), 3);
}

#[test]
fn set_bias_is_infinite_when_base_is_on_boundary() {
    let set = IndexSet::linear(1);
    assert!(set.estimate_bias(&[f64::INFINITY]).is_infinite());
    assert_eq!(set.estimate_bias(&[0.4]), 0.4);
}
