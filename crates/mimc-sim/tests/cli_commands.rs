use std::fs;

use mimc_engine::RunOutcome;
use mimc_sim::commands::rate::{self, RateArgs};
use mimc_sim::commands::run::{self, RunArgs};
use mimc_sim::commands::template::{self, ProblemKind, TemplateArgs};
use mimc_sim::commands::tol_seq::{self, TolSeqArgs};
use mimc_sim::sim_config::SimConfig;
use tempfile::tempdir;

fn run_args(dir: &std::path::Path, yaml: &str) -> RunArgs {
    let config = dir.join("config.yaml");
    fs::write(&config, yaml).unwrap();
    RunArgs {
        config,
        tol: None,
        seed: None,
        out: Some(dir.join("out").join("report.json")),
    }
}

#[test]
fn noisy_geometric_run_writes_a_report() {
    let dir = tempdir().unwrap();
    let args = run_args(
        dir.path(),
        "run:\n  tol: 0.1\nproblem:\n  kind: noisy-geometric\nseed: 3\n",
    );
    let report = run::execute(&args).unwrap();
    assert_eq!(report.problem, "noisy-geometric");
    assert_eq!(report.summary.outcome, RunOutcome::Converged);
    assert!(report.error.unwrap() < 0.3);

    run::run(&args).unwrap();
    let json = fs::read_to_string(dir.path().join("out").join("report.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["seed"], 3);
    assert_eq!(value["summary"]["outcome"], "converged");
}

#[test]
fn overrides_replace_tolerance_and_seed() {
    let dir = tempdir().unwrap();
    let mut args = run_args(dir.path(), "run:\n  tol: 0.5\nproblem:\n  kind: geometric\n");
    args.tol = Some(0.01);
    args.seed = Some(9);
    let report = run::execute(&args).unwrap();
    assert_eq!(report.seed, 9);
    assert!(report.summary.tolerance <= 0.01 + 1e-12);
    assert!(report.summary.converged());
    assert!(report.error.unwrap() < 0.01);
}

#[test]
fn separable_problem_runs_on_two_dimensional_levels() {
    let dir = tempdir().unwrap();
    let args = run_args(dir.path(), "run:\n  tol: 0.05\nproblem:\n  kind: separable\nseed: 1\n");
    let report = run::execute(&args).unwrap();
    assert!(report.summary.converged());
    assert!(report.summary.levels.iter().any(|level| level.get(1) > 0));
    assert!(report.error.unwrap() < 0.15);
}

#[test]
fn mismatched_rates_are_rejected() {
    let dir = tempdir().unwrap();
    let args = run_args(
        dir.path(),
        "run:\n  tol: 0.1\n  w: [1.0]\nproblem:\n  kind: separable\n",
    );
    let err = run::execute(&args).unwrap_err();
    assert!(err.to_string().contains("dimension-mismatch"));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    let args = RunArgs {
        config: dir.path().join("absent.yaml"),
        tol: None,
        seed: None,
        out: None,
    };
    assert!(run::execute(&args).is_err());
}

#[test]
fn rate_classifies_the_canonical_regime() {
    let rate = rate::execute(&RateArgs {
        w: vec![1.0],
        s: vec![2.0],
        gamma: vec![1.0],
    })
    .unwrap();
    assert_eq!(rate.rate, -2.0);
    assert_eq!(rate.log_rate, Some(0.0));

    let err = rate::execute(&RateArgs {
        w: vec![1.0, 1.0],
        s: vec![2.0],
        gamma: vec![1.0],
    });
    assert!(err.is_err());
}

#[test]
fn tol_seq_decreases_to_the_extra_tolerances() {
    let tolerances = tol_seq::execute(&TolSeqArgs {
        tol: 0.01,
        max_tol: 0.1,
        max_add: 2,
        r1: std::f64::consts::SQRT_2,
        r2: 1.1,
    })
    .unwrap();
    assert!(tolerances[0] <= 0.1 + 1e-12);
    assert!(tolerances.windows(2).all(|pair| pair[0] > pair[1]));
    let last = tolerances[tolerances.len() - 1];
    assert!((last - 0.01 / 1.21).abs() < 1e-12);

    assert!(tol_seq::execute(&TolSeqArgs {
        tol: 0.1,
        max_tol: 0.01,
        max_add: 0,
        r1: 2.0,
        r2: 1.1,
    })
    .is_err());
}

#[test]
fn templates_load_back() {
    for kind in [
        ProblemKind::Geometric,
        ProblemKind::NoisyGeometric,
        ProblemKind::Gbm,
        ProblemKind::Separable,
    ] {
        let yaml = template::execute(&TemplateArgs {
            problem: kind,
            tol: 0.02,
            out: None,
        })
        .unwrap();
        let config = SimConfig::from_yaml_str(&yaml).unwrap().prepared().unwrap();
        assert_eq!(config.problem, kind.problem());
        assert_eq!(config.run.tol, 0.02);
    }
}
