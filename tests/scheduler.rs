//! End-to-end dispatch behavior across worker/core pool shapes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use cindershell::{
    config::{OutcomePolicy, ShellConfig},
    repl::run_single,
    scheduler::run_multiworker,
};
use tempfile::TempDir;

/// A task that immediately exits with the given status.
fn exit_script(status: i64) -> String {
    format!(
        r#"
        .constants
            string "exit"
            int {status}
        .end
        .function main 0 0
            load_const 1
            call_builtin 0 1
            return
        .end
        "#
    )
}

/// A task that does a little arithmetic before finishing with code 0.
fn busy_script() -> String {
    r#"
        .constants
            int 2000
            int 1
            int 0
        .end
        .function main 0 2
            load_const 0
            store_local 0
            load_const 2
            store_local 1
        loop:
            load_local 0
            jump_if_false done
            load_local 1
            load_local 0
            add
            store_local 1
            load_local 0
            load_const 1
            sub
            store_local 0
            jump loop
        done:
            return
        .end
    "#
    .to_string()
}

fn write_tasks(dir: &TempDir, specs: &[(&str, String)]) -> Vec<PathBuf> {
    specs
        .iter()
        .map(|(name, source)| {
            let path = dir.path().join(name);
            fs::write(&path, source).expect("write task");
            path
        })
        .collect()
}

fn config(files: Vec<PathBuf>, workers: usize, threads: usize, repeats: usize) -> ShellConfig {
    ShellConfig {
        files,
        num_workers: workers,
        num_threads: threads,
        repeats,
        policy: OutcomePolicy::Collect,
        ..Default::default()
    }
}

#[test]
fn three_files_two_repeats_on_two_by_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_tasks(
        &dir,
        &[
            ("a.cna", exit_script(10)),
            ("b.cna", exit_script(20)),
            ("c.cna", exit_script(30)),
        ],
    );
    let report = run_multiworker(&config(files.clone(), 2, 2, 2)).expect("run");

    assert_eq!(report.executed, 6);
    assert_eq!(report.outcomes.len(), 6);

    // Each file ran exactly twice, with its own exit code.
    let mut per_file: HashMap<&Path, Vec<i32>> = HashMap::new();
    for outcome in &report.outcomes {
        per_file
            .entry(outcome.task.as_path())
            .or_default()
            .push(outcome.exit_code);
    }
    assert_eq!(per_file.len(), 3);
    assert_eq!(per_file[files[0].as_path()], vec![10, 10]);
    assert_eq!(per_file[files[1].as_path()], vec![20, 20]);
    assert_eq!(per_file[files[2].as_path()], vec![30, 30]);

    // No outcome names a core or worker outside the configured pools.
    for outcome in &report.outcomes {
        assert!(outcome.core_id < 2);
        assert!(outcome.worker_id < 2);
    }
}

#[test]
fn nonzero_exit_codes_do_not_fail_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_tasks(&dir, &[("fail.cna", exit_script(1))]);
    let mut cfg = config(files, 2, 2, 3);
    cfg.policy = OutcomePolicy::FireAndForget;
    let report = run_multiworker(&cfg).expect("run succeeds despite task failures");
    assert_eq!(report.executed, 3);
    // Fire-and-forget discards the codes entirely.
    assert!(report.outcomes.is_empty());
}

#[test]
fn fifo_reuse_alternates_cores_with_one_thread() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_tasks(&dir, &[("task.cna", exit_script(0))]);
    // One thread, two cores, six tasks: cores must be reused in exactly
    // the order they were freed.
    let report = run_multiworker(&config(files, 2, 1, 6)).expect("run");
    let core_ids: Vec<usize> = report.outcomes.iter().map(|o| o.core_id).collect();
    assert_eq!(core_ids, vec![0, 1, 0, 1, 0, 1]);
}

#[test]
fn more_cores_than_threads_are_all_within_bounds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_tasks(
        &dir,
        &[
            ("a.cna", busy_script()),
            ("b.cna", busy_script()),
            ("c.cna", busy_script()),
            ("d.cna", busy_script()),
            ("e.cna", busy_script()),
        ],
    );
    let report = run_multiworker(&config(files, 3, 2, 2)).expect("run");
    assert_eq!(report.executed, 10);
    assert_eq!(report.outcomes.len(), 10);
    for outcome in &report.outcomes {
        assert!(outcome.core_id < 3);
        assert!(outcome.worker_id < 2);
        assert_eq!(outcome.exit_code, 0);
    }
}

#[test]
fn zero_files_shuts_down_cleanly() {
    let report = run_multiworker(&config(Vec::new(), 2, 2, 5)).expect("run");
    assert_eq!(report.executed, 0);
    assert!(report.outcomes.is_empty());
}

#[test]
fn single_worker_mode_is_fully_sequential() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_tasks(
        &dir,
        &[("a.cna", exit_script(1)), ("b.cna", exit_script(2))],
    );
    let report = run_single(&config(files.clone(), 1, 1, 3)).expect("run");
    assert_eq!(report.executed, 6);
    // List order preserved across every pass, one core for everything.
    let order: Vec<(&Path, i32)> = report
        .outcomes
        .iter()
        .map(|o| (o.task.as_path(), o.exit_code))
        .collect();
    let expected: Vec<(&Path, i32)> = vec![
        (files[0].as_path(), 1),
        (files[1].as_path(), 2),
        (files[0].as_path(), 1),
        (files[1].as_path(), 2),
        (files[0].as_path(), 1),
        (files[1].as_path(), 2),
    ];
    assert_eq!(order, expected);
    assert!(report.outcomes.iter().all(|o| o.core_id == 0));
}

#[test]
fn multiworker_scenario_matches_single_worker_totals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_tasks(
        &dir,
        &[("a.cna", exit_script(5)), ("b.cna", exit_script(6))],
    );
    let multi = run_multiworker(&config(files.clone(), 4, 3, 4)).expect("multi");
    let single = run_single(&config(files, 1, 1, 4)).expect("single");
    assert_eq!(multi.executed, single.executed);

    let count = |report: &cindershell::RunReport, code: i32| {
        report
            .outcomes
            .iter()
            .filter(|o| o.exit_code == code)
            .count()
    };
    assert_eq!(count(&multi, 5), count(&single, 5));
    assert_eq!(count(&multi, 6), count(&single, 6));
}

#[test]
fn bad_worker_ratio_is_rejected_up_front() {
    let cfg = config(Vec::new(), 1, 2, 1);
    assert!(run_multiworker(&cfg).is_err());

    let mut cfg = config(Vec::new(), 2, 2, 1);
    cfg.repeats = 0;
    assert!(run_multiworker(&cfg).is_err());
}

#[test]
fn missing_task_files_surface_as_failed_outcomes() {
    let report = run_multiworker(&config(vec![PathBuf::from("/nonexistent.cna")], 2, 2, 2))
        .expect("run");
    assert_eq!(report.executed, 2);
    assert_eq!(report.failures().count(), 2);
    assert!(report.outcomes.iter().all(|o| o.exit_code == 1));
}
