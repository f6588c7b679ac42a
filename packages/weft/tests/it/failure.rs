//! Failure propagation and error replay.

use pretty_assertions::assert_eq as pretty_assert_eq;
use weft::{Callable, Error, TaskSpec, TaskState, Workers};

use crate::{create_list_callable, list_args, open, visible_entries, workspace};

fn failing_callable() -> Callable {
    Callable::new("it::div_by_zero", |_args| Err("division by zero".into()))
}

#[test_log::test]
fn failed_task_surfaces_from_join() {
    let ws = workspace();
    let graph = open(ws.path(), Workers::Pool(1));

    graph
        .add_task(
            TaskSpec::builder()
                .callable(failing_callable())
                .name("broken_task")
                .build(),
        )
        .unwrap();
    graph.close();

    let err = graph.join(None).expect_err("join must surface the failure");
    match &err {
        Error::Callable { task, message } => {
            pretty_assert_eq!(task, "broken_task");
            assert!(message.contains("division by zero"), "got: {message}");
        }
        other => panic!("expected Callable, got {other:?}"),
    }
    pretty_assert_eq!(visible_entries(ws.path()).len(), 0);
}

#[test_log::test]
fn ancestors_doom_their_dependents() {
    let ws = workspace();
    let graph = open(ws.path(), Workers::Pool(1));
    let target = ws.path().join("1000.dat");

    let base_task = graph
        .add_task(
            TaskSpec::builder()
                .callable(failing_callable())
                .name("broken_base")
                .build(),
        )
        .unwrap();
    let dependent = graph
        .add_task(
            TaskSpec::builder()
                .callable(create_list_callable())
                .args(list_args(5, 1000, &target))
                .targets(vec![target.clone()])
                .dependencies(vec![base_task])
                .build(),
        )
        .unwrap();
    graph.close();

    let first = graph.join(None).expect_err("join must surface the failure");
    assert!(matches!(first, Error::Callable { .. }), "got {first:?}");

    pretty_assert_eq!(dependent.state(), TaskState::Failed);
    assert!(dependent.join(None).is_err());
    // The doomed dependent never ran, so the workspace holds nothing.
    pretty_assert_eq!(visible_entries(ws.path()).len(), 0);

    // Every later join replays the same error.
    let second = graph.join(None).expect_err("joins replay the failure");
    pretty_assert_eq!(first.to_string(), second.to_string());
}

#[test_log::test]
fn dependents_added_after_the_failure_are_doomed_too() {
    let ws = workspace();
    let graph = open(ws.path(), Workers::Pool(1));
    let target = ws.path().join("late.dat");

    let base_task = graph
        .add_task(
            TaskSpec::builder()
                .callable(failing_callable())
                .name("broken_base")
                .build(),
        )
        .unwrap();
    assert!(base_task.join(None).is_err());

    let late = graph
        .add_task(
            TaskSpec::builder()
                .callable(create_list_callable())
                .args(list_args(5, 10, &target))
                .targets(vec![target.clone()])
                .dependencies(vec![base_task])
                .build(),
        )
        .unwrap();
    pretty_assert_eq!(late.state(), TaskState::Failed);
    assert!(!target.exists());

    graph.close();
    assert!(graph.join(None).is_err());
}

#[test_log::test]
fn panicking_callable_fails_like_any_other_error() {
    let ws = workspace();
    let graph = open(ws.path(), Workers::Pool(1));

    let task = graph
        .add_task(
            TaskSpec::builder()
                .callable(Callable::new("it::panics", |_args| {
                    panic!("boom");
                }))
                .name("panicker")
                .build(),
        )
        .unwrap();
    graph.close();

    let err = graph.join(None).expect_err("join must surface the panic");
    match &err {
        Error::Callable { task, message } => {
            pretty_assert_eq!(task, "panicker");
            assert!(message.contains("boom"), "got: {message}");
        }
        other => panic!("expected Callable, got {other:?}"),
    }
    pretty_assert_eq!(task.state(), TaskState::Failed);
}

#[test_log::test]
fn missing_declared_output_fails_the_task() {
    let ws = workspace();
    let graph = open(ws.path(), Workers::Single);
    let target = ws.path().join("never-written.dat");

    let task = graph
        .add_task(
            TaskSpec::builder()
                .callable(Callable::new("it::forgets_its_output", |_args| Ok(())))
                .name("forgetful")
                .targets(vec![target.clone()])
                .build(),
        )
        .unwrap();
    graph.close();

    let err = graph.join(None).expect_err("join must surface the failure");
    match &err {
        Error::MissingOutput { task, path } => {
            pretty_assert_eq!(task, "forgetful");
            pretty_assert_eq!(path.file_name().unwrap(), "never-written.dat");
        }
        other => panic!("expected MissingOutput, got {other:?}"),
    }
    pretty_assert_eq!(task.state(), TaskState::Failed);
}

#[test_log::test]
fn independent_branches_outlive_a_failure() {
    let ws = workspace();
    let graph = open(ws.path(), Workers::Single);
    let target = ws.path().join("healthy.dat");

    graph
        .add_task(
            TaskSpec::builder()
                .callable(failing_callable())
                .name("broken_branch")
                .build(),
        )
        .unwrap();
    let healthy = graph
        .add_task(
            TaskSpec::builder()
                .callable(create_list_callable())
                .args(list_args(3, 10, &target))
                .targets(vec![target.clone()])
                .build(),
        )
        .unwrap();
    graph.close();

    assert!(graph.join(None).is_err());
    pretty_assert_eq!(healthy.state(), TaskState::Complete);
    pretty_assert_eq!(crate::read_list(&target).unwrap(), vec![3; 10]);
}
