//! End-to-end task lifecycle against a real git repository.
//!
//! The AI collaborator and the container launcher are scripted; git is real.
//! The scripted launcher "runs" the agent by writing files into the task
//! workspace and the iteration output directory when the container starts.

use std::fs;

use rover::core::status::TaskStatus;
use rover::error::{RoverError, VcsError};
use rover::io::ai::TaskExpansion;
use rover::io::config::RoverConfig;
use rover::io::confirm::Confirm;
use rover::orchestrator::{DiffRequest, LogsOutcome, Orchestrator, Services, StartRequest};
use rover::test_support::{FixedConfirm, ScriptedAi, ScriptedLauncher, TestRepo};

fn orchestrator<'a>(
    repo: &'a TestRepo,
    ai: &'a ScriptedAi,
    launcher: &'a ScriptedLauncher,
    confirm: &'a dyn Confirm,
) -> Orchestrator<'a> {
    Orchestrator::new(
        RoverConfig::default(),
        Services {
            git: repo.git(),
            ai,
            launcher,
            confirm,
        },
    )
    .expect("orchestrator")
}

fn retry_ai() -> ScriptedAi {
    ScriptedAi {
        expansion: Some(TaskExpansion {
            title: "Add retry logic".to_string(),
            description: "Retry failed HTTP calls up to three times".to_string(),
        }),
        ..ScriptedAi::default()
    }
}

fn agent_writing(file: &str, contents: &str) -> ScriptedLauncher {
    ScriptedLauncher {
        workspace_files: vec![(file.to_string(), contents.to_string())],
        output_files: vec![
            ("plan.md".to_string(), "1. add retries\n".to_string()),
            ("summary.md".to_string(), "Added retries to the client.\n".to_string()),
        ],
        log_text: "agent: done\n".to_string(),
        ..ScriptedLauncher::default()
    }
}

fn request(description: &str) -> StartRequest {
    StartRequest {
        description: description.to_string(),
        ..StartRequest::default()
    }
}

#[test]
fn start_creates_workspace_and_completes_first_iteration() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = agent_writing("retry.txt", "retry 3 times\n");
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));

    let outcome = rover.start(request("retry http calls")).expect("start");

    assert_eq!(outcome.iteration, 1);
    assert_eq!(outcome.container, "rover-task-1-1");
    let task = &outcome.task;
    assert_eq!(task.id, 1);
    assert_eq!(task.title, "Add retry logic");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.execution_status.as_deref(), Some("completed"));
    assert_eq!(task.exit_code, Some(0));
    assert!(task.started_at.is_some());

    let (worktree, branch) = task.workspace().expect("workspace assigned");
    assert!(branch.starts_with("rover/task-1-"));
    assert_eq!(branch.len(), "rover/task-1-".len() + 8);
    assert!(worktree.join("retry.txt").is_file());
    assert!(repo.git().branch_exists(branch));

    let started = launcher.started.borrow();
    assert_eq!(started.len(), 1);
    let spec = &started[0];
    assert!(spec.env.contains(&("ROVER_TASK_ID".to_string(), "1".to_string())));
    assert!(spec.command.iter().any(|arg| arg == "/output/prompt.md"));

    let iteration_dir = repo.path().join(".rover/tasks/1/iterations/1");
    let prompt = fs::read_to_string(iteration_dir.join("prompt.md")).expect("prompt");
    assert!(prompt.contains("# Task 1: Add retry logic"));
    let status = fs::read_to_string(iteration_dir.join("status.json")).expect("status");
    assert!(status.contains("\"completed\""));

    let gitignore = fs::read_to_string(repo.path().join(".rover/.gitignore")).expect("gitignore");
    assert!(gitignore.lines().any(|line| line == "tasks/"));
}

#[test]
fn title_falls_back_to_description_when_ai_is_unavailable() {
    let repo = TestRepo::new().expect("repo");
    let ai = ScriptedAi::default();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));

    let outcome = rover
        .start(request("Make the client retry\n\nUse exponential backoff."))
        .expect("start");

    assert_eq!(outcome.task.title, "Make the client retry");
    assert_eq!(
        outcome.task.description,
        "Make the client retry\n\nUse exponential backoff."
    );
}

#[test]
fn ids_increase_numerically_across_tasks() {
    let repo = TestRepo::new().expect("repo");
    let ai = ScriptedAi::default();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));

    let first = rover.start(request("first")).expect("first");
    let second = rover.start(request("second")).expect("second");

    assert_eq!(first.task.id, 1);
    assert_eq!(second.task.id, 2);
    assert_ne!(first.task.branch_name, second.task.branch_name);
}

#[test]
fn workspace_failure_resets_task_to_new() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));

    let err = rover
        .start(StartRequest {
            source_branch: Some("no-such-branch".to_string()),
            ..request("retry http calls")
        })
        .unwrap_err();

    assert!(matches!(
        err,
        RoverError::VersionControl(VcsError::CommandFailed { .. })
    ));
    let task = rover.store().load(1).expect("task kept");
    assert_eq!(task.status, TaskStatus::New);
    assert!(task.workspace().is_none());
    assert!(launcher.started.borrow().is_empty());
}

#[test]
fn start_outside_a_repository_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = TestRepo::new().expect("repo");
    let ai = ScriptedAi::default();
    let launcher = ScriptedLauncher::default();
    let rover = Orchestrator::new(
        RoverConfig::default(),
        Services {
            git: repo.git().at(dir.path()),
            ai: &ai,
            launcher: &launcher,
            confirm: &FixedConfirm(true),
        },
    )
    .expect("orchestrator");

    let err = rover.start(request("anything")).unwrap_err();

    assert!(matches!(
        err,
        RoverError::VersionControl(VcsError::NotARepository { .. })
    ));
    assert!(!dir.path().join(".rover").exists());
}

#[test]
fn launch_failure_marks_task_failed() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher {
        fail_start: true,
        ..ScriptedLauncher::default()
    };
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));

    let err = rover.start(request("retry http calls")).unwrap_err();

    assert!(matches!(err, RoverError::Launch(_)));
    let task = rover.store().load(1).expect("task");
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().is_some_and(|e| e.contains("docker")));
}

#[test]
fn non_zero_agent_exit_marks_task_failed() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher {
        exit_code: 2,
        ..ScriptedLauncher::default()
    };
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));

    let outcome = rover.start(request("retry http calls")).expect("start");

    assert_eq!(outcome.task.status, TaskStatus::Failed);
    assert_eq!(outcome.task.exit_code, Some(2));
    assert_eq!(
        outcome.task.error.as_deref(),
        Some("agent exited with code 2")
    );
}

#[test]
fn detached_start_is_refreshed_by_list() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));

    let outcome = rover
        .start(StartRequest {
            detach: true,
            ..request("retry http calls")
        })
        .expect("start");
    assert_eq!(outcome.task.status, TaskStatus::InProgress);
    assert_eq!(outcome.task.execution_status.as_deref(), Some("running"));

    fs::write(
        repo.path().join(".rover/tasks/1/iterations/1/status.json"),
        r#"{"status": "completed", "exitCode": 0}"#,
    )
    .expect("write status");

    let listing = rover.list().expect("list");
    assert_eq!(listing.tasks.len(), 1);
    let task = &listing.tasks[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.last_status_check.is_some());

    let reloaded = rover.store().load(1).expect("reload");
    assert_eq!(reloaded.status, TaskStatus::Completed);
}

#[test]
fn list_reports_unreadable_tasks_without_failing() {
    let repo = TestRepo::new().expect("repo");
    let ai = ScriptedAi::default();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    rover.start(request("first")).expect("start");

    let broken = repo.path().join(".rover/tasks/2");
    fs::create_dir_all(&broken).expect("mkdir");
    fs::write(broken.join("description.json"), "{ not json").expect("write");

    let listing = rover.list().expect("list");
    assert_eq!(listing.tasks.len(), 1);
    assert_eq!(listing.unreadable.len(), 1);
    assert_eq!(listing.unreadable[0].0, 2);
}

#[test]
fn iterate_threads_previous_output_into_next_iteration() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = agent_writing("retry.txt", "retry 3 times\n");
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    rover.start(request("retry http calls")).expect("start");

    let outcome = rover
        .iterate(1, "also log every retry", false)
        .expect("iterate");

    assert_eq!(outcome.iteration, 2);
    assert_eq!(outcome.container, "rover-task-1-2");
    assert_eq!(outcome.task.iterations, 2);
    assert_eq!(outcome.task.status, TaskStatus::Completed);
    assert!(outcome.task.last_iteration_at.is_some());

    let inspection = rover.inspect(1, Some(2)).expect("inspect");
    let iteration = inspection.iteration.expect("iteration 2");
    assert_eq!(iteration.title, "Add retry logic");
    assert_eq!(iteration.description, "also log every retry");
    let previous = iteration.previous_context.expect("previous context");
    assert_eq!(previous.iteration, 1);
    assert_eq!(
        previous.summary.as_deref(),
        Some("Added retries to the client.")
    );
    assert_eq!(inspection.iterations, vec![1, 2]);

    let prompt = fs::read_to_string(repo.path().join(".rover/tasks/1/iterations/2/prompt.md"))
        .expect("prompt");
    assert!(prompt.contains("also log every retry"));
    assert!(prompt.contains("Added retries to the client."));
}

#[test]
fn iterate_uses_ai_refinement_when_available() {
    let repo = TestRepo::new().expect("repo");
    let ai = ScriptedAi {
        iteration_expansion: Some(TaskExpansion {
            title: "Log retries".to_string(),
            description: "Emit a warning on every retry attempt".to_string(),
        }),
        ..retry_ai()
    };
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    rover.start(request("retry http calls")).expect("start");

    rover.iterate(1, "log them", false).expect("iterate");

    let inspection = rover.inspect(1, None).expect("inspect");
    let iteration = inspection.iteration.expect("latest iteration");
    assert_eq!(iteration.iteration, 2);
    assert_eq!(iteration.title, "Log retries");
}

#[test]
fn iterate_without_workspace_is_refused() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    rover.start(request("retry http calls")).expect("start");
    rover.reset(1).expect("reset");

    let err = rover.iterate(1, "more", false).unwrap_err();

    assert!(matches!(err, RoverError::MissingWorkspace { id: 1 }));
}

#[test]
fn diff_includes_untracked_files_unless_tracked_only() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = agent_writing("retry.txt", "retry 3 times\n");
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    rover.start(request("retry http calls")).expect("start");

    let diff = rover.diff(1, &DiffRequest::default()).expect("diff");
    assert!(diff.contains("retry.txt"));
    assert!(diff.contains("+retry 3 times"));

    let tracked = rover
        .diff(
            1,
            &DiffRequest {
                tracked_only: true,
                ..DiffRequest::default()
            },
        )
        .expect("diff");
    assert!(!tracked.contains("retry.txt"));
}

#[test]
fn logs_snapshot_and_follow_use_latest_container() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = agent_writing("retry.txt", "x\n");
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    rover.start(request("retry http calls")).expect("start");

    let snapshot = rover.logs(1, None, false).expect("logs");
    assert_eq!(
        snapshot,
        LogsOutcome::Snapshot {
            container: "rover-task-1-1".to_string(),
            logs: "agent: done\n".to_string(),
        }
    );

    let followed = rover.logs(1, None, true).expect("follow");
    assert_eq!(
        followed,
        LogsOutcome::Followed {
            container: "rover-task-1-1".to_string(),
            interrupted: true,
        }
    );
}

#[test]
fn stop_records_stopped_execution_status() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    rover
        .start(StartRequest {
            detach: true,
            ..request("retry http calls")
        })
        .expect("start");

    let task = rover.stop(1).expect("stop");

    assert_eq!(task.execution_status.as_deref(), Some("stopped"));
    assert_eq!(launcher.stopped.borrow().as_slice(), ["rover-task-1-1"]);
    assert!(
        launcher
            .removed
            .borrow()
            .iter()
            .any(|name| name == "rover-task-1-1")
    );
}

#[test]
fn restart_reruns_latest_iteration() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let failing = ScriptedLauncher {
        exit_code: 1,
        ..ScriptedLauncher::default()
    };
    let rover = orchestrator(&repo, &ai, &failing, &FixedConfirm(true));
    let failed = rover.start(request("retry http calls")).expect("start");
    assert_eq!(failed.task.status, TaskStatus::Failed);

    let succeeding = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &succeeding, &FixedConfirm(true));
    let outcome = rover.restart(1, false).expect("restart");

    assert_eq!(outcome.iteration, 1);
    assert_eq!(outcome.task.status, TaskStatus::Completed);
    assert_eq!(outcome.task.restart_count, 1);
    assert!(outcome.task.last_restart_at.is_some());
    assert_eq!(outcome.task.iterations, 1);
}

#[test]
fn reset_removes_workspace_and_keeps_iteration_count() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    let started = rover.start(request("retry http calls")).expect("start");
    rover.iterate(1, "again", false).expect("iterate");
    let (worktree, branch) = started.task.workspace().expect("workspace");
    let (worktree, branch) = (worktree.clone(), branch.to_string());

    let outcome = rover.reset(1).expect("reset");

    assert_eq!(outcome.task.status, TaskStatus::New);
    assert_eq!(outcome.task.iterations, 2);
    assert!(outcome.task.workspace().is_none());
    assert!(outcome.cleanup.worktree_removed);
    assert!(outcome.cleanup.branch_deleted);
    assert!(!worktree.exists());
    assert!(!repo.git().branch_exists(&branch));
}

#[test]
fn delete_removes_task_directory_and_branch() {
    let repo = TestRepo::new().expect("repo");
    let ai = retry_ai();
    let launcher = ScriptedLauncher::default();
    let rover = orchestrator(&repo, &ai, &launcher, &FixedConfirm(true));
    let started = rover.start(request("retry http calls")).expect("start");
    let branch = started.task.branch_name.clone().expect("branch");

    let outcome = rover.delete(1).expect("delete");

    assert_eq!(outcome.id, 1);
    assert!(outcome.cleanup.errors.is_empty());
    assert!(!repo.path().join(".rover/tasks/1").exists());
    assert!(!repo.git().branch_exists(&branch));
    assert!(rover.store().load(1).unwrap_err().is_not_found());
}
