//! End-to-end submissions through `QueueService` against SQLite

use ci_dispatch::db::Store;
use ci_dispatch::domain::Submission;
use ci_dispatch::integrations::CommitState;
use ci_dispatch::queue::QueueError;
use ci_dispatch::scheduler::{ErrorKind, SubmissionState};
use tokio_test::{assert_err, assert_ok};

use super::common::*;

fn pull_request() -> Submission {
    Submission {
        parent: PARENT.to_string(),
        fork: FORK.to_string(),
        head_sha: HEAD_SHA.to_string(),
        base_sha: BASE_SHA.to_string(),
        ticket_id: 42,
        ..Default::default()
    }
}

fn run_names(items: &[ci_dispatch::domain::QueueItem]) -> Vec<&str> {
    items.iter().map(|qi| qi.run.name.as_str()).collect()
}

#[tokio::test]
async fn test_pull_request_selects_touched_tasks_and_dependencies() {
    let env = TestEnv::new("monorepo").await;
    env.host.set_diff(&["api/handler.go"]);

    let items = assert_ok!(env.service.submit(pull_request()).await);

    assert_eq!(run_names(&items), vec!["*root*:test", "api:lint", "api:unit"]);
    assert_eq!(items[1].queue_name, "fast");
    assert_eq!(items[2].queue_name, "default");
    assert_eq!(items[2].run.settings.timeout, 600);
    assert_eq!(
        items[0].run.settings.metadata.get("team"),
        Some(&serde_json::json!("platform"))
    );

    assert_eq!(env.count("tasks").await, 3);
    assert_eq!(env.count("runs").await, 3);
    assert_eq!(env.count("queue_items").await, 3);
    assert_eq!(env.count("submissions").await, 1);

    let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM tasks ORDER BY id")
        .fetch_all(env.store.pool())
        .await
        .unwrap();
    assert_eq!(paths, vec![".", "api", "lib"]);

    let statuses = env.host.statuses(3).await;
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|(target, state)| {
        *state == CommitState::Pending && target.sha == HEAD_SHA && target.owner == "acme"
    }));
    assert_eq!(
        env.host.cleared(),
        vec![(PARENT.to_string(), HEAD_SHA.to_string())]
    );
}

#[tokio::test]
async fn test_mainline_push_builds_everything() {
    let env = TestEnv::new("monorepo").await;
    let sub = Submission {
        parent: PARENT.to_string(),
        fork: PARENT.to_string(),
        head_sha: "refs/heads/master".to_string(),
        base_sha: BASE_SHA.to_string(),
        ..Default::default()
    };

    let items = assert_ok!(env.service.submit(sub).await);

    assert_eq!(
        run_names(&items),
        vec!["*root*:test", "api:lint", "api:unit", "web:build"]
    );
    assert_eq!(env.count("tasks").await, 4);
    assert_eq!(env.count("refs").await, 1);
}

#[tokio::test]
async fn test_manual_submission_builds_everything_for_fork_parent() {
    let env = TestEnv::new("monorepo").await;
    let sub = Submission {
        fork: FORK.to_string(),
        head_sha: "feature".to_string(),
        submitted_by: "dev".to_string(),
        all: true,
        manual: true,
        ..Default::default()
    };

    let items = assert_ok!(env.service.submit(sub).await);
    assert_eq!(items.len(), 4);

    let fork = assert_ok!(env.store.get_repository(FORK).await);
    assert!(fork.auto_created);
    assert!(fork.disabled);
    assert_eq!(fork.owner.map(|o| o.username), Some("acme".to_string()));

    let task = assert_ok!(env.store.get_task(items[0].run.task.id).await);
    assert_eq!(
        task.submission.user.map(|u| u.username),
        Some("dev".to_string())
    );
    assert_eq!(task.submission.head_ref.ref_name, "heads/feature");
}

#[tokio::test]
async fn test_invalid_descriptor_comments_and_persists_nothing() {
    let env = TestEnv::new("monorepo").await;
    env.host.put_file("task.yml", "runs: [[[");

    let err = assert_err!(env.service.submit(pull_request()).await);
    let err = match err {
        QueueError::Submit(err) => err,
        other => panic!("expected a submission error, got {}", other),
    };
    assert_eq!(err.kind(), ErrorKind::Descriptor);
    assert_eq!(err.state(), Some(SubmissionState::SelectingTasks));

    let comments = env.host.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, PARENT);
    assert_eq!(comments[0].1, 42);

    assert_eq!(env.count("tasks").await, 0);
    assert_eq!(env.count("queue_items").await, 0);

    let statuses = env.host.statuses(1).await;
    assert_eq!(statuses[0].0.context, "*global*");
    assert!(statuses[0].1.description().starts_with("failed to start job: "));
}

#[tokio::test]
async fn test_concurrent_first_touch_creates_one_fork() {
    let env = TestEnv::new("monorepo").await;
    env.host.set_diff(&["web/index.js"]);

    let (a, b) = tokio::join!(
        env.service.submit(pull_request()),
        env.service.submit(pull_request())
    );
    assert_ok!(a);
    assert_ok!(b);

    assert_eq!(env.count("repositories").await, 2);
    assert_eq!(env.count("refs").await, 2);
    assert_eq!(env.count("submissions").await, 2);
}

#[tokio::test]
async fn test_resubmission_reuses_refs_and_supersedes_queue() {
    let env = TestEnv::new("monorepo").await;
    env.host.set_diff(&["web/index.js"]);

    let first = assert_ok!(env.service.submit(pull_request()).await);
    let second = assert_ok!(env.service.submit(pull_request()).await);

    assert_eq!(
        first[0].run.task.submission.head_ref.id,
        second[0].run.task.submission.head_ref.id
    );
    assert_eq!(env.count("refs").await, 2);

    let canceled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE canceled = 1")
        .fetch_one(env.store.pool())
        .await
        .unwrap();
    assert_eq!(canceled, 2);
    assert_eq!(env.count("queue_items").await, 2);

    let claimed = assert_ok!(env.service.next_queue_item("default", "runner").await);
    assert_eq!(claimed.id, second[0].id);
}

#[tokio::test]
async fn test_next_queue_item_claims_in_order_and_reports_start() {
    let env = TestEnv::new("monorepo").await;
    env.host.set_diff(&["api/handler.go"]);
    let items = assert_ok!(env.service.submit(pull_request()).await);
    env.host.statuses(3).await;

    let first = assert_ok!(env.service.next_queue_item("default", "runner-1").await);
    let second = assert_ok!(env.service.next_queue_item("default", "runner-2").await);
    let fast = assert_ok!(env.service.next_queue_item("fast", "runner-3").await);

    assert_eq!(first.run.name, "*root*:test");
    assert_eq!(second.run.name, "api:unit");
    assert_eq!(fast.run.name, "api:lint");
    assert_eq!(first.id, items[0].id);
    assert!(first.running);
    assert_eq!(first.running_on.as_deref(), Some("runner-1"));

    let err = assert_err!(env.service.next_queue_item("default", "runner-1").await);
    assert!(matches!(err, QueueError::Store(ref e) if e.is_not_found()));

    let statuses = env.host.statuses(6).await;
    let started: Vec<_> = statuses
        .iter()
        .filter(|(_, state)| *state == CommitState::Started)
        .map(|(target, _)| target.url.clone())
        .collect();
    assert_eq!(started.len(), 3);
    assert!(started.contains(&format!("{}/log/{}", STATUS_URL, first.run.id)));
}
