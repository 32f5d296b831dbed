/// Consistency tests
///
/// Cross-entity invariants under concurrent and adversarial interleavings:
/// roll-up counters, unique markers, reorder conflicts, retry budget and
/// paging.
/// Run with: cargo test --test consistency_tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{InterceptingStore, fast_config, repos, seed_lesson};
use coursekv::storage::{Condition, UpdateAction, WriteOp};
use coursekv::{
    Category, DomainError, InMemoryStore, InMemoryStoreConfig, ItemKey, KeyValueStore,
    Pagination, PositionUpdate, Repositories, RepositoryConfig, User, Video,
};
use futures::future::join_all;

#[tokio::test]
async fn test_counters_track_children_under_concurrent_create_and_delete() {
    let (repos, _) = repos().await;
    seed_lesson(&repos, 1, 1).await;
    let repos = Arc::new(repos);

    // Videos 1..=10 exist up front; 11..=20 are created while 1..=5 are deleted.
    for id in 1..=10 {
        repos
            .videos
            .save_if_not_exists_or_throw(&Video::new(1, 1, id * 100, "clip", 60))
            .await
            .unwrap();
    }

    let mut handles = vec![];
    for id in 11..=20 {
        let repos = Arc::clone(&repos);
        handles.push(tokio::spawn(async move {
            repos
                .videos
                .save_if_not_exists_or_throw(&Video::new(1, 1, id * 100, "clip", 30))
                .await
        }));
    }
    for id in 1..=5 {
        let repos = Arc::clone(&repos);
        handles.push(tokio::spawn(async move {
            repos.videos.delete_if_exists_or_throw(1, 1, id * 100).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let videos = repos.videos.find_many(1, &Pagination::all()).await.unwrap();
    let expected_duration: i64 = videos.items.iter().map(|v| v.duration_in_sec).sum();
    assert_eq!(videos.items.len(), 15);
    assert_eq!(expected_duration, 5 * 60 + 10 * 30);

    let lesson = repos.lessons.find_by_id_or_throw(1, 1).await.unwrap();
    assert_eq!(lesson.number_of_videos, 15);
    assert_eq!(lesson.number_of_durations, expected_duration);

    let course = repos.courses.find_by_id_or_throw(1).await.unwrap();
    assert_eq!(course.number_of_videos, 15);
    assert_eq!(course.number_of_durations, expected_duration);
}

#[tokio::test]
async fn test_concurrent_enrollments_count_students() {
    let (repos, _) = repos().await;
    seed_lesson(&repos, 3, 1).await;

    let creates = (1..=12).map(|user_id| {
        let repos = repos.clone();
        async move {
            repos
                .enrollments
                .save_if_not_exists_or_throw(&coursekv::Enrollment::new(user_id, 3))
                .await
        }
    });
    for result in join_all(creates).await {
        result.unwrap();
    }

    let deletes = (1..=4).map(|user_id| {
        let repos = repos.clone();
        async move { repos.enrollments.delete_if_exists_or_throw(user_id, 3).await }
    });
    for result in join_all(deletes).await {
        result.unwrap();
    }

    let course = repos.courses.find_by_id_or_throw(3).await.unwrap();
    assert_eq!(course.number_of_students, 8);
}

#[tokio::test]
async fn test_concurrent_email_claims_have_one_winner() {
    let (repos, _) = repos().await;
    let repos = Arc::new(repos);
    let contenders = 8;

    let mut handles = vec![];
    for user_id in 1..=contenders {
        let repos = Arc::clone(&repos);
        handles.push(tokio::spawn(async move {
            repos
                .users
                .save_if_not_exists_or_throw(&User::new(user_id, "same@example.com", "racer"))
                .await
        }));
    }

    let mut successes = 0;
    let mut violations = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => successes += 1,
            Err(DomainError::UniqueConstraintViolation { field, value }) => {
                assert_eq!(field, "email");
                assert_eq!(value, "same@example.com");
                violations += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(violations, contenders - 1);

    let owner = repos.users.find_by_email_or_throw("same@example.com").await.unwrap();
    assert!(repos.users.find_by_id(owner.user_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_category_titles_have_one_winner() {
    let (repos, _) = repos().await;
    let claims = (1..=5).map(|id| {
        let repos = repos.clone();
        async move {
            repos
                .categories
                .save_if_not_exists_or_throw(&Category::new(id, "Systems"))
                .await
        }
    });
    let results = join_all(claims).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, DomainError::UniqueConstraintViolation { .. }))
    );
}

#[tokio::test]
async fn test_deleting_absent_entities_is_success_and_keeps_counters() {
    let (repos, _) = repos().await;
    seed_lesson(&repos, 1, 1).await;
    repos
        .videos
        .save_if_not_exists_or_throw(&Video::new(1, 1, 1000, "intro", 90))
        .await
        .unwrap();

    repos.videos.delete_if_exists_or_throw(1, 1, 1000).await.unwrap();
    repos.videos.delete_if_exists_or_throw(1, 1, 1000).await.unwrap();
    repos.videos.delete_if_exists_or_throw(1, 1, 4242).await.unwrap();
    repos.attachments.delete_if_exists_or_throw(1, 1, 7).await.unwrap();
    repos.enrollments.delete_if_exists_or_throw(9, 1).await.unwrap();
    repos.categories.delete_if_exists_or_throw(5).await.unwrap();
    repos.users.delete_if_exists_or_throw(5).await.unwrap();
    repos.courses.delete_if_exists_or_throw(77).await.unwrap();

    let lesson = repos.lessons.find_by_id_or_throw(1, 1).await.unwrap();
    assert_eq!(lesson.number_of_videos, 0);
    assert_eq!(lesson.number_of_durations, 0);
    assert_eq!(lesson.number_of_attachments, 0);

    let course = repos.courses.find_by_id_or_throw(1).await.unwrap();
    assert_eq!(course.number_of_videos, 0);
    assert_eq!(course.number_of_students, 0);
    assert_eq!(course.number_of_lessons, 1);
}

#[tokio::test]
async fn test_reorder_lands_between_neighbors() {
    let (repos, _) = repos().await;
    seed_lesson(&repos, 1, 1).await;
    for (position, title) in [(10, "a"), (20, "b"), (30, "c")] {
        repos
            .videos
            .save_if_not_exists_or_throw(&Video::new(1, 1, position, title, 10))
            .await
            .unwrap();
    }
    let version = repos.lessons.find_by_id_or_throw(1, 1).await.unwrap().video_arrangement_version;
    assert_eq!(version, 3);

    let position = repos
        .videos
        .update_position(&PositionUpdate {
            course_id: 1,
            lesson_id: 1,
            video_id: 30,
            upper: Some(10),
            lower: Some(20),
            expected_version: version,
        })
        .await
        .unwrap();
    assert!(10 < position && position < 20);
    assert_eq!(position, 15);

    let moved = repos.videos.find_by_id_or_throw(1, position).await.unwrap();
    assert_eq!(moved.title, "c");
    assert!(repos.videos.find_by_id(1, 30).await.unwrap().is_none());

    let lesson = repos.lessons.find_by_id_or_throw(1, 1).await.unwrap();
    assert_eq!(lesson.video_arrangement_version, version + 1);
    assert_eq!(lesson.number_of_videos, 3);
    assert_eq!(lesson.number_of_durations, 30);

    let order: Vec<i64> = repos
        .videos
        .find_many(1, &Pagination::all())
        .await
        .unwrap()
        .items
        .iter()
        .map(|v| v.video_id)
        .collect();
    assert_eq!(order, vec![20, 15, 10]);
}

#[tokio::test]
async fn test_reorder_with_stale_version_is_rejected() {
    let (repos, _) = repos().await;
    seed_lesson(&repos, 1, 1).await;
    for position in [10, 20] {
        repos
            .videos
            .save_if_not_exists_or_throw(&Video::new(1, 1, position, "v", 10))
            .await
            .unwrap();
    }

    let err = repos
        .videos
        .update_position(&PositionUpdate {
            course_id: 1,
            lesson_id: 1,
            video_id: 20,
            upper: Some(10),
            lower: None,
            expected_version: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
    assert!(repos.videos.find_by_id(1, 20).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_rearrangement_between_read_and_commit_is_rejected() {
    let memory = Arc::new(InMemoryStore::new());
    let config = fast_config();
    for schema in config.tables.schemas() {
        memory.create_table(schema).await;
    }

    let lessons_table = config.tables.lesson.clone();
    let videos_table = config.tables.video.clone();
    let store = Arc::new(InterceptingStore::new(memory.clone()).before_transact(Box::new(
        move |ops: &[WriteOp]| {
            let is_reorder = ops
                .iter()
                .any(|op| matches!(op, WriteOp::Delete { table, .. } if *table == videos_table));
            is_reorder.then(|| {
                WriteOp::update(
                    &lessons_table,
                    ItemKey::new(1, 1),
                    vec![UpdateAction::add("videoArrangementVersion", 1)],
                    Condition::Exists,
                )
            })
        },
    )));
    let repos = Repositories::new(store, &config);
    seed_lesson(&repos, 1, 1).await;
    for position in [10, 20] {
        repos
            .videos
            .save_if_not_exists_or_throw(&Video::new(1, 1, position, "v", 10))
            .await
            .unwrap();
    }

    let err = repos
        .videos
        .update_position(&PositionUpdate {
            course_id: 1,
            lesson_id: 1,
            video_id: 10,
            upper: Some(20),
            lower: None,
            expected_version: 2,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)), "got {err:?}");

    let order: Vec<i64> = repos
        .videos
        .find_many(1, &Pagination::all())
        .await
        .unwrap()
        .items
        .iter()
        .map(|v| v.video_id)
        .collect();
    assert_eq!(order, vec![20, 10]);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_conflict_exhausts_retries_with_doubling_backoff() {
    let memory = Arc::new(InMemoryStore::new());
    let config = RepositoryConfig::default();
    for schema in config.tables.schemas() {
        memory.create_table(schema).await;
    }
    let seeding = Repositories::new(memory.clone(), &config);
    seed_lesson(&seeding, 1, 1).await;
    seeding
        .videos
        .save_if_not_exists_or_throw(&Video::new(1, 1, 100, "stuck", 45))
        .await
        .unwrap();

    let store = Arc::new(InterceptingStore::new(memory.clone()).failing_first_item());
    let repos = Repositories::new(store.clone(), &config);

    let err = repos.videos.delete_if_exists_or_throw(1, 1, 100).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)), "got {err:?}");

    let times = store.transact_times();
    assert_eq!(times.len(), 6, "one attempt plus five retries");
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected: Vec<Duration> = [200, 400, 800, 1600, 3200]
        .into_iter()
        .map(Duration::from_millis)
        .collect();
    assert_eq!(gaps, expected);
    for pair in gaps.windows(2) {
        assert_eq!(pair[1], pair[0] * 2);
    }

    assert!(memory.get("videos", &ItemKey::new(1, 100)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_paging_resumes_exactly_where_it_stopped() {
    let (repos, _) = repos().await;
    for id in 1..=10 {
        repos
            .categories
            .save_if_not_exists_or_throw(&Category::new(id, &format!("category {id}")))
            .await
            .unwrap();
    }

    let first = repos.categories.find_many(&Pagination::limit(3)).await.unwrap();
    assert_eq!(first.items.len(), 3);
    assert!(first.cursor.is_some());

    let rest = repos
        .categories
        .find_many(&Pagination::limit(100).after(first.cursor.clone()))
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 7);
    assert!(rest.cursor.is_none());

    let mut seen: Vec<i64> = first
        .items
        .iter()
        .chain(rest.items.iter())
        .map(|c| c.category_id)
        .collect();
    assert_eq!(seen, (1..=10).rev().collect::<Vec<_>>());
    seen.dedup();
    assert_eq!(seen.len(), 10);
}

#[tokio::test]
async fn test_paging_across_small_store_pages() {
    let memory = Arc::new(InMemoryStore::with_config(InMemoryStoreConfig {
        max_page_items: 2,
        ..Default::default()
    }));
    let config = fast_config();
    for schema in config.tables.schemas() {
        memory.create_table(schema).await;
    }
    let repos = Repositories::new(memory, &config);
    for id in 1..=9 {
        repos
            .categories
            .save_if_not_exists_or_throw(&Category::new(id, &format!("c{id}")))
            .await
            .unwrap();
    }

    let page = repos.categories.find_many(&Pagination::limit(5)).await.unwrap();
    assert_eq!(page.items.len(), 5);
    assert!(page.cursor.is_some());

    let everything = repos.categories.find_many(&Pagination::all()).await.unwrap();
    assert_eq!(everything.items.len(), 9);
    assert!(everything.cursor.is_none());

    let empty = repos.categories.find_many(&Pagination::limit(0)).await.unwrap();
    assert!(empty.items.is_empty());
}

#[tokio::test]
async fn test_cancellation_without_reasons_is_internal() {
    let memory = Arc::new(InMemoryStore::with_config(InMemoryStoreConfig {
        report_cancellation_reasons: false,
        ..Default::default()
    }));
    let config = fast_config();
    for schema in config.tables.schemas() {
        memory.create_table(schema).await;
    }
    let repos = Repositories::new(memory, &config);
    seed_lesson(&repos, 1, 1).await;

    let video = Video::new(1, 1, 10, "dup", 5);
    repos.videos.save_if_not_exists_or_throw(&video).await.unwrap();
    let err = repos.videos.save_if_not_exists_or_throw(&video).await.unwrap_err();
    assert!(matches!(err, DomainError::Internal(_)), "got {err:?}");

    let lesson = repos.lessons.find_by_id_or_throw(1, 1).await.unwrap();
    assert_eq!(lesson.number_of_videos, 1);
}

#[tokio::test]
async fn test_store_is_shareable_as_trait_object() {
    let memory = Arc::new(InMemoryStore::new());
    let store: Arc<dyn KeyValueStore> = memory.clone();
    let err = store.get("missing", &ItemKey::new(1, 1)).await.unwrap_err();
    assert!(err.to_string().contains("missing"));
}
