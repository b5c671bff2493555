mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::Barrier;

use common::MockChat;
use subdesk::chat::ChatGateway;
use subdesk::db::repository;
use subdesk::models::AssignmentFlags;
use subdesk::services::{BoardReconciler, ClaimOutcome, SubService};

fn make_service(db: &SqlitePool, chat: Arc<MockChat>) -> SubService {
    let gateway: Arc<dyn ChatGateway> = chat;
    let board = Arc::new(BoardReconciler::new(db.clone(), Arc::clone(&gateway)));
    SubService::new(db.clone(), gateway, board)
}

#[tokio::test]
async fn request_sub_opens_request_and_flags_duplicates() {
    let db = common::setup_db().await;
    let service = make_service(&db, Arc::new(MockChat::new()));

    let course = common::create_course(&db, 3, 0).await;
    let lesson = common::create_lesson(&db, course.id, Utc::now() + Duration::days(3)).await;
    let anna = common::create_instructor(&db, "1001", "Anna").await;

    let (id, duplicate) = service
        .request_sub(lesson.id, anna.id, Some("dentist".to_string()))
        .await
        .unwrap();
    assert!(!duplicate);

    let request = repository::find_sub_request(&db, id).await.unwrap().unwrap();
    assert!(request.is_open);
    assert_eq!(request.sent_notification, 0);
    assert_eq!(request.reason.as_deref(), Some("dentist"));

    // A second open request for the same lesson is allowed but flagged.
    let (_, duplicate) = service.request_sub(lesson.id, anna.id, None).await.unwrap();
    assert!(duplicate);
}

#[tokio::test]
async fn request_sub_for_missing_lesson_fails() {
    let db = common::setup_db().await;
    let service = make_service(&db, Arc::new(MockChat::new()));
    let anna = common::create_instructor(&db, "1001", "Anna").await;

    let result = service.request_sub(9999, anna.id, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn claim_swaps_assignments_and_closes_request() {
    let db = common::setup_db().await;
    let service = make_service(&db, Arc::new(MockChat::new()));

    let course = common::create_course(&db, 3, 0).await;
    let lesson = common::create_lesson(&db, course.id, Utc::now() + Duration::days(3)).await;
    let anna = common::create_instructor(&db, "1001", "Anna").await;
    let ben = common::create_instructor(&db, "1002", "Ben").await;
    service
        .assign_instructor(lesson.id, anna.id, AssignmentFlags::default())
        .await
        .unwrap();

    let (request_id, _) = service.request_sub(lesson.id, anna.id, None).await.unwrap();
    repository::set_lesson_outdated(&db, lesson.id, false)
        .await
        .unwrap();

    let outcome = service.claim_sub(request_id, ben.id, true).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Filled);

    let request = repository::find_sub_request(&db, request_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!request.is_open);
    assert_eq!(request.filled_by, Some(ben.id));
    assert!(request.filled_at.is_some());

    let assignments = repository::fetch_lesson_assignments(&db, lesson.id)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].instructor_id, ben.id);
    let flags = AssignmentFlags::from_bits(assignments[0].flags);
    assert!(flags.is_sub);
    assert!(flags.is_free_will);

    // The claim made the calendar event stale.
    let lesson = repository::find_lesson(&db, lesson.id).await.unwrap().unwrap();
    assert!(lesson.calendar_outdated);
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let db = common::setup_db().await;
    let service = Arc::new(make_service(&db, Arc::new(MockChat::new())));

    let course = common::create_course(&db, 3, 0).await;
    let lesson = common::create_lesson(&db, course.id, Utc::now() + Duration::days(3)).await;
    let anna = common::create_instructor(&db, "1001", "Anna").await;
    let ben = common::create_instructor(&db, "1002", "Ben").await;
    let cleo = common::create_instructor(&db, "1003", "Cleo").await;
    service
        .assign_instructor(lesson.id, anna.id, AssignmentFlags::default())
        .await
        .unwrap();
    let (request_id, _) = service.request_sub(lesson.id, anna.id, None).await.unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let first = tokio::spawn({
        let service = Arc::clone(&service);
        let barrier = Arc::clone(&barrier);
        async move {
            barrier.wait().await;
            service.claim_sub(request_id, ben.id, false).await.unwrap()
        }
    });
    let second = tokio::spawn({
        let service = Arc::clone(&service);
        let barrier = Arc::clone(&barrier);
        async move {
            barrier.wait().await;
            service.claim_sub(request_id, cleo.id, false).await.unwrap()
        }
    });

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let filled = outcomes
        .iter()
        .filter(|o| **o == ClaimOutcome::Filled)
        .count();
    let already = outcomes
        .iter()
        .filter(|o| **o == ClaimOutcome::AlreadyFilled)
        .count();
    assert_eq!(filled, 1);
    assert_eq!(already, 1);

    // The lesson ends up with exactly one substitute, the winner.
    let assignments = repository::fetch_lesson_assignments(&db, lesson.id)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    let request = repository::find_sub_request(&db, request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.filled_by, Some(assignments[0].instructor_id));
}

#[tokio::test]
async fn self_claim_is_rejected_without_mutation() {
    let db = common::setup_db().await;
    let service = make_service(&db, Arc::new(MockChat::new()));

    let course = common::create_course(&db, 3, 0).await;
    let lesson = common::create_lesson(&db, course.id, Utc::now() + Duration::days(3)).await;
    let anna = common::create_instructor(&db, "1001", "Anna").await;
    service
        .assign_instructor(lesson.id, anna.id, AssignmentFlags::default())
        .await
        .unwrap();
    let (request_id, _) = service.request_sub(lesson.id, anna.id, None).await.unwrap();

    let outcome = service.claim_sub(request_id, anna.id, true).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::SelfClaim);

    let request = repository::find_sub_request(&db, request_id)
        .await
        .unwrap()
        .unwrap();
    assert!(request.is_open);
    assert_eq!(request.filled_by, None);
    let assignments = repository::fetch_lesson_assignments(&db, lesson.id)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].instructor_id, anna.id);
}

#[tokio::test]
async fn claim_of_unknown_request_is_not_found() {
    let db = common::setup_db().await;
    let service = make_service(&db, Arc::new(MockChat::new()));
    let ben = common::create_instructor(&db, "1002", "Ben").await;

    let outcome = service.claim_sub(424242, ben.id, false).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::NotFound);
}

#[tokio::test]
async fn admin_fill_bypasses_self_claim_but_not_already_filled() {
    let db = common::setup_db().await;
    let service = make_service(&db, Arc::new(MockChat::new()));

    let course = common::create_course(&db, 3, 0).await;
    let lesson = common::create_lesson(&db, course.id, Utc::now() + Duration::days(3)).await;
    let anna = common::create_instructor(&db, "1001", "Anna").await;
    let ben = common::create_instructor(&db, "1002", "Ben").await;
    service
        .assign_instructor(lesson.id, anna.id, AssignmentFlags::default())
        .await
        .unwrap();
    let (request_id, _) = service.request_sub(lesson.id, anna.id, None).await.unwrap();

    // Admin may designate the requester themselves (e.g. the request became moot).
    let outcome = service.admin_fill(request_id, anna.id, false).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Filled);

    let outcome = service.admin_fill(request_id, ben.id, false).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::AlreadyFilled);
}

#[tokio::test]
async fn third_assignment_is_rejected() {
    let db = common::setup_db().await;
    let service = make_service(&db, Arc::new(MockChat::new()));

    let course = common::create_course(&db, 3, 0).await;
    let lesson = common::create_lesson(&db, course.id, Utc::now() + Duration::days(3)).await;
    let anna = common::create_instructor(&db, "1001", "Anna").await;
    let ben = common::create_instructor(&db, "1002", "Ben").await;
    let cleo = common::create_instructor(&db, "1003", "Cleo").await;

    service
        .assign_instructor(lesson.id, anna.id, AssignmentFlags::default())
        .await
        .unwrap();
    service
        .assign_instructor(lesson.id, ben.id, AssignmentFlags::default())
        .await
        .unwrap();
    let result = service
        .assign_instructor(lesson.id, cleo.id, AssignmentFlags::default())
        .await;
    assert!(result.is_err());

    let assignments = repository::fetch_lesson_assignments(&db, lesson.id)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 2);
}

#[tokio::test]
async fn filled_claim_announces_to_filled_channel() {
    let db = common::setup_db().await;
    let chat = Arc::new(MockChat::new());
    let service = make_service(&db, Arc::clone(&chat));

    repository::set_config(&db, repository::CONFIG_FILLED_SUB_CHANNEL, "filled-ch")
        .await
        .unwrap();

    let course = common::create_course(&db, 5, 0).await;
    let lesson = common::create_lesson(&db, course.id, Utc::now() + Duration::days(3)).await;
    let anna = common::create_instructor(&db, "1001", "Anna").await;
    let ben = common::create_instructor(&db, "1002", "Ben").await;
    service
        .assign_instructor(lesson.id, anna.id, AssignmentFlags::default())
        .await
        .unwrap();
    let (request_id, _) = service.request_sub(lesson.id, anna.id, None).await.unwrap();

    let outcome = service.claim_sub(request_id, ben.id, true).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Filled);

    // The announcement is a spawned task; give it a moment.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let announcements = chat.sends_to("filled-ch");
    assert_eq!(announcements.len(), 1);
    let content = &announcements[0].content;
    assert!(content.contains("<@1002>"), "missing filler ping: {content}");
    assert!(content.contains("~~"), "missing strikethrough: {content}");
    assert!(content.contains('\u{2605}'), "missing free-will star: {content}");
}
