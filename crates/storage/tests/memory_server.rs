use live_core::model::{
    ClassId, EmomMark, ExerciseRow, QuantityType, Scaling, ScalingFilter, SessionStatus, UserId,
    WorkoutDefinition, WorkoutId, WorkoutMetadata, WorkoutType,
};
use live_core::sequencer::Direction;
use live_core::time::fixed_clock;
use storage::gateway::{ChangeFeed, ChangeKind, CoachGateway, GatewayError, LiveClassGateway};
use storage::memory::InMemoryLiveServer;

const CLASS: ClassId = ClassId::new(10);

fn workout(workout_type: WorkoutType, reps: &[u32], metadata: WorkoutMetadata) -> WorkoutDefinition {
    WorkoutDefinition {
        workout_type,
        rows: reps
            .iter()
            .enumerate()
            .map(|(i, r)| ExerciseRow {
                round: 1,
                subround: 1,
                position: i as u32,
                name: format!("Move {i}"),
                quantity_type: QuantityType::Reps,
                quantity: *r,
                target_reps: Some(*r),
            })
            .collect(),
        metadata,
    }
}

fn server_with(workout: WorkoutDefinition, duration_minutes: u32, users: &[u64]) -> InMemoryLiveServer {
    let server = InMemoryLiveServer::new(fixed_clock());
    server
        .schedule_class(CLASS, WorkoutId::new(1), workout, duration_minutes)
        .unwrap();
    for user in users {
        server
            .book(CLASS, UserId::new(*user), &format!("Member {user}"))
            .unwrap();
    }
    server
}

#[tokio::test]
async fn session_is_absent_until_prepared() {
    let server = server_with(workout(WorkoutType::ForTime, &[5], WorkoutMetadata::default()), 10, &[1]);
    let member = server.participant(UserId::new(1));
    assert!(member.get_session(CLASS).await.unwrap().is_none());

    server.prepare_session(CLASS).unwrap();
    let snapshot = member.get_session(CLASS).await.unwrap().unwrap();
    assert_eq!(snapshot.session.status(), SessionStatus::Ready);
    assert_eq!(snapshot.session.step_count(), 1);
}

#[tokio::test]
async fn for_time_finish_is_frozen_and_ranked() {
    let server = server_with(
        workout(WorkoutType::ForTime, &[5, 10], WorkoutMetadata::default()),
        10,
        &[1, 2],
    );
    server.start_session(CLASS).await.unwrap();
    let fast = server.participant(UserId::new(1));
    let slow = server.participant(UserId::new(2));

    server.advance_clock(30).unwrap();
    fast.advance(CLASS, Direction::Forward, 1).await.unwrap();
    slow.advance(CLASS, Direction::Forward, 1).await.unwrap();
    server.advance_clock(45).unwrap();
    let done = fast.advance(CLASS, Direction::Forward, 2).await.unwrap();
    assert!(done.finished);
    assert_eq!(done.current_step, 2);

    server.advance_clock(100).unwrap();
    let progress = fast.get_my_progress(CLASS).await.unwrap();
    assert_eq!(progress.finish_elapsed_seconds, Some(75));

    let entries = fast.get_leaderboard(CLASS, ScalingFilter::All).await.unwrap();
    let board = live_core::ranker::rank(&entries, ScalingFilter::All);
    assert_eq!(board.position_of(UserId::new(1)), Some(1));
    assert_eq!(board.entries[0].entry.elapsed_seconds, Some(75));
    assert_eq!(board.entries[1].entry.total_reps, Some(5));
}

#[tokio::test]
async fn coach_transitions_follow_the_lifecycle() {
    let server = server_with(workout(WorkoutType::Amrap, &[5], WorkoutMetadata::default()), 20, &[1]);
    assert_eq!(
        server.pause_session(CLASS).await.unwrap_err(),
        GatewayError::NotStarted
    );
    server.start_session(CLASS).await.unwrap();
    assert_eq!(
        server.start_session(CLASS).await.unwrap_err(),
        GatewayError::AlreadyStarted
    );

    server.advance_clock(60).unwrap();
    server.pause_session(CLASS).await.unwrap();
    let member = server.participant(UserId::new(1));
    assert_eq!(
        member.advance(CLASS, Direction::Forward, 1).await.unwrap_err(),
        GatewayError::NotLive
    );

    server.advance_clock(40).unwrap();
    let resumed = server.resume_session(CLASS).await.unwrap();
    assert_eq!(resumed.session.pause_accumulated_seconds(), 40);

    let stopped = server.stop_session(CLASS).await.unwrap();
    assert_eq!(stopped.session.status(), SessionStatus::Ended);
    assert_eq!(
        server.start_session(CLASS).await.unwrap_err(),
        GatewayError::AlreadyEnded
    );
}

#[tokio::test]
async fn advance_after_cap_ends_the_session() {
    let server = server_with(workout(WorkoutType::ForTime, &[5, 5], WorkoutMetadata::default()), 1, &[1]);
    server.start_session(CLASS).await.unwrap();
    let member = server.participant(UserId::new(1));

    server.advance_clock(61).unwrap();
    assert_eq!(
        member.advance(CLASS, Direction::Forward, 1).await.unwrap_err(),
        GatewayError::TimeUp
    );
    let snapshot = member.get_session(CLASS).await.unwrap().unwrap();
    assert_eq!(snapshot.session.status(), SessionStatus::Ended);
    assert_eq!(
        live_core::elapsed_seconds(&snapshot.session, snapshot.server_now),
        60
    );
}

#[tokio::test]
async fn stale_and_duplicate_requests_are_no_ops() {
    let server = server_with(workout(WorkoutType::ForTime, &[5, 5, 5], WorkoutMetadata::default()), 10, &[1]);
    server.start_session(CLASS).await.unwrap();
    let member = server.participant(UserId::new(1));

    member.advance(CLASS, Direction::Forward, 1).await.unwrap();
    member.advance(CLASS, Direction::Forward, 2).await.unwrap();
    let stale = member.advance(CLASS, Direction::Backward, 1).await.unwrap();
    assert!(!stale.applied);
    assert_eq!(stale.current_step, 2);

    server.stop_session(CLASS).await.unwrap();
    let first = member.submit_partial(CLASS, 4).await.unwrap();
    let second = member.submit_partial(CLASS, 9).await.unwrap();
    assert!(first.accepted);
    assert!(!second.accepted);
    assert_eq!(second.reps, 4);

    let entries = member.get_leaderboard(CLASS, ScalingFilter::All).await.unwrap();
    assert_eq!(entries[0].total_reps, Some(14));
}

#[tokio::test]
async fn amrap_total_correction_maps_onto_cursor() {
    let server = server_with(workout(WorkoutType::Amrap, &[10, 15, 5], WorkoutMetadata::default()), 20, &[1]);
    server.start_session(CLASS).await.unwrap();
    server.set_amrap_total(CLASS, UserId::new(1), 72).await.unwrap();

    let member = server.participant(UserId::new(1));
    let progress = member.get_my_progress(CLASS).await.unwrap();
    assert_eq!(progress.rounds_completed, 2);
    assert_eq!(progress.current_step, 1);
    assert_eq!(progress.dnf_partial_reps, 2);

    let entries = member.get_leaderboard(CLASS, ScalingFilter::All).await.unwrap();
    assert_eq!(entries[0].total_reps, Some(72));

    assert_eq!(
        server
            .set_for_time_finish(CLASS, UserId::new(1), Some(90))
            .await
            .unwrap_err(),
        GatewayError::Unsupported(WorkoutType::Amrap)
    );
}

#[tokio::test]
async fn for_time_total_correction_turns_a_finish_into_a_dnf() {
    let server = server_with(workout(WorkoutType::ForTime, &[5, 5, 5], WorkoutMetadata::default()), 10, &[1]);
    server.start_session(CLASS).await.unwrap();
    let member = server.participant(UserId::new(1));
    for seq in 1..=3 {
        member.advance(CLASS, Direction::Forward, seq).await.unwrap();
    }
    assert!(member.get_my_progress(CLASS).await.unwrap().is_finished());

    server.set_for_time_total(CLASS, UserId::new(1), 12).await.unwrap();
    let progress = member.get_my_progress(CLASS).await.unwrap();
    assert!(!progress.is_finished());
    assert_eq!(progress.current_step, 2);
    assert_eq!(progress.dnf_partial_reps, 2);
    assert!(progress.partial_submitted);

    let entries = member.get_leaderboard(CLASS, ScalingFilter::All).await.unwrap();
    assert!(!entries[0].finished);
    assert_eq!(entries[0].total_reps, Some(12));

    // A total above the whole workout stays on the last step.
    server.set_for_time_total(CLASS, UserId::new(1), 40).await.unwrap();
    let progress = member.get_my_progress(CLASS).await.unwrap();
    assert_eq!((progress.current_step, progress.dnf_partial_reps), (2, 30));
}

#[tokio::test]
async fn coach_emom_mark_overwrites_the_members_minute() {
    let metadata = WorkoutMetadata {
        emom_repeats: vec![3],
        ..WorkoutMetadata::default()
    };
    let server = server_with(workout(WorkoutType::Emom, &[3, 3], metadata), 10, &[1]);
    assert_eq!(
        server
            .set_emom_mark(CLASS, UserId::new(1), EmomMark::finished(0, 20, 2))
            .await
            .unwrap_err(),
        GatewayError::NotStarted
    );
    server.start_session(CLASS).await.unwrap();
    let member = server.participant(UserId::new(1));
    member.mark_emom_minute(CLASS, EmomMark::penalty(0, 1)).await.unwrap();

    server
        .set_emom_mark(CLASS, UserId::new(1), EmomMark::finished(0, 20, 2))
        .await
        .unwrap();
    server.advance_clock(65).unwrap();
    let entries = member.get_leaderboard(CLASS, ScalingFilter::All).await.unwrap();
    assert_eq!(entries[0].elapsed_seconds, Some(20));

    assert_eq!(
        server
            .set_emom_mark(CLASS, UserId::new(7), EmomMark::penalty(0, 0))
            .await
            .unwrap_err(),
        GatewayError::NotBooked(UserId::new(7))
    );
}

#[tokio::test]
async fn emom_marks_feed_cumulative_leaderboard() {
    let metadata = WorkoutMetadata {
        emom_repeats: vec![3],
        ..WorkoutMetadata::default()
    };
    let server = server_with(workout(WorkoutType::Emom, &[3, 3], metadata), 10, &[1, 2]);
    server.start_session(CLASS).await.unwrap();
    let a = server.participant(UserId::new(1));
    let b = server.participant(UserId::new(2));

    a.mark_emom_minute(CLASS, EmomMark::finished(0, 35, 2)).await.unwrap();
    b.mark_emom_minute(CLASS, EmomMark::penalty(0, 1)).await.unwrap();
    server.advance_clock(65).unwrap();

    let entries = a.get_leaderboard(CLASS, ScalingFilter::All).await.unwrap();
    let board = live_core::ranker::rank(&entries, ScalingFilter::All);
    assert_eq!(board.order(), vec![UserId::new(1), UserId::new(2)]);
    assert_eq!(board.entries[0].entry.elapsed_seconds, Some(35));
    assert_eq!(board.entries[1].entry.elapsed_seconds, Some(60));
    assert!(board.entries.iter().all(|ranked| ranked.entry.finished));

    assert_eq!(
        a.advance(CLASS, Direction::Forward, 1).await.unwrap_err(),
        GatewayError::Unsupported(WorkoutType::Emom)
    );
}

#[tokio::test]
async fn interval_scores_respect_step_range_and_scaling() {
    let server = server_with(workout(WorkoutType::Tabata, &[20, 20], WorkoutMetadata::default()), 10, &[1, 2]);
    server.start_session(CLASS).await.unwrap();
    let a = server.participant(UserId::new(1));
    let b = server.participant(UserId::new(2));
    b.set_scaling(CLASS, Scaling::Sc).await.unwrap();

    a.post_interval_score(CLASS, 0, 22).await.unwrap();
    a.post_interval_score(CLASS, 1, 15).await.unwrap();
    server
        .post_interval_score_for(CLASS, UserId::new(2), 0, 30)
        .await
        .unwrap();
    assert!(matches!(
        a.post_interval_score(CLASS, 5, 1).await.unwrap_err(),
        GatewayError::Rejected(_)
    ));

    let rx = a.get_leaderboard(CLASS, ScalingFilter::Rx).await.unwrap();
    assert_eq!(rx.len(), 1);
    assert_eq!(rx[0].total_reps, Some(37));
    assert_eq!(rx[0].completed_minutes, Some(1));

    let all = a.get_leaderboard(CLASS, ScalingFilter::All).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn unbooked_members_are_rejected() {
    let server = server_with(workout(WorkoutType::ForTime, &[5], WorkoutMetadata::default()), 10, &[1]);
    server.start_session(CLASS).await.unwrap();
    let stranger = server.participant(UserId::new(99));
    assert_eq!(
        stranger.advance(CLASS, Direction::Forward, 1).await.unwrap_err(),
        GatewayError::NotBooked(UserId::new(99))
    );
}

#[tokio::test]
async fn change_feed_announces_transitions_and_progress() {
    let server = server_with(workout(WorkoutType::ForTime, &[5, 5], WorkoutMetadata::default()), 10, &[1]);
    let mut rx = server.subscribe(CLASS);
    assert_eq!(server.subscriber_count(CLASS), 1);

    server.start_session(CLASS).await.unwrap();
    server
        .participant(UserId::new(1))
        .advance(CLASS, Direction::Forward, 1)
        .await
        .unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, ChangeKind::Session);
    let second = rx.recv().await.unwrap();
    assert_eq!(second.kind, ChangeKind::Progress);
    assert_eq!(second.user_id, Some(UserId::new(1)));

    drop(rx);
    assert_eq!(server.subscriber_count(CLASS), 0);
}
