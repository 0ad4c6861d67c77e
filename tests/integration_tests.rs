//! Integration tests for the ready-room matchmaking service
//!
//! These tests drive the public [`Matchmaker`] API end to end:
//! - Queueing, grouping and balancing into ready checks
//! - Acknowledgment, finalization and match creation
//! - Timeouts with requeue-or-drop resolution
//! - Match creation failures and lock release
//! - Region claims, disconnect removal and the command handler

mod fixtures;

use fixtures::{party, solo, steam_ids, ten_solos, TestSystem};
use ready_room::amqp::handlers::dispatch_message;
use ready_room::config::MatchmakingSettings;
use ready_room::error::MatchmakingError;
use ready_room::jobs::{
    confirmation_timeout_job_id, disconnect_job_id, matchmake_job_id, DueJob, Job,
};
use ready_room::matchmaking::{ConfirmOutcome, LockCoordinator, PassOutcome};
use ready_room::service::{run_job_worker, MatchmakerCommandHandler};
use ready_room::types::{ConfirmationId, ConfirmationStatus, MatchType, MatchmakingCommand};
use ready_room::{LobbyRegistry, Matchmaker};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Run one pass and expect it to open exactly one ready check
async fn open_one(sys: &TestSystem, match_type: MatchType, region: &str) -> ConfirmationId {
    let outcome = sys.matchmaker.matchmake(match_type, region).await.unwrap();
    assert!(outcome.ran);
    assert_eq!(outcome.confirmations.len(), 1, "{:?}", outcome);
    outcome.confirmations[0]
}

async fn confirm_all(matchmaker: &Matchmaker, id: ConfirmationId, players: &[String]) -> Vec<ConfirmOutcome> {
    let mut outcomes = Vec::new();
    for steam_id in players {
        outcomes.push(matchmaker.confirm_player(id, steam_id).await.unwrap());
    }
    outcomes
}

#[tokio::test]
async fn test_ten_solos_form_one_balanced_match() {
    let sys = TestSystem::new();
    let lobbies = ten_solos("na");
    sys.queue_lobbies(&lobbies).await;

    let outcome = sys.matchmaker.matchmake(MatchType::Competitive, "na").await.unwrap();
    assert!(outcome.ran);
    assert_eq!(outcome.confirmations.len(), 1);
    assert_eq!(outcome.unplaced, 0);
    assert!(!outcome.rescheduled);

    let details = sys
        .matchmaker
        .get_confirmation_details(outcome.confirmations[0])
        .await
        .unwrap()
        .unwrap();
    let confirmation = &details.confirmation;
    assert_eq!(confirmation.team1.len(), 5);
    assert_eq!(confirmation.team2.len(), 5);
    assert!(confirmation.teams_are_valid());
    assert_eq!(details.expected, 10);
    assert!(details.confirmed.is_empty());
    assert_eq!(confirmation.lobby_ids.len(), 10);

    // Stacking the top five against the bottom five would leave a 500 gap.
    let gap = (confirmation.team1.avg_rank - confirmation.team2.avg_rank).abs();
    assert!(gap < 500.0, "teams are skewed by {}", gap);
    let total = confirmation.team1.avg_rank * 5.0 + confirmation.team2.avg_rank * 5.0;
    assert!((total - 14500.0).abs() < 1e-6);

    for lobby in &lobbies {
        assert!(!sys.is_queued(lobby.lobby_id).await);
        assert!(sys.is_locked(lobby.lobby_id).await);
        assert_eq!(sys.confirmation_of(lobby.lobby_id).await, Some(confirmation.id));
    }
    assert_eq!(
        sys.matchmaker.queue().count(MatchType::Competitive, "na").await.unwrap(),
        0
    );
    assert!(sys.jobs.is_pending(&confirmation_timeout_job_id(confirmation.id)));
    assert_eq!(
        sys.publisher.confirmation_updates(ConfirmationStatus::Pending).len(),
        1
    );
}

#[tokio::test]
async fn test_full_lobby_matches_alone() {
    let sys = TestSystem::new();
    let full = party(MatchType::Competitive, &["na"], &[1200.0; 10], 0);
    let others: Vec<_> = (0..3)
        .map(|i| solo(MatchType::Competitive, "na", 1000.0 + i as f64))
        .collect();
    sys.queue_lobby(&full).await;
    sys.queue_lobbies(&others).await;

    let outcome = sys.matchmaker.matchmake(MatchType::Competitive, "na").await.unwrap();
    assert_eq!(outcome.confirmations.len(), 1);
    assert_eq!(outcome.unplaced, 3);
    assert!(!outcome.rescheduled);

    let details = sys
        .matchmaker
        .get_confirmation_details(outcome.confirmations[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.confirmation.lobby_ids, vec![full.lobby_id]);
    assert_eq!(details.confirmation.team1.len(), 5);
    assert_eq!(details.confirmation.team2.len(), 5);
    assert!(details.confirmation.teams_are_valid());

    assert!(!sys.is_queued(full.lobby_id).await);
    for lobby in &others {
        assert!(sys.is_queued(lobby.lobby_id).await);
        assert!(!sys.is_locked(lobby.lobby_id).await);
        assert_eq!(sys.confirmation_of(lobby.lobby_id).await, None);
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_requeues_ready_lobbies_and_drops_the_rest() {
    let mut sys = TestSystem::new();
    let duo = party(MatchType::Competitive, &["na"], &[2000.0, 2000.0], 0);
    let solos: Vec<_> = (0..8)
        .map(|i| solo(MatchType::Competitive, "na", 1000.0 + 100.0 * i as f64))
        .collect();
    sys.queue_lobby(&duo).await;
    sys.queue_lobbies(&solos).await;

    let id = open_one(&sys, MatchType::Competitive, "na").await;
    let outcomes = confirm_all(&sys.matchmaker, id, &steam_ids(&solos)).await;
    assert_eq!(
        outcomes.last(),
        Some(&ConfirmOutcome::Waiting {
            confirmed: 8,
            expected: 10
        })
    );

    let due = sys.next_due_job().await;
    assert_eq!(due.job_id, confirmation_timeout_job_id(id));
    assert_eq!(due.job, Job::CancelConfirmation { confirmation_id: id });
    sys.matchmaker.run_job(due).await.unwrap();

    assert!(sys.matchmaker.get_confirmation_details(id).await.unwrap().is_none());
    assert!(!sys.is_queued(duo.lobby_id).await);
    assert!(!sys.lobby_exists(duo.lobby_id).await);
    for lobby in &solos {
        assert!(sys.is_queued(lobby.lobby_id).await);
        assert!(!sys.is_locked(lobby.lobby_id).await);
        assert_eq!(sys.confirmation_of(lobby.lobby_id).await, None);
    }
    assert_eq!(
        sys.matchmaker.queue().count(MatchType::Competitive, "na").await.unwrap(),
        8
    );
    assert!(sys.jobs.is_pending(&matchmake_job_id(MatchType::Competitive, "na")));
    assert_eq!(
        sys.publisher.confirmation_updates(ConfirmationStatus::Cancelled).len(),
        1
    );
}

#[tokio::test]
async fn test_requeued_lobbies_are_unchanged_and_match_again() {
    let sys = TestSystem::new();
    let lobbies: Vec<_> = (0..4)
        .map(|i| solo(MatchType::Wingman, "eu", 1400.0 + 50.0 * i as f64))
        .collect();
    sys.queue_lobbies(&lobbies).await;

    let id = open_one(&sys, MatchType::Wingman, "eu").await;
    confirm_all(&sys.matchmaker, id, &steam_ids(&lobbies[..3])).await;
    let last = lobbies[3].clone();

    // A player who never answered takes only their own lobby down.
    let cancelled = sys.matchmaker.cancel_matchmaking(id, false).await.unwrap();
    assert_eq!(cancelled.requeued.len(), 3);
    assert_eq!(cancelled.dropped, vec![last.lobby_id]);
    assert!(cancelled.rescheduled);

    for lobby in &lobbies[..3] {
        let stored = sys
            .registry
            .get_lobby_details(lobby.lobby_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.players, lobby.players);
        assert!(sys.is_queued(lobby.lobby_id).await);
    }

    let newcomer = solo(MatchType::Wingman, "eu", 1500.0);
    sys.queue_lobby(&newcomer).await;
    let again = open_one(&sys, MatchType::Wingman, "eu").await;
    let details = sys
        .matchmaker
        .get_confirmation_details(again)
        .await
        .unwrap()
        .unwrap();
    let ids: HashSet<_> = details.confirmation.lobby_ids.iter().copied().collect();
    for lobby in &lobbies[..3] {
        assert!(ids.contains(&lobby.lobby_id));
    }
    assert!(ids.contains(&newcomer.lobby_id));
}

#[tokio::test]
async fn test_partly_unacknowledged_lobby_is_fully_dropped() {
    let sys = TestSystem::new();
    let duo = party(MatchType::Wingman, &["na", "eu"], &[1700.0, 1600.0], 0);
    let solos = vec![
        solo(MatchType::Wingman, "na", 1550.0),
        solo(MatchType::Wingman, "na", 1450.0),
    ];
    sys.queue_lobby(&duo).await;
    sys.queue_lobbies(&solos).await;
    assert_eq!(sys.matchmaker.queue().count(MatchType::Wingman, "eu").await.unwrap(), 1);

    let id = open_one(&sys, MatchType::Wingman, "na").await;
    assert_eq!(sys.matchmaker.queue().count(MatchType::Wingman, "eu").await.unwrap(), 0);

    sys.matchmaker
        .confirm_player(id, &duo.players[0].steam_id)
        .await
        .unwrap();
    let cancelled = sys.matchmaker.cancel_matchmaking(id, false).await.unwrap();

    assert!(cancelled.dropped.contains(&duo.lobby_id));
    assert!(!sys.is_queued(duo.lobby_id).await);
    assert!(!sys.lobby_exists(duo.lobby_id).await);
    assert_eq!(sys.confirmation_of(duo.lobby_id).await, None);
    for region in ["na", "eu"] {
        let queued = sys
            .matchmaker
            .queue()
            .snapshot(MatchType::Wingman, region)
            .await
            .unwrap();
        assert!(!queued.contains(&duo.lobby_id), "{}", region);
    }
    assert!(!sys.is_locked(duo.lobby_id).await);
}

#[tokio::test]
async fn test_everyone_confirming_creates_the_match() {
    let sys = TestSystem::new();
    let lobbies = ten_solos("na");
    sys.queue_lobbies(&lobbies).await;
    let id = open_one(&sys, MatchType::Competitive, "na").await;

    let players = steam_ids(&lobbies);
    let repeated = sys.matchmaker.confirm_player(id, &players[0]).await.unwrap();
    assert_eq!(
        repeated,
        ConfirmOutcome::Waiting {
            confirmed: 1,
            expected: 10
        }
    );
    let outcomes = confirm_all(&sys.matchmaker, id, &players).await;
    assert_eq!(
        outcomes[0],
        ConfirmOutcome::Waiting {
            confirmed: 1,
            expected: 10
        }
    );
    let match_id = match outcomes.last() {
        Some(ConfirmOutcome::Finalized { match_id }) => *match_id,
        other => panic!("expected a finalized match, got {:?}", other),
    };

    let details = sys
        .matchmaker
        .get_confirmation_details(id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.confirmation.match_id, Some(match_id));
    assert_eq!(details.confirmed.len(), 10);

    let record = sys
        .matches
        .store_service()
        .get_match(match_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.live);
    assert_eq!(record.match_type, MatchType::Competitive);
    assert_eq!(record.options.rules.max_rounds, 24);
    assert_eq!(record.options.region, "na");
    assert_eq!(record.lineup1, details.confirmation.team1.steam_ids());
    assert_eq!(record.lineup2, details.confirmation.team2.steam_ids());

    assert!(!sys.jobs.is_pending(&confirmation_timeout_job_id(id)));
    for lobby in &lobbies {
        assert!(!sys.is_locked(lobby.lobby_id).await);
        assert!(!sys.is_queued(lobby.lobby_id).await);
    }
    assert_eq!(sys.publisher.count_events_of_type("MatchLive"), 1);
    assert_eq!(
        sys.publisher.confirmation_updates(ConfirmationStatus::Finalized).len(),
        1
    );

    // Confirming again after the match exists changes nothing.
    assert_eq!(
        sys.matchmaker.confirm_player(id, &players[3]).await.unwrap(),
        ConfirmOutcome::Closed
    );
    assert_eq!(sys.matches.create_calls(), 1);
}

#[tokio::test]
async fn test_late_timeout_does_not_undo_a_created_match() {
    let sys = TestSystem::new();
    let lobbies = vec![solo(MatchType::Duel, "na", 1500.0), solo(MatchType::Duel, "na", 1520.0)];
    sys.queue_lobbies(&lobbies).await;
    let id = open_one(&sys, MatchType::Duel, "na").await;
    confirm_all(&sys.matchmaker, id, &steam_ids(&lobbies)).await;

    sys.matchmaker
        .run_job(DueJob {
            job_id: confirmation_timeout_job_id(id),
            job: Job::CancelConfirmation { confirmation_id: id },
        })
        .await
        .unwrap();

    let details = sys.matchmaker.get_confirmation_details(id).await.unwrap().unwrap();
    assert!(details.confirmation.match_id.is_some());
    for lobby in &lobbies {
        assert!(sys.lobby_exists(lobby.lobby_id).await);
    }
    assert!(sys
        .publisher
        .confirmation_updates(ConfirmationStatus::Cancelled)
        .is_empty());
}

#[tokio::test]
async fn test_cancel_by_match_id_drops_every_lobby() {
    let sys = TestSystem::new();
    let lobbies: Vec<_> = (0..4)
        .map(|i| solo(MatchType::Wingman, "na", 1300.0 + 10.0 * i as f64))
        .collect();
    sys.queue_lobbies(&lobbies).await;
    let id = open_one(&sys, MatchType::Wingman, "na").await;
    let match_id = match confirm_all(&sys.matchmaker, id, &steam_ids(&lobbies)).await.pop() {
        Some(ConfirmOutcome::Finalized { match_id }) => match_id,
        other => panic!("expected a finalized match, got {:?}", other),
    };

    let cancelled = sys
        .matchmaker
        .cancel_matchmaking_by_match_id(match_id)
        .await
        .unwrap();
    assert!(cancelled.requeued.is_empty());
    assert_eq!(cancelled.dropped.len(), 4);
    assert!(!cancelled.rescheduled);

    assert!(sys.matchmaker.get_confirmation_details(id).await.unwrap().is_none());
    for lobby in &lobbies {
        assert!(!sys.lobby_exists(lobby.lobby_id).await);
        assert!(!sys.is_queued(lobby.lobby_id).await);
    }

    let unknown = sys
        .matchmaker
        .cancel_matchmaking_by_match_id(Uuid::new_v4())
        .await
        .unwrap();
    assert!(unknown.requeued.is_empty() && unknown.dropped.is_empty());
}

#[tokio::test]
async fn test_match_creation_failure_requeues_without_stuck_locks() {
    let sys = TestSystem::new();
    let lobbies = vec![solo(MatchType::Duel, "eu", 1700.0), solo(MatchType::Duel, "eu", 1650.0)];
    sys.queue_lobbies(&lobbies).await;
    let id = open_one(&sys, MatchType::Duel, "eu").await;
    let players = steam_ids(&lobbies);

    sys.matchmaker.confirm_player(id, &players[0]).await.unwrap();
    sys.matches.set_failing(true);
    let outcome = sys.matchmaker.confirm_player(id, &players[1]).await.unwrap();
    assert!(
        matches!(outcome, ConfirmOutcome::CreationFailed { ref reason } if reason.contains("no game server")),
        "{:?}",
        outcome
    );

    assert!(sys.matchmaker.get_confirmation_details(id).await.unwrap().is_none());
    for lobby in &lobbies {
        assert!(sys.is_queued(lobby.lobby_id).await);
        assert!(!sys.is_locked(lobby.lobby_id).await);
        assert!(sys.lobby_exists(lobby.lobby_id).await);
        assert_eq!(sys.confirmation_of(lobby.lobby_id).await, None);
    }
    assert!(sys.jobs.is_pending(&matchmake_job_id(MatchType::Duel, "eu")));
    assert_eq!(sys.publisher.count_events_of_type("MatchLive"), 0);

    sys.matches.set_failing(false);
    let retry = open_one(&sys, MatchType::Duel, "eu").await;
    let outcomes = confirm_all(&sys.matchmaker, retry, &players).await;
    assert!(matches!(outcomes.last(), Some(ConfirmOutcome::Finalized { .. })));
    assert_eq!(sys.matches.create_calls(), 2);
}

#[tokio::test]
async fn test_confirm_rejects_unknown_confirmations_and_players() {
    let sys = TestSystem::new();
    let lobbies = vec![solo(MatchType::Duel, "na", 1000.0), solo(MatchType::Duel, "na", 1010.0)];
    sys.queue_lobbies(&lobbies).await;
    let id = open_one(&sys, MatchType::Duel, "na").await;

    let err = sys.matchmaker.confirm_player(id, "76561190000000000").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::PlayerNotInConfirmation { .. })
    ));

    let err = sys
        .matchmaker
        .confirm_player(Uuid::new_v4(), &lobbies[0].players[0].steam_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::ConfirmationNotFound { .. })
    ));

    assert!(sys
        .matchmaker
        .get_confirmation_details(Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_held_region_is_skipped_without_side_effects() {
    let sys = TestSystem::new();
    let lobbies = ten_solos("na");
    sys.queue_lobbies(&lobbies).await;

    let other_worker = LockCoordinator::new(
        sys.store.clone(),
        Duration::from_secs(60),
        Duration::from_secs(10),
    );
    assert!(other_worker.acquire_region_lock("na").await.unwrap());

    let skipped = sys.matchmaker.matchmake(MatchType::Competitive, "na").await.unwrap();
    assert_eq!(skipped, PassOutcome::default());
    assert_eq!(
        sys.matchmaker.queue().count(MatchType::Competitive, "na").await.unwrap(),
        10
    );
    for lobby in &lobbies {
        assert!(!sys.is_locked(lobby.lobby_id).await);
    }
    assert_eq!(sys.jobs.pending_count(), 0);
    assert_eq!(sys.publisher.count_events_of_type("ConfirmationUpdate"), 0);

    // Other regions are claimed independently.
    assert!(sys.matchmaker.matchmake(MatchType::Competitive, "eu").await.unwrap().ran);

    other_worker.release_region_lock("na").await.unwrap();
    open_one(&sys, MatchType::Competitive, "na").await;
}

#[tokio::test]
async fn test_locked_lobby_is_left_queued() {
    let sys = TestSystem::new();
    let busy = solo(MatchType::Duel, "na", 2500.0);
    let free = vec![solo(MatchType::Duel, "na", 1500.0), solo(MatchType::Duel, "na", 1400.0)];
    sys.queue_lobby(&busy).await;
    sys.queue_lobbies(&free).await;

    let other_worker = LockCoordinator::new(
        sys.store.clone(),
        Duration::from_secs(60),
        Duration::from_secs(10),
    );
    assert!(other_worker.acquire_lobby_lock(busy.lobby_id).await.unwrap());

    let id = open_one(&sys, MatchType::Duel, "na").await;
    let details = sys.matchmaker.get_confirmation_details(id).await.unwrap().unwrap();
    assert!(!details.confirmation.lobby_ids.contains(&busy.lobby_id));
    assert_eq!(details.confirmation.lobby_ids.len(), 2);
    assert!(sys.is_queued(busy.lobby_id).await);
}

#[tokio::test]
async fn test_vanished_lobby_is_skipped() {
    let sys = TestSystem::new();
    let gone = solo(MatchType::Duel, "na", 1500.0);
    let present = solo(MatchType::Duel, "na", 1490.0);
    sys.queue_lobby(&gone).await;
    sys.queue_lobby(&present).await;
    sys.registry.delete_lobby(gone.lobby_id).await.unwrap();

    let outcome = sys.matchmaker.matchmake(MatchType::Duel, "na").await.unwrap();
    assert!(outcome.ran);
    assert!(outcome.confirmations.is_empty());
    assert_eq!(outcome.unplaced, 1);
    assert!(!outcome.rescheduled);
    assert!(sys.is_queued(present.lobby_id).await);
}

#[tokio::test]
async fn test_rank_gating_splits_distant_lobbies_and_reschedules() {
    let settings = MatchmakingSettings {
        rank_gating_enabled: true,
        ..MatchmakingSettings::default()
    };
    let sys = TestSystem::with_settings(settings);
    let lobbies: Vec<_> = [1000.0, 2000.0, 3000.0]
        .iter()
        .map(|rank| party(MatchType::Wingman, &["na"], &[*rank, *rank], 0))
        .collect();
    sys.queue_lobbies(&lobbies).await;

    let outcome = sys.matchmaker.matchmake(MatchType::Wingman, "na").await.unwrap();
    assert!(outcome.ran);
    assert!(outcome.confirmations.is_empty());
    assert_eq!(outcome.unplaced, 6);
    assert!(outcome.rescheduled);
    assert!(sys.jobs.is_pending(&matchmake_job_id(MatchType::Wingman, "na")));
    for lobby in &lobbies {
        assert!(sys.is_queued(lobby.lobby_id).await);
        assert!(!sys.is_locked(lobby.lobby_id).await);
    }
}

#[tokio::test]
async fn test_long_wait_widens_the_tolerated_spread() {
    let settings = MatchmakingSettings {
        rank_gating_enabled: true,
        ..MatchmakingSettings::default()
    };
    let sys = TestSystem::with_settings(settings);
    let veteran = party(MatchType::Wingman, &["na"], &[3000.0, 3000.0], 120);
    let newcomers = vec![
        party(MatchType::Wingman, &["na"], &[1000.0, 1000.0], 0),
        party(MatchType::Wingman, &["na"], &[1000.0, 1000.0], 0),
    ];
    sys.queue_lobby(&veteran).await;
    sys.queue_lobbies(&newcomers).await;

    let outcome = sys.matchmaker.matchmake(MatchType::Wingman, "na").await.unwrap();
    assert_eq!(outcome.confirmations.len(), 1);
    assert_eq!(outcome.unplaced, 2);
    assert!(!outcome.rescheduled);

    let details = sys
        .matchmaker
        .get_confirmation_details(outcome.confirmations[0])
        .await
        .unwrap()
        .unwrap();
    assert!(details.confirmation.lobby_ids.contains(&veteran.lobby_id));
    assert!(details.confirmation.teams_are_valid());
}

#[tokio::test]
async fn test_add_lobby_runs_a_pass_and_broadcasts() {
    let sys = TestSystem::new();
    let first = party(MatchType::Duel, &["na", "eu"], &[1500.0], 0);
    let second = solo(MatchType::Duel, "eu", 1480.0);

    assert!(sys.submit_lobby(&first).await);
    assert!(sys.is_queued(first.lobby_id).await);
    assert_eq!(sys.matchmaker.queue().count(MatchType::Duel, "na").await.unwrap(), 1);
    assert_eq!(sys.matchmaker.queue().count(MatchType::Duel, "eu").await.unwrap(), 1);
    assert!(sys.publisher.count_events_of_type("QueueCounts") >= 2);
    assert!(sys.publisher.count_events_of_type("LobbyUpdate") >= 1);

    assert!(sys.submit_lobby(&second).await);
    let id = sys.confirmation_of(first.lobby_id).await.unwrap();
    assert_eq!(sys.confirmation_of(second.lobby_id).await, Some(id));
    let details = sys.matchmaker.get_confirmation_details(id).await.unwrap().unwrap();
    assert_eq!(details.confirmation.region, "eu");
    assert_eq!(sys.matchmaker.queue().count(MatchType::Duel, "na").await.unwrap(), 0);

    assert!(!sys.matchmaker.add_lobby_to_queue(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn test_leaving_queue() {
    let sys = TestSystem::new();
    let lobby = solo(MatchType::Competitive, "na", 1200.0);
    sys.queue_lobby(&lobby).await;

    assert!(sys.matchmaker.remove_lobby_from_queue(lobby.lobby_id).await.unwrap());
    assert!(!sys.is_queued(lobby.lobby_id).await);
    assert!(!sys.matchmaker.remove_lobby_from_queue(lobby.lobby_id).await.unwrap());
}

#[tokio::test]
async fn test_leaving_during_ready_check_cancels_it() {
    let sys = TestSystem::new();
    let stayer = solo(MatchType::Duel, "na", 1500.0);
    let leaver = solo(MatchType::Duel, "na", 1400.0);
    sys.queue_lobbies(&[stayer.clone(), leaver.clone()]).await;
    let id = open_one(&sys, MatchType::Duel, "na").await;

    sys.matchmaker
        .confirm_player(id, &stayer.players[0].steam_id)
        .await
        .unwrap();
    sys.matchmaker
        .remove_lobby_from_queue(leaver.lobby_id)
        .await
        .unwrap();

    assert!(sys.matchmaker.get_confirmation_details(id).await.unwrap().is_none());
    assert!(!sys.jobs.is_pending(&confirmation_timeout_job_id(id)));
    assert!(sys.is_queued(stayer.lobby_id).await);
    assert!(!sys.is_queued(leaver.lobby_id).await);
    assert!(!sys.lobby_exists(leaver.lobby_id).await);
}

#[tokio::test]
async fn test_reconnect_cancels_disconnect_removal() {
    let sys = TestSystem::new();
    let lobby = solo(MatchType::Wingman, "na", 1200.0);
    sys.queue_lobby(&lobby).await;

    sys.matchmaker
        .schedule_disconnect_removal(lobby.lobby_id)
        .await
        .unwrap();
    assert!(sys.jobs.is_pending(&disconnect_job_id(lobby.lobby_id)));

    assert!(sys
        .matchmaker
        .cancel_disconnect_removal(lobby.lobby_id)
        .await
        .unwrap());
    assert!(!sys
        .matchmaker
        .cancel_disconnect_removal(lobby.lobby_id)
        .await
        .unwrap());
    assert!(sys.is_queued(lobby.lobby_id).await);
}

#[tokio::test(start_paused = true)]
async fn test_job_worker_removes_disconnected_lobby() {
    let mut sys = TestSystem::new();
    let lobby = solo(MatchType::Wingman, "na", 1200.0);
    sys.queue_lobby(&lobby).await;

    let due = sys.due.take().unwrap();
    let worker = tokio::spawn(run_job_worker(sys.matchmaker.clone(), due));

    sys.matchmaker
        .schedule_disconnect_removal(lobby.lobby_id)
        .await
        .unwrap();

    for _ in 0..60 {
        if !sys.is_queued(lobby.lobby_id).await {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(!sys.is_queued(lobby.lobby_id).await);
    assert!(sys.lobby_exists(lobby.lobby_id).await);

    worker.abort();
}

#[tokio::test]
async fn test_sweep_covers_every_type_and_region() {
    let sys = TestSystem::new();
    sys.queue_lobbies(&[
        solo(MatchType::Duel, "eu", 1000.0),
        solo(MatchType::Duel, "eu", 1100.0),
        solo(MatchType::Wingman, "na", 1000.0),
    ])
    .await;

    assert_eq!(sys.matchmaker.sweep().await.unwrap(), 1);
    assert_eq!(sys.matchmaker.queue().total().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_ends_ready_check_of_a_dead_worker() {
    let sys = TestSystem::new();
    let lobbies = ten_solos("na");
    sys.queue_lobbies(&lobbies).await;

    // Nothing ever drains this worker's due jobs, as if it crashed.
    let worker = sys.spawn_worker();
    let outcome = worker.matchmake(MatchType::Competitive, "na").await.unwrap();
    let id = outcome.confirmations[0];
    drop(worker);

    let players = steam_ids(&lobbies);
    for steam_id in &players[..9] {
        sys.matchmaker.confirm_player(id, steam_id).await.unwrap();
    }

    assert_eq!(sys.matchmaker.sweep().await.unwrap(), 0);
    assert!(sys.matchmaker.get_confirmation_details(id).await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(sys.matchmaker.sweep().await.unwrap(), 0);

    assert!(sys.matchmaker.get_confirmation_details(id).await.unwrap().is_none());
    let (requeued, dropped): (Vec<_>, Vec<_>) =
        lobbies.iter().partition(|lobby| lobby.steam_ids()[0] != players[9]);
    for lobby in &requeued {
        assert!(sys.is_queued(lobby.lobby_id).await);
        assert!(!sys.is_locked(lobby.lobby_id).await);
        assert_eq!(sys.confirmation_of(lobby.lobby_id).await, None);
    }
    assert!(!sys.is_queued(dropped[0].lobby_id).await);
    assert!(!sys.lobby_exists(dropped[0].lobby_id).await);
    assert_eq!(
        sys.publisher.confirmation_updates(ConfirmationStatus::Cancelled).len(),
        1
    );
}

#[tokio::test]
async fn test_command_handler_drives_the_matchmaker() {
    let sys = TestSystem::new();
    let handler = MatchmakerCommandHandler::new(sys.matchmaker.clone(), sys.metrics.clone());
    let lobbies = vec![solo(MatchType::Duel, "na", 1500.0), solo(MatchType::Duel, "na", 1500.0)];

    for lobby in &lobbies {
        sys.registry.upsert_lobby(lobby).await.unwrap();
        let body = serde_json::to_vec(&MatchmakingCommand::AddLobby {
            lobby_id: lobby.lobby_id,
        })
        .unwrap();
        assert!(dispatch_message(&handler, &body).await);
    }

    let id = sys.confirmation_of(lobbies[0].lobby_id).await.unwrap();
    for steam_id in steam_ids(&lobbies) {
        let body = serde_json::to_vec(&MatchmakingCommand::ConfirmPlayer {
            confirmation_id: id,
            steam_id,
        })
        .unwrap();
        assert!(dispatch_message(&handler, &body).await);
    }
    assert_eq!(sys.publisher.count_events_of_type("MatchLive"), 1);

    let stranger = serde_json::to_vec(&MatchmakingCommand::ConfirmPlayer {
        confirmation_id: id,
        steam_id: "76561190000000001".to_string(),
    })
    .unwrap();
    assert!(!dispatch_message(&handler, &stranger).await);
    assert!(!dispatch_message(&handler, b"not a command").await);

    let match_id = sys
        .matchmaker
        .get_confirmation_details(id)
        .await
        .unwrap()
        .unwrap()
        .confirmation
        .match_id
        .unwrap();
    let cancel = serde_json::to_vec(&MatchmakingCommand::CancelMatchmakingByMatch { match_id }).unwrap();
    assert!(dispatch_message(&handler, &cancel).await);
    for lobby in &lobbies {
        assert!(!sys.lobby_exists(lobby.lobby_id).await);
    }
}

#[tokio::test]
async fn test_command_handler_leave_and_matchmake() {
    let sys = TestSystem::new();
    let handler = Arc::new(MatchmakerCommandHandler::new(
        sys.matchmaker.clone(),
        sys.metrics.clone(),
    ));
    let lobbies = ten_solos("eu");
    sys.queue_lobbies(&lobbies).await;

    let leave = serde_json::to_vec(&MatchmakingCommand::LeaveQueue {
        lobby_id: lobbies[0].lobby_id,
    })
    .unwrap();
    assert!(dispatch_message(handler.as_ref(), &leave).await);
    assert!(!sys.is_queued(lobbies[0].lobby_id).await);

    sys.queue_lobby(&solo(MatchType::Competitive, "eu", 1450.0)).await;
    let matchmake = serde_json::to_vec(&MatchmakingCommand::Matchmake {
        match_type: MatchType::Competitive,
        region: "eu".to_string(),
    })
    .unwrap();
    assert!(dispatch_message(handler.as_ref(), &matchmake).await);
    assert_eq!(sys.matchmaker.queue().total().await.unwrap(), 0);
}
