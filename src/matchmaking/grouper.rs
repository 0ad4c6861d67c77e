//! Candidate group formation
//!
//! Lobbies that already hold a full match are split out first. The rest are
//! ordered by a per-lobby score and walked into groups. With rank gating on,
//! a group's tolerated rank spread widens with the wait of its first member.

use crate::config::MatchmakingSettings;
use crate::types::{LobbyDetails, MatchType};
use crate::utils::rank_difference;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::warn;

/// Result of grouping one (type, region) snapshot
#[derive(Debug, Default)]
pub struct GroupingPlan {
    /// Lobbies that fill a match on their own
    pub full_lobbies: Vec<LobbyDetails>,
    /// Candidate groups, each handed to the balancer independently
    pub groups: Vec<Vec<LobbyDetails>>,
    /// Lobbies whose size can never be placed for this type
    pub unplaceable: Vec<LobbyDetails>,
}

impl GroupingPlan {
    /// Lobbies surfaced by the plan across every bucket
    pub fn lobby_count(&self) -> usize {
        self.full_lobbies.len()
            + self.groups.iter().map(Vec::len).sum::<usize>()
            + self.unplaceable.len()
    }
}

#[derive(Debug, Clone)]
pub struct Grouper {
    rank_weight: f64,
    wait_weight: f64,
    spread_per_second: f64,
    min_spread_seconds: f64,
    gating_enabled: bool,
}

impl Grouper {
    pub fn new(
        rank_weight: f64,
        wait_weight: f64,
        spread_per_second: f64,
        min_spread_seconds: u64,
        gating_enabled: bool,
    ) -> Self {
        Self {
            rank_weight,
            wait_weight,
            spread_per_second,
            min_spread_seconds: min_spread_seconds as f64,
            gating_enabled,
        }
    }

    pub fn from_settings(settings: &MatchmakingSettings) -> Self {
        Self::new(
            settings.rank_weight,
            settings.wait_weight,
            settings.spread_per_second,
            settings.min_spread_seconds,
            settings.rank_gating_enabled,
        )
    }

    pub fn gating_enabled(&self) -> bool {
        self.gating_enabled
    }

    /// Rank spread a group tolerates once its first member waited `wait_seconds`
    pub fn allowed_spread(&self, wait_seconds: f64) -> f64 {
        self.spread_per_second * wait_seconds.max(self.min_spread_seconds)
    }

    /// Ordering score; higher sorts first
    pub fn score(&self, lobby: &LobbyDetails, max_wait: f64, now: DateTime<Utc>) -> f64 {
        let normalized_wait = if max_wait > 0.0 {
            lobby.wait_seconds(now) / max_wait
        } else {
            0.0
        };
        self.rank_weight * lobby.avg_rank + self.wait_weight * normalized_wait
    }

    pub fn group(
        &self,
        match_type: MatchType,
        lobbies: Vec<LobbyDetails>,
        now: DateTime<Utc>,
    ) -> GroupingPlan {
        let required = match_type.required_players();
        let team_size = match_type.team_size();
        let mut plan = GroupingPlan::default();
        let mut candidates = Vec::with_capacity(lobbies.len());

        for lobby in lobbies {
            let size = lobby.player_count();
            if size == required {
                plan.full_lobbies.push(lobby);
            } else if size == 0 || size > team_size {
                warn!(
                    "Lobby {} has {} players and cannot be placed in a {} match",
                    lobby.lobby_id, size, match_type
                );
                plan.unplaceable.push(lobby);
            } else {
                candidates.push(lobby);
            }
        }

        if candidates.is_empty() {
            return plan;
        }

        let max_wait = candidates
            .iter()
            .map(|l| l.wait_seconds(now))
            .fold(0.0_f64, f64::max);
        let mut scored: Vec<(f64, LobbyDetails)> = candidates
            .into_iter()
            .map(|lobby| (self.score(&lobby, max_wait, now), lobby))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        let ordered = scored.into_iter().map(|(_, lobby)| lobby);

        if !self.gating_enabled {
            plan.groups.push(ordered.collect());
            return plan;
        }

        let mut current: Vec<LobbyDetails> = Vec::new();
        for lobby in ordered {
            let fits = match current.first() {
                Some(first) => {
                    let spread = self.allowed_spread(first.wait_seconds(now));
                    rank_difference(lobby.avg_rank, first.avg_rank) <= spread
                }
                None => true,
            };
            if !fits {
                plan.groups.push(std::mem::take(&mut current));
            }
            current.push(lobby);
        }
        if !current.is_empty() {
            plan.groups.push(current);
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LobbyPlayer;
    use chrono::Duration;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn grouper(gating: bool) -> Grouper {
        Grouper::new(0.7, 0.3, 25.0, 10, gating)
    }

    fn lobby(ranks: &[f64], waited_secs: i64, now: DateTime<Utc>) -> LobbyDetails {
        LobbyDetails::new(
            Uuid::new_v4(),
            MatchType::Competitive,
            vec!["na".to_string()],
            ranks
                .iter()
                .map(|r| LobbyPlayer::new(Uuid::new_v4().to_string(), *r))
                .collect(),
            now - Duration::seconds(waited_secs),
        )
    }

    #[test]
    fn test_allowed_spread_values() {
        let g = grouper(true);
        assert_eq!(g.allowed_spread(0.0), 250.0);
        assert_eq!(g.allowed_spread(10.0), 250.0);
        assert_eq!(g.allowed_spread(120.0), 3000.0);
    }

    #[test]
    fn test_full_lobby_bypasses_grouping() {
        let now = Utc::now();
        let full = lobby(&[1000.0; 10], 5, now);
        let single = lobby(&[1200.0], 5, now);
        let plan = grouper(false).group(MatchType::Competitive, vec![single.clone(), full.clone()], now);

        assert_eq!(plan.full_lobbies.len(), 1);
        assert_eq!(plan.full_lobbies[0].lobby_id, full.lobby_id);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0][0].lobby_id, single.lobby_id);
    }

    #[test]
    fn test_oversized_lobby_is_unplaceable() {
        let now = Utc::now();
        let oversized = lobby(&[1000.0; 6], 5, now);
        let plan = grouper(false).group(MatchType::Competitive, vec![oversized], now);
        assert_eq!(plan.unplaceable.len(), 1);
        assert!(plan.groups.is_empty());
    }

    #[test]
    fn test_sort_prefers_rank_then_wait() {
        let now = Utc::now();
        let low = lobby(&[1000.0], 100, now);
        let high = lobby(&[2000.0], 0, now);
        let tied_fresh = lobby(&[1500.0], 0, now);
        let tied_old = lobby(&[1500.0], 90, now);

        let plan = grouper(false).group(
            MatchType::Competitive,
            vec![low.clone(), tied_fresh.clone(), high.clone(), tied_old.clone()],
            now,
        );
        let order: Vec<_> = plan.groups[0].iter().map(|l| l.lobby_id).collect();
        assert_eq!(
            order,
            vec![high.lobby_id, tied_old.lobby_id, tied_fresh.lobby_id, low.lobby_id]
        );
    }

    #[test]
    fn test_gating_splits_on_spread() {
        let now = Utc::now();
        // Fresh lobbies tolerate 250 rank points from the group's first member.
        let a = lobby(&[2000.0], 0, now);
        let b = lobby(&[1800.0], 0, now);
        let c = lobby(&[1200.0], 0, now);
        let d = lobby(&[1100.0], 0, now);

        let plan = grouper(true).group(MatchType::Competitive, vec![a, b, c, d], now);
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].len(), 2);
        assert_eq!(plan.groups[1].len(), 2);

        let plan = grouper(false).group(
            MatchType::Competitive,
            vec![lobby(&[2000.0], 0, now), lobby(&[1100.0], 0, now)],
            now,
        );
        assert_eq!(plan.groups.len(), 1);
    }

    #[test]
    fn test_long_wait_widens_group() {
        let now = Utc::now();
        let veteran = lobby(&[2000.0], 120, now);
        let newcomer = lobby(&[1000.0], 0, now);
        let plan = grouper(true).group(MatchType::Competitive, vec![newcomer, veteran], now);
        assert_eq!(plan.groups.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_allowed_spread_is_monotonic(a in 0.0f64..10_000.0, b in 0.0f64..10_000.0) {
            let g = grouper(true);
            let (shorter, longer) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(g.allowed_spread(shorter) <= g.allowed_spread(longer));
        }

        #[test]
        fn prop_grouping_keeps_every_lobby_once(
            shapes in prop::collection::vec((1usize..=10, 0.0f64..3000.0, 0i64..600), 0..40),
            gating in any::<bool>(),
        ) {
            let now = Utc::now();
            let lobbies: Vec<LobbyDetails> = shapes
                .iter()
                .map(|(size, rank, wait)| lobby(&vec![*rank; *size], *wait, now))
                .collect();
            let mut expected: Vec<_> = lobbies.iter().map(|l| l.lobby_id).collect();

            let plan = grouper(gating).group(MatchType::Competitive, lobbies, now);
            let mut seen: Vec<_> = plan
                .full_lobbies
                .iter()
                .chain(plan.groups.iter().flatten())
                .chain(plan.unplaceable.iter())
                .map(|l| l.lobby_id)
                .collect();

            expected.sort();
            seen.sort();
            prop_assert_eq!(seen, expected);
            prop_assert!(plan.groups.iter().all(|g| !g.is_empty()));
        }
    }
}
