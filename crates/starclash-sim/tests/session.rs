use tokio::sync::mpsc;

use starclash_core::room::{MatchConfig, MatchPhase};
use starclash_platformer::config::PlatformerConfig;
use starclash_platformer::stars::StarConfig;
use starclash_sim::config::SimConfig;
use starclash_sim::session::{self, Session, SessionCommand};

fn quick_match() -> MatchConfig {
    MatchConfig {
        star_requirement: 2,
        tick_rate_hz: 10,
        activation_delay_secs: 0.5,
        end_game_delay_secs: 1.0,
        ..MatchConfig::default()
    }
}

fn quiet_config() -> SimConfig {
    SimConfig {
        peers: 2,
        max_ticks: 100,
        late_joiner_at_tick: None,
        reset_tiles_at_tick: None,
        star_collect_chance: 0.0,
        bump_chance: 0.0,
        match_config: quick_match(),
        ..SimConfig::default()
    }
}

fn fast_stars() -> PlatformerConfig {
    PlatformerConfig {
        stars: StarConfig {
            respawn_secs: 0.5,
            camp_radius: 0.0,
            seed: 3,
        },
        ..PlatformerConfig::default()
    }
}

#[tokio::test]
async fn match_runs_to_a_single_winner() {
    let config = SimConfig {
        peers: 3,
        max_ticks: 5_000,
        star_collect_chance: 1.0,
        ..quiet_config()
    };
    let session = Session::new(config, fast_stars()).unwrap();
    let (_tx, rx) = mpsc::unbounded_channel();
    let summary = session::run(session, rx).await.unwrap();

    assert!(summary.ticks < 5_000);
    let winner = summary.winner.unwrap();
    assert!(summary.peers.iter().any(|p| p.id == winner));
    for peer in &summary.peers {
        assert_eq!(peer.phase, MatchPhase::GameOver);
    }
    assert!(summary.peers.iter().any(|p| p.stars >= 2));
}

#[tokio::test]
async fn late_joiner_and_reset_leave_grids_agreeing() {
    let config = SimConfig {
        bump_chance: 0.3,
        late_joiner_at_tick: Some(20),
        quiet_after_tick: Some(50),
        reset_tiles_at_tick: Some(60),
        max_ticks: 90,
        ..quiet_config()
    };
    let session = Session::new(config, PlatformerConfig::default()).unwrap();
    let (_tx, rx) = mpsc::unbounded_channel();
    let summary = session::run(session, rx).await.unwrap();

    assert_eq!(summary.ticks, 90);
    assert_eq!(summary.peers.len(), 3);
    assert!(summary.grids_agree);
    for peer in &summary.peers {
        assert_eq!(peer.phase, MatchPhase::InProgress);
        assert!(peer.grid_pristine);
    }
}

#[test]
fn authority_hands_over_to_next_member() {
    let config = SimConfig {
        peers: 3,
        authority_handover_tick: Some(20),
        ..quiet_config()
    };
    let mut session = Session::new(config, PlatformerConfig::default()).unwrap();
    for _ in 0..30 {
        session.step().unwrap();
    }
    assert_eq!(session.authority(), Some(2));
    assert!(session.sim(2).unwrap().is_authority());
    assert!(!session.sim(1).unwrap().is_authority());
}

#[tokio::test]
async fn commands_apply_before_stop() {
    let config = SimConfig {
        max_ticks: 1_000_000,
        ..quiet_config()
    };
    let session = Session::new(config, PlatformerConfig::default()).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(SessionCommand::Join(9)).unwrap();
    tx.send(SessionCommand::Leave(1)).unwrap();
    tx.send(SessionCommand::Stop).unwrap();
    let summary = session::run(session, rx).await.unwrap();

    assert_eq!(summary.ticks, 0);
    let ids: Vec<_> = summary.peers.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![2, 9]);
    assert_eq!(summary.authority, Some(2));
}
