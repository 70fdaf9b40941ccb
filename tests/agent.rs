//! End-to-end agent scenarios: time-budgeted decisions with a live worker
//! pool, and the save/load round trip.

use ponder::{moves, MctsAgent, State};
use std::time::Duration;

#[test]
fn two_worker_decisions() {
    let mut agent = MctsAgent::new(2);
    agent.set_state(State::new());

    let decision = agent.start_decision(Duration::from_secs(5));
    let mov = decision.get();
    assert!(
        moves(&State::new()).contains(&mov),
        "{mov} is not one of the twenty initial moves"
    );

    agent.advance_state(mov);
    let state = agent.state().unwrap();

    let decision = agent.start_decision(Duration::from_secs(5));
    let reply = decision.get();
    assert!(
        moves(&state).contains(&reply),
        "{reply} is not a legal reply"
    );
    agent.advance_state(reply);
}

#[test]
fn decision_from_a_lost_endgame_completes() {
    // black is nearly mated; the agent must still answer within budget
    let state = State::from_fen("rn4nr/p4N1p/6p1/1p1Q3k/1Pp4P/8/PP1PPP1P/RNB1KBR1 b Q - 0 0")
        .unwrap();
    let mut agent = MctsAgent::new(2);
    agent.set_state(state.clone());

    let mov = agent.start_decision(Duration::from_secs(2)).get();
    assert!(moves(&state).contains(&mov));
}

#[test]
fn serialization_round_trip() {
    let path = std::env::temp_dir().join("ponder_serialized_agent_test");

    let mut agent = MctsAgent::new(2);
    agent.set_state(State::new());
    let mov = agent.start_decision(Duration::from_secs(1)).get();
    agent.advance_state(mov);

    // quiesce the workers so the snapshot comparison is stable
    agent.idle();
    let before = agent.root_statistics();
    let state_before = agent.state().unwrap();
    agent.save_yourself(&path).unwrap();
    agent.load_yourself(&path).unwrap();

    // same position, same root statistics, same child topology
    assert_eq!(agent.state().unwrap(), state_before);
    let after = agent.root_statistics();
    assert_eq!(before.0, after.0);
    assert_eq!(before.1, after.1);

    // and the restored agent still plays
    let state = agent.state().unwrap();
    let mov = agent.start_decision(Duration::from_secs(1)).get();
    assert!(moves(&state).contains(&mov));
    agent.advance_state(mov);

    let _ = std::fs::remove_file(&path);
}
