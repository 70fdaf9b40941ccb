//! Interactive shell over the pondering agent. Commands, one per line:
//!
//! ```text
//! position startpos [moves e2e4 ...]
//! position fen <fen> [moves ...]
//! move <move>            play a move (coordinate or SAN)
//! go                     decide within the budget and play the result
//! show                   print the board
//! stats                  print root visit statistics
//! save <path> / load <path>
//! ponder on|off
//! quit
//! ```

use clap::Parser;
use log::error;
use ponder::notation::{algebraic, coordinate};
use ponder::{MctsAgent, Move, State};
use std::io;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ponder", about = "Pondering MCTS chess engine")]
struct Options {
    /// Number of ponder threads
    #[arg(short = 'n', long, default_value_t = 2)]
    ponderers: usize,

    /// Seconds allotted to each decision
    #[arg(short, long, default_value_t = 5)]
    budget: u64,
}

fn main() {
    // the handle must stay alive for logging to keep flowing
    let _logger = match flexi_logger::Logger::try_with_env_or_str("info")
        .and_then(|logger| logger.log_to_stderr().start())
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("logger setup failed: {e}");
            None
        }
    };

    let options = Options::parse();
    let mut agent = MctsAgent::new(options.ponderers);
    agent.set_state(State::new());

    let mut input = String::new();
    loop {
        input.clear();
        match io::stdin().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("stdin: {e}");
                break;
            }
        }

        let words: Vec<&str> = input.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["position", rest @ ..] => match parse_position(rest) {
                Ok(state) => agent.set_state(state),
                Err(message) => println!("error: {message}"),
            },
            ["move", word] => {
                let state = current_state(&agent);
                match parse_move(word, &state) {
                    Ok(mov) => agent.advance_state(mov),
                    Err(message) => println!("error: {message}"),
                }
            }
            ["go"] => {
                let decision = agent.start_decision(Duration::from_secs(options.budget));
                let mov = decision.get();
                println!("bestmove {mov}");
                agent.advance_state(mov);
            }
            ["show"] => println!("{}", current_state(&agent)),
            ["stats"] => {
                let (visits, children) = agent.root_statistics();
                println!("root: {visits} visits");
                for (mov, visits, wins) in children {
                    println!("  {mov}: {visits} visits, {wins:+.1}");
                }
            }
            ["save", path] => {
                if let Err(e) = agent.save_yourself(path) {
                    println!("error: {e}");
                }
            }
            ["load", path] => {
                if let Err(e) = agent.load_yourself(path) {
                    println!("error: {e}");
                }
            }
            ["ponder", "on"] => agent.resume(),
            ["ponder", "off"] => agent.pause(),
            ["quit"] => break,
            _ => println!("error: unrecognised command"),
        }
    }
}

fn current_state(agent: &MctsAgent) -> State {
    agent.state().unwrap_or_default()
}

fn parse_move(word: &str, state: &State) -> Result<Move, String> {
    coordinate::parse(word, state)
        .or_else(|_| algebraic::parse(word, state))
        .map_err(|e| e.to_string())
}

fn parse_position(words: &[&str]) -> Result<State, String> {
    let split = words
        .iter()
        .position(|&w| w == "moves")
        .unwrap_or(words.len());
    let (setup, move_words) = words.split_at(split);

    let mut state = match setup.split_first() {
        Some((&"startpos", [])) => State::new(),
        Some((&"fen", fields)) if !fields.is_empty() => {
            State::from_fen(&fields.join(" ")).map_err(|e| e.to_string())?
        }
        _ => return Err("expected 'startpos' or 'fen <fen>'".to_string()),
    };

    for word in move_words.iter().skip(1) {
        let mov = parse_move(word, &state)?;
        state.make_move(mov);
    }

    Ok(state)
}
