use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable per-match inputs. The judge never changes these after start.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchConfig {
    pub field_size: usize,
    /// Cap on how many cells a single opponent move may erase.
    pub max_eaten: usize,
    pub secret_length: usize,
    /// Insert a delay after each turn so a renderer can keep up.
    pub paced: bool,
    /// Base name for the two pipe special files: the solution reads
    /// `<base>.in` and writes `<base>.out`.
    pub pipe_basename: String,
}

impl MatchConfig {
    pub fn new(field_size: usize, max_eaten: usize, secret_length: usize) -> Self {
        MatchConfig {
            field_size,
            max_eaten,
            secret_length,
            paced: false,
            pipe_basename: "game".to_string(),
        }
    }

    /// Name of the pipe the solution reads its input from (the judge's
    /// write side).
    pub fn solution_input_pipe(&self) -> String {
        format!("{}.in", self.pipe_basename)
    }

    /// Name of the pipe the solution writes its output to (the judge's
    /// read side).
    pub fn solution_output_pipe(&self) -> String {
        format!("{}.out", self.pipe_basename)
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig::new(32, 8, 10)
    }
}

/// Snapshot pushed to the renderer after every applied move, after each
/// between-game board reset, and once more when the match is over.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameUpdate {
    pub heights: Vec<usize>,
    /// 1-based coordinates of the most recently painted cell.
    pub last_move: Option<(usize, usize)>,
    pub games_played: u32,
    pub games_won: u32,
    pub finished: bool,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct GameTally {
    pub played: u32,
    pub won: u32,
}

/// A discrete input event from a human player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Click {
    /// 1-based cell coordinates, exactly as they go over the wire.
    Cell { x: usize, y: usize },
    EndMatch,
}

/// How a single game ended, as seen by the match loop. Protocol failures
/// travel separately as the `Err` side of the game result, so a stop
/// request can never be mistaken for one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    /// Column 0 was emptied; the match continues with a new game.
    Continue,
    /// The solution sent the `0` signal; the whole match is over.
    EndedByEarlySignal,
    /// A stop was requested while the game was in flight.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("failed to set up pipes: {0}")]
    Transport(#[source] std::io::Error),
    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of solution output")]
    UnexpectedEof,
    #[error("expected two integers, but the solution printed \"{0}\"")]
    MalformedMove(String),
    #[error("expected two integers between 1 and {field_size}, but the solution printed {x} {y}")]
    MoveOutOfRange { field_size: usize, x: i64, y: i64 },
    #[error("invalid move: cell ({x}, {y}) is already painted")]
    IllegalMove { x: usize, y: usize },
}

/// The final artifact of a completed match: the parameter triple, the
/// number of completed games and every move of the transcript. Encodes to
/// the report string and parses its own encoding back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub field_size: usize,
    pub max_eaten: usize,
    pub secret_length: usize,
    pub games_played: u32,
    /// Every successful move of the match, 1-based, in order.
    pub moves: Vec<(usize, usize)>,
}

impl MatchReport {
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str("2\n");
        out.push_str(&format!(
            "{} {} {}\n",
            self.field_size, self.max_eaten, self.secret_length
        ));
        out.push_str(&format!("{}\n", self.games_played));
        let pairs: Vec<String> = self
            .moves
            .iter()
            .map(|(x, y)| format!("{x} {y}"))
            .collect();
        out.push_str(&pairs.join("\n"));
        out
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let mut lines = s.lines();
        let tag = lines.next().context("empty report")?;
        anyhow::ensure!(tag.trim() == "2", "unknown report tag {:?}", tag);
        let params = lines.next().context("missing parameter line")?;
        let mut it = params.split_whitespace();
        let field_size = it.next().context("missing field size")?.parse()?;
        let max_eaten = it.next().context("missing opponent cap")?.parse()?;
        let secret_length = it.next().context("missing secret length")?.parse()?;
        let games_played = lines
            .next()
            .context("missing game count")?
            .trim()
            .parse()?;
        let mut moves = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let mut p = line.split_whitespace();
            let x = p.next().context("missing x")?.parse()?;
            let y = p.next().context("missing y")?.parse()?;
            moves.push((x, y));
        }
        Ok(MatchReport {
            field_size,
            max_eaten,
            secret_length,
            games_played,
            moves,
        })
    }
}

impl std::fmt::Display for MatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_through_its_encoding() {
        let report = MatchReport {
            field_size: 4,
            max_eaten: 2,
            secret_length: 8,
            games_played: 2,
            moves: vec![(1, 1), (3, 2), (1, 1)],
        };
        let encoded = report.encode();
        assert_eq!(encoded, "2\n4 2 8\n2\n1 1\n3 2\n1 1");
        assert_eq!(MatchReport::parse(&encoded).unwrap(), report);
    }

    #[test]
    fn empty_transcript_round_trips() {
        let report = MatchReport {
            field_size: 32,
            max_eaten: 8,
            secret_length: 10,
            games_played: 0,
            moves: vec![],
        };
        assert_eq!(MatchReport::parse(&report.encode()).unwrap(), report);
    }

    #[test]
    fn parse_rejects_foreign_tags() {
        assert!(MatchReport::parse("1\n4 2 8\n0\n").is_err());
    }

    #[test]
    fn update_serializes_for_an_embedding_gui() {
        let update = GameUpdate {
            heights: vec![4, 4, 2, 0],
            last_move: Some((3, 2)),
            games_played: 1,
            games_won: 0,
            finished: false,
        };
        let json = serde_json::to_string(&update).unwrap();
        let back: GameUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.heights, update.heights);
        assert_eq!(back.last_move, update.last_move);
    }

    #[test]
    fn default_config_matches_the_form_defaults() {
        let config = MatchConfig::default();
        assert_eq!(config.field_size, 32);
        assert_eq!(config.max_eaten, 8);
        assert_eq!(config.secret_length, 10);
        assert_eq!(config.solution_input_pipe(), "game.in");
        assert_eq!(config.solution_output_pipe(), "game.out");
    }
}
