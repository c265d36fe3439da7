use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use crate::board::{Board, Move};
use crate::pipes::{self, PipeReader, PipeWriter};
use crate::types::{GameOutcome, GameTally, GameUpdate, MatchConfig, MatchError, MatchReport};

/// Seed for the per-match RNG; fixed so a judge run is reproducible.
const RNG_SEED: u64 = 239;

/// Read-only artifacts the judge publishes as the match progresses. The
/// session hands clones to whoever needs to observe the match.
#[derive(Clone, Default)]
pub(crate) struct SharedSlots {
    pub ready: Arc<AtomicBool>,
    pub secret: Arc<Mutex<Option<String>>>,
    pub error: Arc<Mutex<Option<String>>>,
    pub report: Arc<Mutex<Option<MatchReport>>>,
    pub tally: Arc<Mutex<GameTally>>,
}

enum LoopEnd {
    Finished,
    Cancelled,
}

/// The match engine: owns the protocol conversation with the external
/// side, drives the randomized opponent, and keeps the transcript. One
/// judge runs exactly one match.
pub struct Judge {
    config: MatchConfig,
    board: Arc<Mutex<Board>>,
    updates: mpsc::Sender<GameUpdate>,
    stop: watch::Receiver<bool>,
    speed: watch::Receiver<f32>,
    slots: SharedSlots,
    rng: StdRng,
    transcript: Vec<(usize, usize)>,
    /// Pre-wired streams for in-process play; `None` means the judge
    /// creates the OS pipes itself.
    streams: Option<(PipeReader, PipeWriter)>,
    uses_pipes: bool,
}

impl Judge {
    pub(crate) fn new(
        config: MatchConfig,
        board: Arc<Mutex<Board>>,
        updates: mpsc::Sender<GameUpdate>,
        stop: watch::Receiver<bool>,
        speed: watch::Receiver<f32>,
        slots: SharedSlots,
        streams: Option<(PipeReader, PipeWriter)>,
    ) -> Self {
        let uses_pipes = streams.is_none();
        Judge {
            config,
            board,
            updates,
            stop,
            speed,
            slots,
            rng: StdRng::seed_from_u64(RNG_SEED),
            transcript: Vec::new(),
            streams,
            uses_pipes,
        }
    }

    /// Runs the match to its end. Every exit path lands here: a finished
    /// match publishes its report, a failure publishes its message, and
    /// a stop request cleans up silently. Nothing escapes.
    pub async fn run(mut self) {
        match self.drive().await {
            Ok(LoopEnd::Finished) => {
                log::info!("match complete");
            }
            Ok(LoopEnd::Cancelled) => self.cleanup_after_cancel(),
            // An I/O failure provoked by our own teardown is still a
            // stop, not a match error.
            Err(_) if *self.stop.borrow() => self.cleanup_after_cancel(),
            Err(e) => {
                log::warn!("match failed: {e}");
                *self.slots.error.lock().unwrap() = Some(e.to_string());
            }
        }
        // The streams, if still open, drop here on every path.
    }

    fn cleanup_after_cancel(&self) {
        log::info!("match cancelled");
        if self.uses_pipes {
            for name in [
                self.config.solution_input_pipe(),
                self.config.solution_output_pipe(),
            ] {
                if let Err(e) = pipes::reset_after_cancel(&name) {
                    log::warn!("could not reset pipe {name}: {e}");
                }
            }
        }
    }

    async fn drive(&mut self) -> Result<LoopEnd, MatchError> {
        let mut stop = self.stop.clone();
        let (reader, writer) = match self.streams.take() {
            Some(pair) => pair,
            None => {
                let input = self.config.solution_output_pipe();
                let output = self.config.solution_input_pipe();
                tokio::select! {
                    biased;
                    _ = stopped(&mut stop) => return Ok(LoopEnd::Cancelled),
                    pair = async {
                        tokio::try_join!(
                            pipes::create_input_channel(&input),
                            pipes::create_output_channel(&output),
                        )
                    } => pair.map_err(MatchError::Transport)?,
                }
            }
        };
        let mut reader = BufReader::new(reader);
        let mut writer = writer;
        self.slots.ready.store(true, Ordering::Release);

        let n = self.config.field_size;
        let k = self.config.max_eaten;
        let m = self.config.secret_length;
        writer.write_all(b"1\n").await?;
        writer.write_all(format!("{n} {k} {m}\n").as_bytes()).await?;
        writer.flush().await?;
        let secret: String = (0..m)
            .map(|_| char::from(b'0' + self.rng.random_range(0..2u8)))
            .collect();
        log::info!("secret generated ({m} bits)");
        log::debug!("-> {secret}");
        // Published before it goes over the wire, so anyone who saw the
        // line can already read the slot.
        *self.slots.secret.lock().unwrap() = Some(secret.clone());
        writer.write_all(secret.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        self.send_update(false);

        let mut solution_first = true;
        loop {
            let outcome = self
                .run_one_game(&mut reader, &mut writer, &mut stop, solution_first)
                .await?;
            match outcome {
                GameOutcome::Cancelled => return Ok(LoopEnd::Cancelled),
                GameOutcome::EndedByEarlySignal => break,
                GameOutcome::Continue => {
                    solution_first = !solution_first;
                    self.board.lock().unwrap().reset();
                    self.send_update(false);
                }
            }
        }

        let report = MatchReport {
            field_size: n,
            max_eaten: k,
            secret_length: m,
            games_played: self.slots.tally.lock().unwrap().played,
            moves: self.transcript.clone(),
        };
        *self.slots.report.lock().unwrap() = Some(report);
        self.send_update(true);
        Ok(LoopEnd::Finished)
    }

    async fn run_one_game<R: AsyncBufRead + Unpin>(
        &mut self,
        reader: &mut R,
        writer: &mut PipeWriter,
        stop: &mut watch::Receiver<bool>,
        solution_first: bool,
    ) -> Result<GameOutcome, MatchError> {
        log::info!(
            "new game; {} moves first",
            if solution_first { "the solution" } else { "the opponent" }
        );
        let mut solution_to_move = solution_first;
        let mut solution_first_turn = true;
        while self.board.lock().unwrap().height(0) > 0 {
            if solution_to_move {
                let line = tokio::select! {
                    biased;
                    _ = stopped(stop) => return Ok(GameOutcome::Cancelled),
                    line = read_line(reader) => line?.ok_or(MatchError::UnexpectedEof)?,
                };
                log::debug!("<- {line}");
                if solution_first_turn && line.trim().parse::<i64>() == Ok(0) {
                    // The previous game's alternation left the opponent
                    // to open this game; its opening move was never
                    // answered, so it does not count.
                    if !solution_first {
                        self.transcript.pop();
                    }
                    return Ok(GameOutcome::EndedByEarlySignal);
                }
                solution_first_turn = false;
                let mv = parse_move(&line, self.config.field_size)?;
                self.apply_move(mv)?;
            } else {
                let mv = self.pick_opponent_move();
                self.apply_move(mv)?;
                let line = format!("{} {}", mv.x + 1, mv.y + 1);
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
                log::debug!("-> {line}");
            }
            if self.config.paced {
                let delay = self.pacing_delay();
                tokio::select! {
                    biased;
                    _ = stopped(stop) => return Ok(GameOutcome::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
            solution_to_move = !solution_to_move;
        }
        {
            let mut tally = self.slots.tally.lock().unwrap();
            tally.played += 1;
            // The flag has already advanced past the eliminating move:
            // pointing back at the solution means the opponent ate the
            // poison cell.
            if solution_to_move {
                tally.won += 1;
            }
        }
        log::info!("game over after {} total moves", self.transcript.len());
        Ok(GameOutcome::Continue)
    }

    /// Validates and applies a move from either side under the board
    /// lock, then records it in the transcript.
    fn apply_move(&mut self, mv: Move) -> Result<(), MatchError> {
        {
            let mut board = self.board.lock().unwrap();
            if !board.paint(mv) {
                return Err(MatchError::IllegalMove {
                    x: mv.x + 1,
                    y: mv.y + 1,
                });
            }
        }
        self.transcript.push((mv.x + 1, mv.y + 1));
        self.send_update(false);
        Ok(())
    }

    fn pick_opponent_move(&mut self) -> Move {
        let board = self.board.lock().unwrap();
        reservoir_pick(&board, self.config.max_eaten, &mut self.rng)
    }

    fn pacing_delay(&self) -> Duration {
        let speed = (*self.speed.borrow()).max(0.001);
        Duration::from_millis((1000.0 / speed) as u64)
    }

    /// Renderer updates are best-effort; a slow or absent receiver never
    /// stalls the match.
    fn send_update(&self, finished: bool) {
        let (heights, last_move) = {
            let board = self.board.lock().unwrap();
            (
                board.heights().to_vec(),
                board.last_move().map(|m| (m.x + 1, m.y + 1)),
            )
        };
        let tally = *self.slots.tally.lock().unwrap();
        let _ = self.updates.try_send(GameUpdate {
            heights,
            last_move,
            games_played: tally.played,
            games_won: tally.won,
            finished,
        });
    }
}

/// Resolves when a stop is requested. A dropped sender counts as one:
/// the session is gone, so the match has no business continuing.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|s| *s).await;
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn parse_move(line: &str, field_size: usize) -> Result<Move, MatchError> {
    let mut parts = line.split_whitespace();
    let (Some(xs), Some(ys), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(MatchError::MalformedMove(line.to_string()));
    };
    let (Ok(x), Ok(y)) = (xs.parse::<i64>(), ys.parse::<i64>()) else {
        return Err(MatchError::MalformedMove(line.to_string()));
    };
    let range = 1..=field_size as i64;
    if !range.contains(&x) || !range.contains(&y) {
        return Err(MatchError::MoveOutOfRange { field_size, x, y });
    }
    Ok(Move {
        x: (x - 1) as usize,
        y: (y - 1) as usize,
    })
}

/// Streams the candidate cells in scan order, replacing the running
/// choice with the i-th candidate (counting from 1) with probability
/// `1/i`, so the final choice is exactly uniform over the candidate set
/// without ever materializing it. With no candidate at all the
/// opponent takes the topmost open cell of column 0, which ends the game
/// by itself once that column is down to the poison cell.
fn reservoir_pick(board: &Board, cap: usize, rng: &mut StdRng) -> Move {
    let mut chosen = None;
    for (i, candidate) in CandidateScan::new(board, cap).enumerate() {
        if rng.random_range(0..=i) == 0 {
            chosen = Some(candidate);
        }
    }
    chosen.unwrap_or(Move {
        x: 0,
        y: board.height(0).saturating_sub(1),
    })
}

/// Restartable scan over the opponent's candidate cells: columns left to
/// right, rows from the top of the unpainted region downward. A column's
/// scan ends at the poison cell (0, 0) or at the first cell past the
/// greediness cap; every later row in scan order erases strictly more.
struct CandidateScan<'a> {
    board: &'a Board,
    cap: usize,
    x: usize,
    next_y: Option<usize>,
}

impl<'a> CandidateScan<'a> {
    fn new(board: &'a Board, cap: usize) -> Self {
        CandidateScan {
            board,
            cap,
            x: 0,
            next_y: None,
        }
    }
}

impl Iterator for CandidateScan<'_> {
    type Item = Move;

    fn next(&mut self) -> Option<Move> {
        let n = self.board.size();
        loop {
            if self.x >= n {
                return None;
            }
            let y = match self.next_y {
                Some(y) => y,
                None => {
                    let h = self.board.height(self.x);
                    if h == 0 {
                        self.x += 1;
                        continue;
                    }
                    h - 1
                }
            };
            if (self.x == 0 && y == 0) || self.board.eats_more_than(self.x, y, self.cap) {
                self.x += 1;
                self.next_y = None;
                continue;
            }
            let cx = self.x;
            if y == 0 {
                self.x += 1;
                self.next_y = None;
            } else {
                self.next_y = Some(y - 1);
            }
            return Some(Move { x: cx, y });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn scan(board: &Board, cap: usize) -> Vec<(usize, usize)> {
        CandidateScan::new(board, cap)
            .map(|m| (m.x, m.y))
            .collect()
    }

    #[test]
    fn scan_walks_columns_left_to_right_and_rows_top_down() {
        let board = Board::new(3);
        let candidates = scan(&board, 100);
        assert_eq!(
            candidates,
            vec![
                (0, 2),
                (0, 1),
                (1, 2),
                (1, 1),
                (1, 0),
                (2, 2),
                (2, 1),
                (2, 0),
            ]
        );
    }

    #[test]
    fn scan_never_yields_the_poison_cell() {
        for n in 1..6 {
            let board = Board::new(n);
            assert!(scan(&board, 1000).iter().all(|&c| c != (0, 0)));
        }
    }

    #[test]
    fn scan_respects_the_greediness_cap() {
        let board = Board::new(4);
        for candidate in CandidateScan::new(&board, 3) {
            assert!(
                !board.eats_more_than(candidate.x, candidate.y, 3),
                "candidate {candidate:?} is too greedy"
            );
        }
    }

    #[test]
    fn zero_cap_leaves_no_candidates() {
        let board = Board::new(4);
        assert!(scan(&board, 0).is_empty());
    }

    #[test]
    fn scan_skips_empty_columns() {
        let mut board = Board::new(3);
        board.paint(Move { x: 1, y: 0 });
        // Columns 1 and 2 are empty; only column 0 rows above the poison
        // cell remain.
        assert_eq!(scan(&board, 100), vec![(0, 2), (0, 1)]);
    }

    #[test]
    fn reservoir_selection_is_uniform_over_the_candidates() {
        let board = Board::new(3);
        let candidates = scan(&board, 100);
        let mut rng = StdRng::seed_from_u64(RNG_SEED);
        let mut counts: HashMap<(usize, usize), u32> = HashMap::new();
        let trials = 8000;
        for _ in 0..trials {
            let mv = reservoir_pick(&board, 100, &mut rng);
            *counts.entry((mv.x, mv.y)).or_default() += 1;
        }
        let expected = trials / candidates.len() as u32;
        for candidate in &candidates {
            let count = counts.get(candidate).copied().unwrap_or(0);
            assert!(
                count > expected * 4 / 5 && count < expected * 6 / 5,
                "candidate {candidate:?} chosen {count} times, expected about {expected}"
            );
        }
    }

    #[test]
    fn exhausted_policy_falls_back_to_the_top_of_column_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        // A zero cap excludes everything.
        let board = Board::new(4);
        assert_eq!(
            reservoir_pick(&board, 0, &mut rng),
            Move { x: 0, y: 3 }
        );
        // Only the poison cell left: the fallback coincides with it.
        let mut board = Board::new(4);
        board.paint(Move { x: 1, y: 0 });
        board.paint(Move { x: 0, y: 1 });
        assert_eq!(board.heights(), &[1, 0, 0, 0]);
        assert_eq!(
            reservoir_pick(&board, 8, &mut rng),
            Move { x: 0, y: 0 }
        );
    }

    #[test]
    fn parse_move_accepts_one_based_pairs() {
        assert_eq!(parse_move("3 1", 4).unwrap(), Move { x: 2, y: 0 });
        assert_eq!(parse_move("  4\t4 ", 4).unwrap(), Move { x: 3, y: 3 });
    }

    #[test]
    fn parse_move_rejects_bad_shapes() {
        for line in ["", "1", "1 2 3", "a b", "1 b", "2.5 1"] {
            assert!(
                matches!(parse_move(line, 4), Err(MatchError::MalformedMove(_))),
                "line {line:?}"
            );
        }
    }

    #[test]
    fn parse_move_rejects_out_of_range_pairs() {
        for line in ["0 1", "1 0", "5 5", "-1 2", "1 17"] {
            match parse_move(line, 4) {
                Err(MatchError::MoveOutOfRange { field_size, .. }) => {
                    assert_eq!(field_size, 4)
                }
                other => panic!("line {line:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn out_of_range_message_names_the_bounds_and_the_input() {
        let err = parse_move("5 5", 4).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("1 and 4"), "{message}");
        assert!(message.contains("5 5"), "{message}");
    }
}
