//! Interactive judge for a secret-transmission elimination game.
//!
//! One side of the board is an external program attached over two named
//! pipes (or a human clicking cells through the manual adapter); the
//! other is a seeded, greediness-capped random opponent. The judge
//! enforces move legality, alternates turns, keeps the full transcript
//! and scores the match by how many secret bits were carried per game.
//!
//! [`MatchSession`] is the entry point: it spawns the judge (and, for
//! manual play, the protocol adapter) on the current tokio runtime and
//! hands back owned handles plus read-only views of everything a
//! renderer needs: the board behind its single lock, the secret, the
//! error or report, and the running tally.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub mod board;
pub mod judge;
pub mod manual;
pub mod pipes;
pub mod scoring;
pub mod types;

use crate::board::Board;
use crate::judge::{Judge, SharedSlots};
use crate::manual::ManualPlayer;
use crate::pipes::{PipeReader, PipeWriter};
use crate::types::{Click, GameTally, GameUpdate, MatchConfig, MatchReport};

/// One running (or finished) match and everything needed to observe or
/// end it. All background work is owned here: dropping the session stops
/// feeding the judge, and [`MatchSession::stop`] shuts it down cleanly.
pub struct MatchSession {
    config: MatchConfig,
    board: Arc<Mutex<Board>>,
    slots: SharedSlots,
    stop_tx: watch::Sender<bool>,
    speed_tx: watch::Sender<f32>,
    clicks_tx: Option<mpsc::Sender<Click>>,
    judge_task: Option<JoinHandle<()>>,
    player_task: Option<JoinHandle<()>>,
    uses_pipes: bool,
}

impl MatchSession {
    /// Starts a match against an external solution attached over the OS
    /// named pipes. Must be called on a tokio runtime.
    pub fn start(config: MatchConfig, updates: mpsc::Sender<GameUpdate>) -> Self {
        Self::spawn(config, updates, None, None)
    }

    /// Starts a manual-play match: the external side is a human feeding
    /// click events instead of a connected program. Also returns the
    /// judge's own moves as they happen, for display.
    pub fn start_manual(
        config: MatchConfig,
        updates: mpsc::Sender<GameUpdate>,
    ) -> (Self, mpsc::Receiver<(usize, usize)>) {
        const BUF: usize = 64 * 1024;
        let (judge_read, player_write) = tokio::io::simplex(BUF);
        let (player_read, judge_write) = tokio::io::simplex(BUF);
        let (clicks_tx, clicks_rx) = mpsc::channel(16);
        let (replies_tx, replies_rx) = mpsc::channel(64);
        let player = ManualPlayer::new(
            clicks_rx,
            Box::new(player_read) as PipeReader,
            Box::new(player_write) as PipeWriter,
            replies_tx,
        );
        let session = Self::spawn(
            config,
            updates,
            Some((
                Box::new(judge_read) as PipeReader,
                Box::new(judge_write) as PipeWriter,
            )),
            Some((player, clicks_tx)),
        );
        (session, replies_rx)
    }

    /// Starts a match over caller-provided byte streams: the judge reads
    /// its counterpart's moves from `reader` and writes its own to
    /// `writer`. Manual play uses this internally; protocol tests drive
    /// it directly.
    pub fn start_with_streams(
        config: MatchConfig,
        updates: mpsc::Sender<GameUpdate>,
        reader: PipeReader,
        writer: PipeWriter,
    ) -> Self {
        Self::spawn(config, updates, Some((reader, writer)), None)
    }

    fn spawn(
        config: MatchConfig,
        updates: mpsc::Sender<GameUpdate>,
        streams: Option<(PipeReader, PipeWriter)>,
        player: Option<(ManualPlayer, mpsc::Sender<Click>)>,
    ) -> Self {
        let uses_pipes = streams.is_none();
        let board = Arc::new(Mutex::new(Board::new(config.field_size)));
        let slots = SharedSlots::default();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (speed_tx, speed_rx) = watch::channel(1.0f32);
        let judge = Judge::new(
            config.clone(),
            board.clone(),
            updates,
            stop_rx,
            speed_rx,
            slots.clone(),
            streams,
        );
        let judge_task = tokio::spawn(judge.run());
        let (player_task, clicks_tx) = match player {
            Some((p, tx)) => (Some(tokio::spawn(p.work())), Some(tx)),
            None => (None, None),
        };
        MatchSession {
            config,
            board,
            slots,
            stop_tx,
            speed_tx,
            clicks_tx,
            judge_task: Some(judge_task),
            player_task,
            uses_pipes,
        }
    }

    /// Relays a cell click (1-based) to the manual adapter. Returns
    /// false when the session has no manual player or the match is over.
    pub async fn click(&self, x: usize, y: usize) -> bool {
        match &self.clicks_tx {
            Some(tx) => tx.send(Click::Cell { x, y }).await.is_ok(),
            None => false,
        }
    }

    /// Asks the manual adapter to send the end-match signal at its next
    /// turn.
    pub async fn end_match(&self) -> bool {
        match &self.clicks_tx {
            Some(tx) => tx.send(Click::EndMatch).await.is_ok(),
            None => false,
        }
    }

    /// Adjusts the pacing speed (opponent moves per second) of a paced
    /// match; takes effect from the next delay.
    pub fn set_speed(&self, moves_per_second: f32) {
        let _ = self.speed_tx.send(moves_per_second);
    }

    /// True once the pipes are connected and the handshake is under way.
    pub fn ready(&self) -> bool {
        self.slots.ready.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// The board behind the match's one lock. Renderers take the lock
    /// briefly to read; the judge takes it to mutate.
    pub fn board(&self) -> Arc<Mutex<Board>> {
        self.board.clone()
    }

    pub fn board_snapshot(&self) -> Vec<usize> {
        self.board.lock().unwrap().heights().to_vec()
    }

    pub fn secret(&self) -> Option<String> {
        self.slots.secret.lock().unwrap().clone()
    }

    /// The failure message, if the match died of a protocol violation or
    /// an I/O error. Never set by a stop request.
    pub fn error(&self) -> Option<String> {
        self.slots.error.lock().unwrap().clone()
    }

    pub fn report(&self) -> Option<MatchReport> {
        self.slots.report.lock().unwrap().clone()
    }

    pub fn tally(&self) -> GameTally {
        *self.slots.tally.lock().unwrap()
    }

    /// The final score, once at least one game has been completed.
    pub fn score(&self) -> Option<f64> {
        let tally = self.tally();
        if tally.played == 0 {
            return None;
        }
        let secret_len = self.secret()?.len();
        Some(scoring::final_score(secret_len, tally.played, tally.won))
    }

    /// Waits for the judge to finish on its own (report or error
    /// published). Does not request a stop.
    pub async fn join(&mut self) {
        if let Some(task) = self.judge_task.take() {
            if let Err(e) = task.await {
                log::warn!("judge task died: {e}");
            }
        }
        if let Some(task) = self.player_task.take() {
            let _ = task.await;
        }
    }

    /// Stops the match: signals cancellation, wakes a judge parked in
    /// the pipe handshake, and waits for both tasks to wind down. A
    /// stopped match reports no error.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        // Closing the click channel unblocks a waiting manual adapter.
        self.clicks_tx = None;
        if self.uses_pipes
            && self
                .judge_task
                .as_ref()
                .is_some_and(|task| !task.is_finished())
        {
            pipes::release_pending(
                &self.config.solution_output_pipe(),
                &self.config.solution_input_pipe(),
            );
        }
        self.join().await;
    }
}
