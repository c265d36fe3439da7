//! Lets a human drive the external side of the protocol. Click events
//! arrive whenever the user gets around to them; this adapter turns each
//! one into the exact line a file-based solution would have printed, and
//! reads the judge's replies in strict alternation so the two sides can
//! never talk over each other.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::pipes::{PipeReader, PipeWriter};
use crate::types::Click;

pub struct ManualPlayer {
    clicks: mpsc::Receiver<Click>,
    reader: PipeReader,
    writer: PipeWriter,
    /// The judge's own moves, forwarded for display as 1-based pairs.
    replies: mpsc::Sender<(usize, usize)>,
}

impl ManualPlayer {
    pub(crate) fn new(
        clicks: mpsc::Receiver<Click>,
        reader: PipeReader,
        writer: PipeWriter,
        replies: mpsc::Sender<(usize, usize)>,
    ) -> Self {
        ManualPlayer {
            clicks,
            reader,
            writer,
            replies,
        }
    }

    /// Runs until the match ends, the click channel closes, or the judge
    /// hangs up. Stream errors are not propagated anywhere: a closed
    /// stream means the judge is done with us, so the adapter simply
    /// ceases I/O.
    pub async fn work(self) {
        if let Err(e) = self.relay().await {
            log::debug!("manual player stopped: {e:#}");
        }
    }

    async fn relay(mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(self.reader).lines();
        // Mode tag, parameter triple, secret.
        for _ in 0..3 {
            lines
                .next_line()
                .await?
                .context("judge hung up during the handshake")?;
        }
        let mut my_first = true;
        loop {
            let mut my_move = my_first;
            loop {
                let (x, y) = if my_move {
                    match self.clicks.recv().await {
                        None => return Ok(()),
                        Some(Click::EndMatch) => {
                            self.writer.write_all(b"0\n").await?;
                            self.writer.flush().await?;
                            return Ok(());
                        }
                        Some(Click::Cell { x, y }) => {
                            self.writer
                                .write_all(format!("{x} {y}\n").as_bytes())
                                .await?;
                            self.writer.flush().await?;
                            (x, y)
                        }
                    }
                } else {
                    let line = lines
                        .next_line()
                        .await?
                        .context("judge hung up mid-game")?;
                    let pair = parse_pair(&line)?;
                    let _ = self.replies.send(pair).await;
                    pair
                };
                my_move = !my_move;
                if x == 1 && y == 1 {
                    // The poison cell went; the next game starts with
                    // the other side opening.
                    break;
                }
            }
            my_first = !my_first;
        }
    }
}

fn parse_pair(line: &str) -> anyhow::Result<(usize, usize)> {
    let mut parts = line.split_whitespace();
    let x = parts
        .next()
        .with_context(|| format!("unreadable judge move {line:?}"))?
        .parse()?;
    let y = parts
        .next()
        .with_context(|| format!("unreadable judge move {line:?}"))?
        .parse()?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipes::{PipeReader, PipeWriter};
    use tokio::io::AsyncReadExt;

    const HANDSHAKE: &str = "1\n4 2 8\n01101001\n";

    async fn read_all(mut reader: tokio::io::ReadHalf<tokio::io::SimplexStream>) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn clicks_become_wire_lines_and_the_sentinel_ends_the_adapter() {
        let (adapter_read, mut judge_write) = tokio::io::simplex(4096);
        let (judge_read, adapter_write) = tokio::io::simplex(4096);
        let (clicks_tx, clicks_rx) = mpsc::channel(8);
        let (replies_tx, mut replies_rx) = mpsc::channel(8);
        let player = ManualPlayer::new(
            clicks_rx,
            Box::new(adapter_read) as PipeReader,
            Box::new(adapter_write) as PipeWriter,
            replies_tx,
        );
        let task = tokio::spawn(player.work());

        judge_write.write_all(HANDSHAKE.as_bytes()).await.unwrap();
        // Our move, the judge's reply, then the end-match click.
        clicks_tx.send(Click::Cell { x: 3, y: 2 }).await.unwrap();
        judge_write.write_all(b"2 4\n").await.unwrap();
        assert_eq!(replies_rx.recv().await, Some((2, 4)));
        clicks_tx.send(Click::EndMatch).await.unwrap();
        task.await.unwrap();

        drop(judge_write);
        assert_eq!(read_all(judge_read).await, "3 2\n0\n");
    }

    #[tokio::test]
    async fn closing_the_click_channel_stops_the_adapter_quietly() {
        let (adapter_read, mut judge_write) = tokio::io::simplex(4096);
        let (judge_read, adapter_write) = tokio::io::simplex(4096);
        let (clicks_tx, clicks_rx) = mpsc::channel::<Click>(8);
        let (replies_tx, _replies_rx) = mpsc::channel(8);
        let player = ManualPlayer::new(
            clicks_rx,
            Box::new(adapter_read) as PipeReader,
            Box::new(adapter_write) as PipeWriter,
            replies_tx,
        );
        let task = tokio::spawn(player.work());

        judge_write.write_all(HANDSHAKE.as_bytes()).await.unwrap();
        drop(clicks_tx);
        task.await.unwrap();
        drop(judge_write);
        assert_eq!(read_all(judge_read).await, "");
    }
}
