//! Named-pipe plumbing between the judge and an external solution.
//!
//! Both platforms end up with the same shape: two one-directional byte
//! streams an independently started program can attach to with plain
//! file-style open calls, no sockets or shared memory involved. On Unix
//! the channels are FIFO special files under `/tmp`; on Windows they are
//! kernel named pipes under `\\.\pipe\` that require an explicit
//! connect handshake before use.

use tokio::io::{AsyncRead, AsyncWrite};

pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub use sys::{
    create_input_channel, create_output_channel, pipe_name_prefix, release_pending,
    reset_after_cancel,
};

#[cfg(unix)]
mod sys {
    use super::{PipeReader, PipeWriter};
    use std::io;
    use std::path::{Path, PathBuf};

    /// Where the special files live; external programs are told to
    /// redirect against paths under this prefix.
    pub fn pipe_name_prefix() -> &'static str {
        "/tmp/"
    }

    fn fifo_path(name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", pipe_name_prefix(), name))
    }

    /// Creates the FIFO special file if it does not exist yet; an
    /// existing one is reused as-is.
    fn ensure_fifo(path: &Path) -> io::Result<()> {
        use nix::sys::stat::Mode;
        match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o644)) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::EEXIST) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    /// Opening a FIFO blocks until the peer end attaches, so the open
    /// itself runs on the blocking pool.
    async fn open_fifo(path: PathBuf, write: bool) -> io::Result<std::fs::File> {
        tokio::task::spawn_blocking(move || {
            if write {
                std::fs::OpenOptions::new().write(true).open(&path)
            } else {
                std::fs::File::open(&path)
            }
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// The judge's read side: the stream the solution writes its moves
    /// to. Ready once the solution opens the same file for writing.
    pub async fn create_input_channel(name: &str) -> io::Result<PipeReader> {
        let path = fifo_path(name);
        ensure_fifo(&path)?;
        log::debug!("waiting for a writer on {}", path.display());
        let file = open_fifo(path, false).await?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }

    /// The judge's write side, symmetric to [`create_input_channel`].
    pub async fn create_output_channel(name: &str) -> io::Result<PipeWriter> {
        let path = fifo_path(name);
        ensure_fifo(&path)?;
        log::debug!("waiting for a reader on {}", path.display());
        let file = open_fifo(path, true).await?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }

    /// After a cancelled match the FIFO may hold a half-completed
    /// connection; delete and recreate it empty so the next match cannot
    /// hang on stale state.
    pub fn reset_after_cancel(name: &str) -> io::Result<()> {
        let path = fifo_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        ensure_fifo(&path)
    }

    /// Briefly opens the peer end of both channels so a judge parked in
    /// the connect handshake wakes up. Each open pairs with the judge's
    /// own pending open and is dropped immediately after.
    pub fn release_pending(judge_reads: &str, judge_writes: &str) {
        let write_end = fifo_path(judge_reads);
        let read_end = fifo_path(judge_writes);
        std::thread::spawn(move || {
            let _ = std::fs::OpenOptions::new().write(true).open(write_end);
        });
        std::thread::spawn(move || {
            let _ = std::fs::File::open(read_end);
        });
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::os::unix::fs::FileTypeExt;

        #[test]
        fn fifo_creation_is_idempotent() {
            let name = format!("chomp-fifo-test-{}", std::process::id());
            let path = fifo_path(&name);
            ensure_fifo(&path).unwrap();
            ensure_fifo(&path).unwrap();
            assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
            std::fs::remove_file(&path).unwrap();
        }

        #[test]
        fn reset_recreates_an_empty_fifo() {
            let name = format!("chomp-fifo-reset-{}", std::process::id());
            let path = fifo_path(&name);
            ensure_fifo(&path).unwrap();
            reset_after_cancel(&name).unwrap();
            let meta = std::fs::metadata(&path).unwrap();
            assert!(meta.file_type().is_fifo());
            assert_eq!(meta.len(), 0);
            std::fs::remove_file(&path).unwrap();
        }

        #[test]
        fn reset_tolerates_a_missing_file() {
            let name = format!("chomp-fifo-missing-{}", std::process::id());
            reset_after_cancel(&name).unwrap();
            std::fs::remove_file(fifo_path(&name)).unwrap();
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::{PipeReader, PipeWriter};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};
    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

    const PIPE_BUFFER: u32 = 32767;

    pub fn pipe_name_prefix() -> &'static str {
        r"\\.\pipe\"
    }

    fn pipe_path(name: &str) -> String {
        format!("{}{}", pipe_name_prefix(), name)
    }

    /// A disconnecting client raises a broken-pipe error on reads, but
    /// hanging up is how a finished solution ends the conversation, so
    /// reads report it as end-of-stream instead.
    struct DisconnectAsEof(NamedPipeServer);

    impl AsyncRead for DisconnectAsEof {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match Pin::new(&mut self.0).poll_read(cx, buf) {
                Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    Poll::Ready(Ok(()))
                }
                other => other,
            }
        }
    }

    fn server(name: &str, inbound: bool) -> io::Result<NamedPipeServer> {
        ServerOptions::new()
            .access_inbound(inbound)
            .access_outbound(!inbound)
            .max_instances(1)
            .in_buffer_size(PIPE_BUFFER)
            .out_buffer_size(PIPE_BUFFER)
            .create(pipe_path(name))
    }

    /// The judge's read side. Usable only after the solution connects;
    /// the wait happens here.
    pub async fn create_input_channel(name: &str) -> io::Result<PipeReader> {
        let pipe = server(name, true)?;
        log::debug!("waiting for a client on {}", pipe_path(name));
        pipe.connect().await?;
        Ok(Box::new(DisconnectAsEof(pipe)))
    }

    /// The judge's write side, symmetric to [`create_input_channel`].
    /// Writes after the client hangs up stay errors.
    pub async fn create_output_channel(name: &str) -> io::Result<PipeWriter> {
        let pipe = server(name, false)?;
        log::debug!("waiting for a client on {}", pipe_path(name));
        pipe.connect().await?;
        Ok(Box::new(pipe))
    }

    /// Kernel pipes vanish with their handle; nothing lingers on disk.
    pub fn reset_after_cancel(_name: &str) -> io::Result<()> {
        Ok(())
    }

    /// `connect()` is a plain await point and dies with the judge task;
    /// no external nudge is needed.
    pub fn release_pending(_judge_reads: &str, _judge_writes: &str) {}
}
