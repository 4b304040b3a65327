//! Line-oriented transports for talking to an isolated OCR worker.
//!
//! The worker shares no memory with us. All we can do is send it a line and
//! wait for a line back. We support running the worker as a child process
//! over stdio. Tests connect to an in-process worker task over channels.

use std::process::Stdio;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
};

use crate::prelude::*;

/// A bidirectional stream of text lines.
#[async_trait]
pub trait LineTransport: Send + 'static {
    /// Send one line. `line` must not contain a newline.
    async fn send_line(&mut self, line: &str) -> Result<()>;

    /// Receive the next line, or `None` if the other side hung up.
    async fn recv_line(&mut self) -> Result<Option<String>>;
}

/// A transport over any async reader and writer pair.
pub struct IoTransport<R, W> {
    lines: Lines<R>,
    writer: W,
}

impl<R, W> IoTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: reader.lines(),
            writer,
        }
    }
}

#[async_trait]
impl<R, W> LineTransport for IoTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write line")?;
        self.writer
            .write_all(b"\n")
            .await
            .context("failed to write newline")?;
        self.writer.flush().await.context("failed to flush line")?;
        Ok(())
    }

    async fn recv_line(&mut self) -> Result<Option<String>> {
        self.lines.next_line().await.context("failed to read line")
    }
}

/// Our own standard input and output, for running as a worker.
pub type StdioTransport = IoTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

/// Create a transport over our own stdin and stdout.
pub fn stdio_transport() -> StdioTransport {
    IoTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
}

/// A worker running as a child process, speaking JSON lines over stdio.
///
/// The child is killed when this is dropped.
pub struct ProcessTransport {
    io: IoTransport<BufReader<ChildStdout>, ChildStdin>,

    /// Held so the child lives as long as we do.
    _child: Child,
}

impl ProcessTransport {
    /// Spawn `program` with `args`. Its stderr is passed through to ours.
    #[instrument(level = "debug", skip_all, fields(program = %program.display()))]
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("cannot start OCR worker {:?}", program))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("OCR worker has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("OCR worker has no stdout"))?;
        debug!("Spawned OCR worker");
        Ok(Self {
            io: IoTransport::new(BufReader::new(stdout), stdin),
            _child: child,
        })
    }
}

#[async_trait]
impl LineTransport for ProcessTransport {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.io.send_line(line).await
    }

    async fn recv_line(&mut self) -> Result<Option<String>> {
        self.io.recv_line().await
    }
}

/// One end of an in-process channel transport.
#[cfg(test)]
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
    rx: tokio::sync::mpsc::UnboundedReceiver<String>,
}

#[cfg(test)]
impl ChannelTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = tokio::sync::mpsc::unbounded_channel();
        let (b_tx, a_rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[cfg(test)]
#[async_trait]
impl LineTransport for ChannelTransport {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.tx
            .send(line.to_owned())
            .map_err(|_| anyhow!("other end of channel transport was dropped"))
    }

    async fn recv_line(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_pair_is_connected_both_ways() {
        let (mut host, mut worker) = ChannelTransport::pair();
        host.send_line("ping").await.unwrap();
        assert_eq!(worker.recv_line().await.unwrap().as_deref(), Some("ping"));
        worker.send_line("pong").await.unwrap();
        assert_eq!(host.recv_line().await.unwrap().as_deref(), Some("pong"));
        drop(worker);
        assert_eq!(host.recv_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn io_transport_splits_lines() {
        let input: &[u8] = b"first\nsecond\n";
        let mut transport = IoTransport::new(BufReader::new(input), Vec::<u8>::new());
        assert_eq!(transport.recv_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(transport.recv_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(transport.recv_line().await.unwrap(), None);
        transport.send_line("out").await.unwrap();
        assert_eq!(transport.writer, b"out\n");
    }
}
