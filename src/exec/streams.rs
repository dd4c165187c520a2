//! Exec stream seam and its kube-rs implementation
//!
//! [`ExecBackend`] opens a command against a target container and yields
//! [`ExecStreams`], the handle the orchestrator drives: stdin and resize
//! in, stdout/stderr out through a channel, exit status collected at
//! finalize. Tests implement both traits with scripted fakes; production
//! uses [`KubeExecBackend`] over kube-rs `AttachedProcess`.

use async_trait::async_trait;
use futures::SinkExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, AttachedProcess, TerminalSize};
use kube::Api;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{ExecTarget, StreamSettings};
use crate::error::{Error, Result};
use crate::relay::codec::TerminalDimensions;

/// Capacity of the process-output channel.
const OUTPUT_CAPACITY: usize = 64;

/// Read-buffer size for the stdout/stderr forwarders.
const READ_BUF_SIZE: usize = 4096;

/// Which process stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    /// Remote stdout
    Stdout,
    /// Remote stderr
    Stderr,
}

/// One chunk of process output.
#[derive(Debug)]
pub struct StreamOutput {
    /// Source stream
    pub channel: OutputChannel,
    /// Raw bytes as read from the remote stream
    pub data: Vec<u8>,
}

/// Opens exec streams against a target container.
#[async_trait]
pub trait ExecBackend: Send + Sync {
    /// Starts `command` in the target container with the given stream
    /// attachments. Failure to establish the stream is `RemoteStream`.
    async fn open(
        &self,
        target: &ExecTarget,
        command: &[String],
        settings: StreamSettings,
    ) -> Result<Box<dyn ExecStreams>>;
}

/// A live exec session's streams.
#[async_trait]
pub trait ExecStreams: Send {
    /// Writes a chunk to the remote process's stdin.
    async fn send_stdin(&mut self, data: Vec<u8>) -> Result<()>;

    /// Forwards a terminal resize to the remote side.
    async fn send_resize(&mut self, size: TerminalDimensions);

    /// Takes the output receiver. The channel closes when the remote
    /// streams end; callable once, later calls yield a closed channel.
    fn take_output(&mut self) -> mpsc::Receiver<StreamOutput>;

    /// Collects the session's exit status after the output channel has
    /// closed. Returns the status as a JSON document when one exists.
    async fn finalize(self: Box<Self>) -> Option<Vec<u8>>;
}

/// Exec backend for one cluster, backed by a kube-rs client.
pub struct KubeExecBackend {
    client: kube::Client,
}

impl KubeExecBackend {
    /// Backend over an already-resolved cluster client.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecBackend for KubeExecBackend {
    async fn open(
        &self,
        target: &ExecTarget,
        command: &[String],
        settings: StreamSettings,
    ) -> Result<Box<dyn ExecStreams>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);

        let mut params = AttachParams::default()
            .stdin(settings.stdin)
            .stdout(settings.stdout)
            // The exec subresource rejects tty together with a separate
            // stderr stream; with a TTY, stderr is merged into stdout.
            .stderr(settings.stderr && !settings.tty)
            .tty(settings.tty);
        if let Some(container) = &target.container {
            params = params.container(container);
        }

        let attached = pods
            .exec(&target.pod, command.iter().map(String::as_str), &params)
            .await
            .map_err(|e| Error::RemoteStream(e.to_string()))?;

        Ok(Box::new(KubeExecStreams::new(attached)))
    }
}

/// [`ExecStreams`] over a kube-rs `AttachedProcess`.
///
/// Reader tasks forward stdout/stderr into the output channel; the channel
/// closes when both readers finish, which is how the orchestrator learns
/// the remote streams ended.
pub struct KubeExecStreams {
    session_id: Uuid,
    stdin_writer: Option<Box<dyn tokio::io::AsyncWrite + Unpin + Send>>,
    size_tx: Option<futures::channel::mpsc::Sender<TerminalSize>>,
    output_rx: Option<mpsc::Receiver<StreamOutput>>,
    reader_handles: Vec<tokio::task::JoinHandle<()>>,
    attached: AttachedProcess,
}

impl KubeExecStreams {
    fn new(mut attached: AttachedProcess) -> Self {
        let session_id = Uuid::new_v4();
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CAPACITY);
        let mut handles = vec![];

        if let Some(stdout) = attached.stdout() {
            let tx = output_tx.clone();
            handles.push(tokio::spawn(async move {
                forward_reader(stdout, tx, OutputChannel::Stdout, session_id).await;
            }));
        }
        if let Some(stderr) = attached.stderr() {
            let tx = output_tx.clone();
            handles.push(tokio::spawn(async move {
                forward_reader(stderr, tx, OutputChannel::Stderr, session_id).await;
            }));
        }

        // Drop our copy so the channel closes when the readers finish
        drop(output_tx);

        let stdin_writer = attached
            .stdin()
            .map(|w| Box::new(w) as Box<dyn tokio::io::AsyncWrite + Unpin + Send>);
        let size_tx = attached.terminal_size();

        Self {
            session_id,
            stdin_writer,
            size_tx,
            output_rx: Some(output_rx),
            reader_handles: handles,
            attached,
        }
    }
}

#[async_trait]
impl ExecStreams for KubeExecStreams {
    async fn send_stdin(&mut self, data: Vec<u8>) -> Result<()> {
        match self.stdin_writer {
            Some(ref mut writer) => {
                writer
                    .write_all(&data)
                    .await
                    .map_err(|e| Error::RemoteStream(e.to_string()))?;
                let _ = writer.flush().await;
                Ok(())
            }
            None => Err(Error::RemoteStream("stdin not attached".into())),
        }
    }

    async fn send_resize(&mut self, size: TerminalDimensions) {
        if let Some(ref mut tx) = self.size_tx {
            let _ = SinkExt::send(
                tx,
                TerminalSize {
                    width: size.cols,
                    height: size.rows,
                },
            )
            .await;
        }
    }

    fn take_output(&mut self) -> mpsc::Receiver<StreamOutput> {
        self.output_rx.take().unwrap_or_else(closed_channel)
    }

    async fn finalize(mut self: Box<Self>) -> Option<Vec<u8>> {
        // The output channel only closes once both readers finished, so
        // the handles are done; drop them instead of re-awaiting.
        drop(self.reader_handles);

        // Release stdin and the resize sender so kube-rs can close the
        // underlying connection before status is awaited.
        drop(self.stdin_writer.take());
        drop(self.size_tx.take());

        let status = self.attached.take_status()?.await?;
        match serde_json::to_vec(&status) {
            Ok(json) => Some(json),
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "status not serializable");
                None
            }
        }
    }
}

/// An already-closed receiver, for repeat `take_output` calls.
fn closed_channel() -> mpsc::Receiver<StreamOutput> {
    let (_, rx) = mpsc::channel(1);
    rx
}

/// Forwards an async reader into the output channel until EOF or error.
async fn forward_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<StreamOutput>,
    channel: OutputChannel,
    session_id: Uuid,
) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let output = StreamOutput {
                    channel,
                    data: buf[..n].to_vec(),
                };
                if tx.send(output).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, ?channel, "reader error");
                break;
            }
        }
    }
}
