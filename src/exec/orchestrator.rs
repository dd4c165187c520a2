//! Drives an exec session in interactive or one-shot mode
//!
//! Both modes move through the same states: Requesting (opening the
//! stream), Streaming, then Closed or Failed. There are no retries at
//! this layer; a failed session surfaces its error and the caller
//! decides what to tell the client.

use tracing::{debug, info, warn};

use super::streams::{ExecBackend, OutputChannel};
use super::{ExecTarget, StreamSettings};
use crate::error::{Error, Result};
use crate::relay::adapter::TerminalAdapter;

/// Shell started when an interactive session gives no command.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Splits a raw command string into exec tokens.
///
/// Quote characters are stripped and the remainder split on whitespace,
/// so arguments with embedded whitespace cannot be expressed. Callers
/// that need real shell semantics should wrap the command in
/// `sh -c '...'` on their side.
pub fn tokenize_command(raw: &str) -> Vec<String> {
    raw.chars()
        .filter(|c| *c != '"' && *c != '\'')
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Runs an interactive session: bridges the adapter's input, output, and
/// size latch to the exec streams until either side ends.
///
/// The final exit status, when the backend reports one, is forwarded to
/// the client as a best-effort text frame before returning.
pub async fn run_interactive(
    backend: &dyn ExecBackend,
    target: &ExecTarget,
    command: &[String],
    settings: StreamSettings,
    adapter: &TerminalAdapter,
) -> Result<()> {
    let command: Vec<String> = if command.is_empty() {
        vec![DEFAULT_SHELL.to_string()]
    } else {
        command.to_vec()
    };

    info!(
        cluster = %target.cluster,
        namespace = %target.namespace,
        pod = %target.pod,
        command = ?command,
        "interactive exec starting"
    );

    let mut streams = backend.open(target, &command, settings).await?;
    let mut output_rx = streams.take_output();
    let mut sizes = adapter.size_receiver();
    let mut resize_open = true;

    let mut result = Ok(());
    loop {
        tokio::select! {
            input = adapter.read_input() => match input {
                Ok(data) => {
                    if let Err(e) = streams.send_stdin(data).await {
                        result = Err(e);
                        break;
                    }
                }
                // Client went away; normal end of session.
                Err(Error::Closed) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            },
            output = output_rx.recv() => match output {
                Some(chunk) => {
                    if adapter.write_output(chunk.data).await.is_err() {
                        break;
                    }
                }
                // Remote streams ended.
                None => break,
            },
            changed = sizes.changed(), if resize_open => match changed {
                Ok(()) => {
                    let size = *sizes.borrow_and_update();
                    streams.send_resize(size).await;
                }
                Err(_) => resize_open = false,
            },
        }
    }

    if let Some(status) = streams.finalize().await {
        if adapter.write_output(status).await.is_err() {
            debug!(pod = %target.pod, "client gone before exit status");
        }
    }

    match &result {
        Ok(()) => info!(pod = %target.pod, "interactive exec finished"),
        Err(e) => warn!(pod = %target.pod, error = %e, "interactive exec failed"),
    }
    result
}

/// Runs a one-shot command: no stdin, output buffered until the remote
/// streams end.
///
/// Anything the command wrote to stderr overrides transport success: the
/// session fails with `CapturedStderr` even when the exec call itself
/// completed cleanly.
pub async fn run_once(
    backend: &dyn ExecBackend,
    target: &ExecTarget,
    command: &[String],
    tty: bool,
) -> Result<Vec<u8>> {
    info!(
        cluster = %target.cluster,
        namespace = %target.namespace,
        pod = %target.pod,
        command = ?command,
        "one-shot exec starting"
    );

    let mut streams = backend
        .open(target, command, StreamSettings::one_shot(tty))
        .await?;
    let mut output_rx = streams.take_output();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(chunk) = output_rx.recv().await {
        match chunk.channel {
            OutputChannel::Stdout => stdout.extend_from_slice(&chunk.data),
            OutputChannel::Stderr => stderr.extend_from_slice(&chunk.data),
        }
    }
    let _ = streams.finalize().await;

    if !stderr.is_empty() {
        let message = String::from_utf8_lossy(&stderr).trim_end().to_string();
        return Err(Error::CapturedStderr(message));
    }
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use super::super::streams::{ExecStreams, StreamOutput};
    use super::*;
    use crate::relay::codec::{TerminalDimensions, CONTROL_MARKER};
    use crate::relay::registry::ConnectionRegistry;
    use crate::relay::socket::test_support::fake_transport;
    use crate::relay::socket::{RelayMessage, RelaySocket};

    const TICK: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct Recorded {
        stdin: Mutex<Vec<Vec<u8>>>,
        resizes: Mutex<Vec<TerminalDimensions>>,
        commands: Mutex<Vec<Vec<String>>>,
    }

    struct FakeStreams {
        recorded: Arc<Recorded>,
        output_rx: Option<mpsc::Receiver<StreamOutput>>,
        status: Option<Vec<u8>>,
    }

    #[async_trait]
    impl ExecStreams for FakeStreams {
        async fn send_stdin(&mut self, data: Vec<u8>) -> Result<()> {
            self.recorded.stdin.lock().push(data);
            Ok(())
        }

        async fn send_resize(&mut self, size: TerminalDimensions) {
            self.recorded.resizes.lock().push(size);
        }

        fn take_output(&mut self) -> mpsc::Receiver<StreamOutput> {
            self.output_rx.take().unwrap_or_else(|| {
                let (_, rx) = mpsc::channel(1);
                rx
            })
        }

        async fn finalize(self: Box<Self>) -> Option<Vec<u8>> {
            self.status
        }
    }

    struct FakeBackend {
        recorded: Arc<Recorded>,
        streams: Mutex<Option<FakeStreams>>,
        fail_open: Option<String>,
    }

    impl FakeBackend {
        /// Backend yielding one scripted session; the returned sender
        /// feeds the session's output channel.
        fn scripted(status: Option<Vec<u8>>) -> (Self, Arc<Recorded>, mpsc::Sender<StreamOutput>) {
            let recorded = Arc::new(Recorded::default());
            let (output_tx, output_rx) = mpsc::channel(16);
            let backend = Self {
                recorded: Arc::clone(&recorded),
                streams: Mutex::new(Some(FakeStreams {
                    recorded: Arc::clone(&recorded),
                    output_rx: Some(output_rx),
                    status,
                })),
                fail_open: None,
            };
            (backend, recorded, output_tx)
        }

        fn failing(message: &str) -> Self {
            Self {
                recorded: Arc::new(Recorded::default()),
                streams: Mutex::new(None),
                fail_open: Some(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl ExecBackend for FakeBackend {
        async fn open(
            &self,
            _target: &ExecTarget,
            command: &[String],
            _settings: StreamSettings,
        ) -> Result<Box<dyn ExecStreams>> {
            if let Some(message) = &self.fail_open {
                return Err(Error::RemoteStream(message.clone()));
            }
            self.recorded.commands.lock().push(command.to_vec());
            let streams = self
                .streams
                .lock()
                .take()
                .expect("scripted backend opened twice");
            Ok(Box::new(streams))
        }
    }

    fn target() -> ExecTarget {
        ExecTarget {
            cluster: "default".into(),
            namespace: "ns".into(),
            pod: "web-0".into(),
            container: None,
        }
    }

    fn stdout(data: &[u8]) -> StreamOutput {
        StreamOutput {
            channel: OutputChannel::Stdout,
            data: data.to_vec(),
        }
    }

    fn stderr(data: &[u8]) -> StreamOutput {
        StreamOutput {
            channel: OutputChannel::Stderr,
            data: data.to_vec(),
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(TICK, async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_tokenize_splits_on_whitespace() {
        assert_eq!(
            tokenize_command("ls  -l   /tmp"),
            vec!["ls", "-l", "/tmp"]
        );
    }

    #[test]
    fn test_tokenize_strips_quotes() {
        // Quoting cannot protect whitespace; documented limitation.
        assert_eq!(
            tokenize_command("echo 'hello world'"),
            vec!["echo", "hello", "world"]
        );
    }

    #[test]
    fn test_tokenize_empty_input() {
        assert!(tokenize_command("   ").is_empty());
    }

    #[tokio::test]
    async fn test_run_once_happy_path() {
        let (backend, _recorded, output_tx) = FakeBackend::scripted(None);
        output_tx.send(stdout(b"hi\n")).await.unwrap();
        drop(output_tx);

        let out = run_once(&backend, &target(), &["echo".into(), "hi".into()], false)
            .await
            .unwrap();
        assert_eq!(out, b"hi\n");
    }

    #[tokio::test]
    async fn test_run_once_stderr_overrides_success() {
        let (backend, _recorded, output_tx) = FakeBackend::scripted(None);
        output_tx.send(stdout(b"partial")).await.unwrap();
        output_tx.send(stderr(b"boom\n")).await.unwrap();
        drop(output_tx);

        let err = run_once(&backend, &target(), &["false".into()], false)
            .await
            .unwrap_err();
        match err {
            Error::CapturedStderr(message) => assert_eq!(message, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_once_stream_start_failure() {
        let backend = FakeBackend::failing("pods \"web-0\" not found");
        let err = run_once(&backend, &target(), &["id".into()], false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteStream(_)));
    }

    #[tokio::test]
    async fn test_interactive_bridges_input_and_output() {
        let (source, sink, mut harness) = fake_transport();
        let socket = RelaySocket::create(source, sink, ConnectionRegistry::new());
        let adapter = TerminalAdapter::new(Arc::clone(&socket));

        let (backend, recorded, output_tx) =
            FakeBackend::scripted(Some(b"{\"status\":\"Success\"}".to_vec()));
        let session = tokio::spawn(async move {
            run_interactive(&backend, &target(), &["bash".into()], StreamSettings::interactive(), &adapter).await
        });

        harness
            .client_tx
            .send(RelayMessage::binary(b"ls\n".to_vec()))
            .unwrap();
        wait_until(|| !recorded.stdin.lock().is_empty()).await;
        assert_eq!(recorded.stdin.lock()[0], b"ls\n");

        output_tx.send(stdout(b"README.md\r\n")).await.unwrap();
        let frame = timeout(TICK, harness.sent_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, RelayMessage::text(b"README.md\r\n".to_vec()));

        // Remote ends; the final status is forwarded before the session
        // resolves.
        drop(output_tx);
        let frame = timeout(TICK, harness.sent_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, RelayMessage::text(b"{\"status\":\"Success\"}".to_vec()));

        timeout(TICK, session).await.unwrap().unwrap().unwrap();
        socket.close();
        socket.join().await;
    }

    #[tokio::test]
    async fn test_interactive_forwards_resize() {
        let (source, sink, harness) = fake_transport();
        let socket = RelaySocket::create(source, sink, ConnectionRegistry::new());
        let adapter = TerminalAdapter::new(Arc::clone(&socket));

        let (backend, recorded, output_tx) = FakeBackend::scripted(None);
        let session = tokio::spawn(async move {
            run_interactive(&backend, &target(), &["sh".into()], StreamSettings::interactive(), &adapter).await
        });

        let mut payload = CONTROL_MARKER.to_vec();
        payload.extend_from_slice(
            serde_json::json!({"type": "resize", "input": "", "rows": 40, "cols": 120})
                .to_string()
                .as_bytes(),
        );
        harness.client_tx.send(RelayMessage::binary(payload)).unwrap();

        wait_until(|| !recorded.resizes.lock().is_empty()).await;
        assert_eq!(
            recorded.resizes.lock()[0],
            TerminalDimensions { rows: 40, cols: 120 }
        );

        drop(output_tx);
        timeout(TICK, session).await.unwrap().unwrap().unwrap();
        socket.close();
        socket.join().await;
    }

    #[tokio::test]
    async fn test_interactive_defaults_to_shell() {
        let (source, sink, _harness) = fake_transport();
        let socket = RelaySocket::create(source, sink, ConnectionRegistry::new());
        let adapter = TerminalAdapter::new(Arc::clone(&socket));

        let (backend, recorded, output_tx) = FakeBackend::scripted(None);
        drop(output_tx);

        run_interactive(&backend, &target(), &[], StreamSettings::interactive(), &adapter)
            .await
            .unwrap();
        assert_eq!(recorded.commands.lock()[0], vec![DEFAULT_SHELL.to_string()]);

        socket.close();
        socket.join().await;
    }

    #[tokio::test]
    async fn test_interactive_client_close_ends_session() {
        let (source, sink, harness) = fake_transport();
        let socket = RelaySocket::create(source, sink, ConnectionRegistry::new());
        let adapter = TerminalAdapter::new(Arc::clone(&socket));

        let (backend, _recorded, _output_tx) = FakeBackend::scripted(None);
        let session = tokio::spawn(async move {
            run_interactive(&backend, &target(), &["sh".into()], StreamSettings::interactive(), &adapter).await
        });

        // Client disconnects mid-session.
        drop(harness.client_tx);
        socket.join().await;

        timeout(TICK, session).await.unwrap().unwrap().unwrap();
    }
}
