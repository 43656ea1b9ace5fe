//! Per-connection handling.
//!
//! The whole connection is the message: read until the peer closes its
//! write side, close our end, then open the result in the editor.

use crate::command::{CommandBuffer, Location};
use crate::launcher::Launch;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Read limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ReadSettings {
    /// Upper bound of a single read
    pub chunk_size: usize,
    /// Maximum wait for the next chunk; `None` waits forever
    pub timeout: Option<Duration>,
}

/// Why reading a command stopped.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Peer closed its write side.
    Eof,
    /// A read failed; the buffer holds whatever arrived before it.
    Error(io::Error),
    /// No data arrived within the read timeout.
    TimedOut,
}

/// Read chunks until EOF, a read error, or an idle timeout.
pub async fn read_command<R>(reader: &mut R, settings: ReadSettings) -> (CommandBuffer, ReadOutcome)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = CommandBuffer::new();
    let mut chunk = BytesMut::with_capacity(settings.chunk_size);

    loop {
        chunk.clear();
        chunk.reserve(settings.chunk_size);

        let read = {
            let mut limited = (&mut *reader).take(settings.chunk_size as u64);
            let fut = limited.read_buf(&mut chunk);
            match settings.timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => return (buffer, ReadOutcome::TimedOut),
                },
                None => fut.await,
            }
        };

        match read {
            Ok(0) => return (buffer, ReadOutcome::Eof),
            Ok(_) => buffer.push(chunk.split().freeze()),
            Err(e) => return (buffer, ReadOutcome::Error(e)),
        }
    }
}

/// Handle a single client connection.
///
/// Never fails: read and launch errors are logged and stay inside this task.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    settings: ReadSettings,
    launcher: Arc<dyn Launch>,
) {
    let (buffer, outcome) = read_command(&mut stream, settings).await;

    // Peer may already be gone; closing is best effort.
    let _ = stream.shutdown().await;
    drop(stream);

    match outcome {
        ReadOutcome::Eof => {
            debug!(peer = %peer, chunks = buffer.chunk_count(), bytes = buffer.len(), "Connection closed by client");
        }
        ReadOutcome::Error(e) => {
            debug!(peer = %peer, error = %e, bytes = buffer.len(), "Read failed, using partial command");
        }
        ReadOutcome::TimedOut => {
            warn!(peer = %peer, bytes = buffer.len(), "Client idle too long, dropping connection");
            return;
        }
    }

    if buffer.is_empty() {
        debug!(peer = %peer, "No data received, launching with empty command");
    }

    dispatch(buffer.into_command(), peer, launcher.as_ref());
}

/// Log the command and hand it to the launcher.
fn dispatch(command: String, peer: SocketAddr, launcher: &dyn Launch) {
    let location = Location::parse(&command);
    info!(
        peer = %peer,
        path = location.path,
        line = location.line,
        command = %command,
        "Received command"
    );

    match launcher.launch(&command) {
        Ok(launched) => {
            debug!(peer = %peer, pid = launched.pid, "Editor launched");
        }
        Err(e) => {
            error!(peer = %peer, error = %e, "Failed to launch editor");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::launcher::{LaunchError, Launched};
    use std::sync::Mutex;

    /// Records every command instead of starting a process.
    #[derive(Default)]
    pub(crate) struct RecordingLauncher {
        pub commands: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl Launch for RecordingLauncher {
        fn launch(&self, command: &str) -> Result<Launched, LaunchError> {
            self.commands.lock().unwrap().push(command.to_string());
            if self.fail {
                Err(LaunchError::NotFound {
                    executable: "recording".to_string(),
                })
            } else {
                Ok(Launched { pid: None })
            }
        }
    }

    fn settings(chunk_size: usize) -> ReadSettings {
        ReadSettings {
            chunk_size,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_reads_until_eof() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"  /src/")
            .read(b"lib.rs:")
            .read(b"10\n")
            .build();

        let (buffer, outcome) = read_command(&mut reader, settings(1024)).await;
        assert!(matches!(outcome, ReadOutcome::Eof));
        assert_eq!(buffer.into_command(), "/src/lib.rs:10");
    }

    #[tokio::test]
    async fn test_reads_are_bounded_by_chunk_size() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"0123456789abcdef")
            .build();

        let (buffer, outcome) = read_command(&mut reader, settings(4)).await;
        assert!(matches!(outcome, ReadOutcome::Eof));
        assert_eq!(buffer.chunk_count(), 4);
        assert_eq!(buffer.into_command(), "0123456789abcdef");
    }

    #[tokio::test]
    async fn test_read_error_keeps_partial_command() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"/src/main.c")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let (buffer, outcome) = read_command(&mut reader, settings(1024)).await;
        match outcome {
            ReadOutcome::Error(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected read error, got {other:?}"),
        }
        assert_eq!(buffer.into_command(), "/src/main.c");
    }

    #[tokio::test]
    async fn test_idle_client_times_out() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"/src/partial").await.unwrap();

        let settings = ReadSettings {
            chunk_size: 1024,
            timeout: Some(Duration::from_millis(50)),
        };
        let (buffer, outcome) = read_command(&mut server, settings).await;

        assert!(matches!(outcome, ReadOutcome::TimedOut));
        assert_eq!(buffer.len(), "/src/partial".len());
        drop(client);
    }

    #[tokio::test]
    async fn test_timeout_resets_on_each_chunk() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for part in [&b"/a"[..], b"/b", b"/c.rs"] {
                client.write_all(part).await.unwrap();
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
        });

        let settings = ReadSettings {
            chunk_size: 1024,
            timeout: Some(Duration::from_millis(500)),
        };
        let (buffer, outcome) = read_command(&mut server, settings).await;
        writer.await.unwrap();

        assert!(matches!(outcome, ReadOutcome::Eof));
        assert_eq!(buffer.into_command(), "/a/b/c.rs");
    }

    #[test]
    fn test_dispatch_launches_empty_command() {
        let launcher = RecordingLauncher::default();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        dispatch(String::new(), peer, &launcher);

        assert_eq!(*launcher.commands.lock().unwrap(), vec![String::new()]);
    }

    #[test]
    fn test_dispatch_swallows_launch_failure() {
        let launcher = RecordingLauncher {
            fail: true,
            ..RecordingLauncher::default()
        };
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        dispatch("file.rs:3".to_string(), peer, &launcher);

        assert_eq!(launcher.commands.lock().unwrap().len(), 1);
    }
}
