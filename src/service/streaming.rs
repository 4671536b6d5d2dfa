//! Streaming actions: a server-push event stream exposed as an async pull
//! sequence.
//!
//! Messages are SSE-framed (`data:` lines, events separated by a blank line);
//! keep-alive events carry no data and are filtered out silently. The
//! sequence ends when the stream closes, errors, or is aborted.

use crate::core::Result;
use crate::service::transport::{ByteStream, HttpRequest, HttpTransport};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Async pull sequence of streamed action messages.
pub struct StreamingActionMessages {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl StreamingActionMessages {
    /// The next message payload, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Aborts the underlying stream; the pull sequence then ends.
pub struct StreamingAbortHandle {
    task: tokio::task::JoinHandle<()>,
}

impl StreamingAbortHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Issues the streaming POST and pumps its events into a channel.
///
/// Returns once the first message (or stream end/error) has arrived, leaving
/// the rest of the sequence to whatever the caller handed the pull sequence
/// to.
pub(crate) async fn run_streaming_action(
    transport: &Arc<dyn HttpTransport>,
    request: HttpRequest,
) -> Result<(StreamingActionMessages, StreamingAbortHandle)> {
    let stream = transport.send_streaming(request).await?;

    let (sender, receiver) = mpsc::unbounded_channel();
    let (first_sender, first_receiver) = oneshot::channel::<()>();

    let task = tokio::spawn(pump_events(stream, sender, first_sender));

    // The caller stays busy until the first message arrives; a dropped sender
    // (stream ended before any message) releases it too.
    let _ = first_receiver.await;

    Ok((
        StreamingActionMessages { receiver },
        StreamingAbortHandle { task },
    ))
}

async fn pump_events(
    mut stream: ByteStream,
    sender: mpsc::UnboundedSender<String>,
    first_sender: oneshot::Sender<()>,
) {
    let mut first_sender = Some(first_sender);
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else {
            break;
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(boundary) = buffer.find("\n\n") {
            let event: String = buffer[..boundary].to_string();
            buffer.drain(..boundary + 2);

            let data = parse_event_data(&event);
            if data.is_empty() {
                // Keep-alive.
                continue;
            }

            if let Some(first) = first_sender.take() {
                let _ = first.send(());
            }

            if sender.send(data).is_err() {
                debug!("streaming consumer dropped, ending pump");
                return;
            }
        }
    }

    // Stream closed or errored: release a still-waiting caller by dropping
    // the first-message sender, and the channel by dropping the sender.
}

fn parse_event_data(event: &str) -> String {
    event
        .lines()
        .filter_map(|line| {
            line.strip_prefix("data:")
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_data_joins_multiple_lines() {
        assert_eq!(parse_event_data("data: one\ndata: two"), "one\ntwo");
        assert_eq!(parse_event_data("data:plain"), "plain");
    }

    #[test]
    fn keep_alive_events_have_no_data() {
        assert_eq!(parse_event_data(": ping"), "");
        assert_eq!(parse_event_data("data:"), "");
    }
}
