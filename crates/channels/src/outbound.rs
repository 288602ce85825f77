//! Per-connection outbound queue and rate-limited sender loop.

use std::sync::Arc;

use {
    chatrelay_common::{OutboundResponse, Platform},
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use chatrelay_metrics::{chat as chat_metrics, counter, labels};

use crate::connector::{PlatformSender, SendLimits};

/// Render a response as the text actually sent: reply mention prefix, then
/// truncation to `max_len` characters.
pub fn format_response(response: &OutboundResponse, max_len: usize) -> String {
    let text = match response.reply_to.as_deref() {
        Some(user) if !user.is_empty() => {
            format!("@{} {}", user.trim_start_matches('@'), response.text)
        },
        _ => response.text.clone(),
    };
    truncate_chars(&text, max_len).to_string()
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Spawn the sender loop for one live connection.
///
/// Responses are sent one at a time with `limits.min_interval` between them.
/// On cancellation anything still queued is discarded.
pub fn spawn_sender(
    platform: Platform,
    sender: Arc<dyn PlatformSender>,
    limits: SendLimits,
    capacity: usize,
    cancel: CancellationToken,
) -> (mpsc::Sender<OutboundResponse>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(run_sender(platform, sender, limits, rx, cancel));
    (tx, handle)
}

async fn run_sender(
    platform: Platform,
    sender: Arc<dyn PlatformSender>,
    limits: SendLimits,
    mut rx: mpsc::Receiver<OutboundResponse>,
    cancel: CancellationToken,
) {
    debug!(%platform, "outbound sender started");
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(response) => response,
                None => break,
            },
        };

        let text = format_response(&response, limits.max_len);
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = sender.send(&response.channel, &text) => result,
        };
        match result {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!(chat_metrics::MESSAGES_SENT_TOTAL, labels::PLATFORM => platform.as_str())
                    .increment(1);
                debug!(%platform, channel = %response.channel, "response sent");
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(chat_metrics::SEND_ERRORS_TOTAL, labels::PLATFORM => platform.as_str())
                    .increment(1);
                warn!(%platform, channel = %response.channel, error = %e, "failed to send response");
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(limits.min_interval) => {},
        }
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(%platform, discarded, "outbound queue discarded on shutdown");
    }
    debug!(%platform, "outbound sender stopped");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::error::{ConnectorError, Result},
        async_trait::async_trait,
        std::{sync::Mutex, time::Duration},
        tokio::time::Instant,
    };

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String, Instant)>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl PlatformSender for Recorder {
        async fn send(&self, channel: &str, text: &str) -> Result<()> {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(ConnectorError::transient("rate limited"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel.into(), text.into(), Instant::now()));
            Ok(())
        }
    }

    #[test]
    fn formats_reply_mention() {
        let resp = OutboundResponse::new(Platform::Twitch, "#chan", "hello").replying_to("alice");
        assert_eq!(format_response(&resp, 500), "@alice hello");
        let resp = OutboundResponse::new(Platform::Twitch, "#chan", "hello").replying_to("@bob");
        assert_eq!(format_response(&resp, 500), "@bob hello");
        let resp = OutboundResponse::new(Platform::Twitch, "#chan", "plain");
        assert_eq!(format_response(&resp, 500), "plain");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("🎉🎉🎉", 2), "🎉🎉");
        assert_eq!(truncate_chars("short", 280), "short");
        let long = "x".repeat(300);
        let resp = OutboundResponse::new(Platform::X, "1", long).replying_to("a");
        assert_eq!(format_response(&resp, 280).chars().count(), 280);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_spaced_by_min_interval() {
        let recorder = Arc::new(Recorder::default());
        let limits = SendLimits::new(500, Duration::from_millis(1500));
        let cancel = CancellationToken::new();
        let (tx, handle) = spawn_sender(
            Platform::Twitch,
            Arc::clone(&recorder) as Arc<dyn PlatformSender>,
            limits,
            10,
            cancel.clone(),
        );

        for i in 0..3 {
            tx.try_send(OutboundResponse::new(Platform::Twitch, "#c", format!("m{i}")))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        for pair in sent.windows(2) {
            assert!(pair[1].2 - pair[0].2 >= Duration::from_millis(1500));
        }
        assert_eq!(sent[2].1, "m2");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn send_error_does_not_stop_loop() {
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_first.lock().unwrap() = true;
        let cancel = CancellationToken::new();
        let (tx, handle) = spawn_sender(
            Platform::X,
            Arc::clone(&recorder) as Arc<dyn PlatformSender>,
            SendLimits::new(280, Duration::from_secs(5)),
            10,
            cancel.clone(),
        );
        tx.try_send(OutboundResponse::new(Platform::X, "1", "a")).unwrap();
        tx.try_send(OutboundResponse::new(Platform::X, "1", "b")).unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending() {
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let (tx, handle) = spawn_sender(
            Platform::Youtube,
            Arc::clone(&recorder) as Arc<dyn PlatformSender>,
            SendLimits::new(200, Duration::from_secs(60)),
            10,
            cancel.clone(),
        );
        for i in 0..5 {
            tx.try_send(OutboundResponse::new(Platform::Youtube, "c", format!("{i}")))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
        assert!(tx.try_send(OutboundResponse::new(Platform::Youtube, "c", "late")).is_err());
    }
}
