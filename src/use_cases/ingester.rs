// Pulls the upstream event feed (records separated by the ASCII record
// separator, 0x1E) and republishes each parsed-valid frame on an in-process
// broadcast bus for the broker to fan out.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::{broadcast, Notify};

use crate::domain::Event;

const RECORD_DELIMITER: u8 = 0x1E;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Runs until `shutdown` is notified, reconnecting to `events_url` whenever
/// the upstream stream ends or errors. The reconnect delay starts at 1 s and
/// doubles on each successive failure, resetting to 1 s once a connection
/// publishes at least one record.
pub async fn run_ingester(
    http: reqwest::Client,
    events_url: String,
    bus_tx: broadcast::Sender<Bytes>,
    shutdown: Arc<Notify>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!("event ingester shutting down");
                return;
            }
            result = stream_once(&http, &events_url, &bus_tx) => {
                match result {
                    Ok(published_any) => {
                        if published_any {
                            backoff = INITIAL_BACKOFF;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "event stream ended, reconnecting");
                    }
                }
            }
        }

        tokio::select! {
            _ = shutdown.notified() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(Duration::from_secs(60));
    }
}

/// Streams one connection's worth of records. Returns whether at least one
/// record was published, so the caller can reset its backoff.
async fn stream_once(
    http: &reqwest::Client,
    events_url: &str,
    bus_tx: &broadcast::Sender<Bytes>,
) -> Result<bool, reqwest::Error> {
    let response = http.get(events_url).send().await?.error_for_status()?;
    let mut body = response.bytes_stream();
    let mut buf = BytesMut::new();
    let mut published_any = false;

    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
        published_any |= drain_records(&mut buf, bus_tx);
    }

    Ok(published_any)
}

/// Splits every complete, non-empty, parseable record out of `buf` on
/// `RECORD_DELIMITER` and publishes it. Returns whether anything published.
fn drain_records(buf: &mut BytesMut, bus_tx: &broadcast::Sender<Bytes>) -> bool {
    let mut published_any = false;

    while let Some(pos) = buf.iter().position(|&b| b == RECORD_DELIMITER) {
        let record = buf.split_to(pos).freeze();
        buf.advance(1);
        if record.is_empty() {
            continue;
        }

        if let Err(err) = serde_json::from_slice::<Event>(&record) {
            tracing::warn!(error = %err, "dropping unparseable event record");
            continue;
        }

        // No receivers is the normal state between lobby activity; ignore.
        let _ = bus_tx.send(record);
        published_any = true;
    }

    published_any
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_unparseable_record_without_publishing() {
        let (bus_tx, mut bus_rx) = broadcast::channel(4);
        let good = br#"{"user":1,"level":"foo-17","time":1,"score_completion":5,"score_finesse":5,"timestamp":1}"#;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"not json");
        buf.extend_from_slice(&[RECORD_DELIMITER]);
        buf.extend_from_slice(good);
        buf.extend_from_slice(&[RECORD_DELIMITER]);

        let published_any = drain_records(&mut buf, &bus_tx);

        assert!(published_any);
        let published = bus_rx.try_recv().expect("should publish the valid record");
        assert_eq!(&published[..], &good[..]);
        assert!(bus_rx.try_recv().is_err());
    }

    #[test]
    fn empty_record_is_a_heartbeat_not_published() {
        let (bus_tx, mut bus_rx) = broadcast::channel(4);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[RECORD_DELIMITER]);

        let published_any = drain_records(&mut buf, &bus_tx);

        assert!(!published_any);
        assert!(bus_rx.try_recv().is_err());
    }
}
