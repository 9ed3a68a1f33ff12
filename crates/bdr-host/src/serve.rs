//! The message loop.
//!
//! One task reads frames, handles them in arrival order and writes one reply
//! per frame. Between frames a ticker flushes events that have been buffered
//! too long. The loop ends when the input closes, the transport fails or the
//! shutdown future resolves, and always shuts the host down on the way out.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};

use crate::error::{HostError, HostResult};
use crate::framing::{self, DEFAULT_MAX_FRAME_BYTES};
use crate::host::Host;

/// Transport settings for [`serve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeOptions {
    /// Largest accepted incoming frame.
    pub max_frame_bytes: usize,
    /// Idle flush period.
    pub flush_interval: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            flush_interval: Duration::from_secs(bdr_config::DEFAULT_FLUSH_INTERVAL_SECS),
        }
    }
}

/// Serves `host` over a framed byte stream until EOF, error or `shutdown`.
pub async fn serve<R, W, F>(
    reader: R,
    writer: W,
    mut host: Host,
    options: ServeOptions,
    shutdown: F,
) -> HostResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let mut frames = FramedRead::new(reader, framing::codec(options.max_frame_bytes));
    let mut replies = FramedWrite::new(writer, framing::codec(options.max_frame_bytes));

    let period = options.flush_interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);
    info!("serving native messages");

    let outcome = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(frame)) => {
                    let reply = host.handle_frame(&frame);
                    if let Err(e) = replies.send(Bytes::from(reply.encode())).await {
                        error!(error = %e, "failed to send reply");
                        break Err(HostError::Io(e));
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "failed to read message");
                    break Err(HostError::Io(e));
                }
                None => {
                    info!("input closed");
                    break Ok(());
                }
            },
            _ = ticker.tick() => host.idle_flush(),
            () = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
        }
    };

    debug!("closing host");
    let closed = host.shutdown();
    if let Err(e) = &closed {
        error!(error = %e, "failed to close log cleanly");
    }
    outcome?;
    closed.map_err(HostError::from)
}
