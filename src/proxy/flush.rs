//! Flush-interval policy for relayed bodies.
//!
//! With a zero interval every backend frame is written to the client as soon
//! as it arrives. With a positive interval, frames that arrive within one
//! interval of the first buffered frame are coalesced into a single write.

use std::time::Duration;

use axum::body::{Body, Bytes};
use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use tokio::time::Instant;

/// Apply a flush interval to a response body.
pub fn coalesce(body: Body, interval: Duration) -> Body {
    if interval.is_zero() {
        return body;
    }
    Body::from_stream(coalesce_stream(body.into_data_stream(), interval))
}

struct State<S> {
    inner: S,
    interval: Duration,
    failed: Option<axum::Error>,
    done: bool,
}

fn coalesce_stream<S>(inner: S, interval: Duration) -> impl Stream<Item = Result<Bytes, axum::Error>>
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Unpin,
{
    let state = State {
        inner,
        interval,
        failed: None,
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        if let Some(e) = state.failed.take() {
            return Some((Err(e), state));
        }
        if state.done {
            return None;
        }

        let mut buffer = BytesMut::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let next = match deadline {
                None => state.inner.next().await,
                Some(at) => match tokio::time::timeout_at(at, state.inner.next()).await {
                    Ok(next) => next,
                    // Interval elapsed; flush what we have.
                    Err(_) => return Some((Ok(buffer.freeze()), state)),
                },
            };

            match next {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    buffer.extend_from_slice(&chunk);
                    deadline.get_or_insert_with(|| Instant::now() + state.interval);
                }
                Some(Err(e)) => {
                    state.done = true;
                    if buffer.is_empty() {
                        return Some((Err(e), state));
                    }
                    // Buffered bytes first, the error on the next poll.
                    state.failed = Some(e);
                    return Some((Ok(buffer.freeze()), state));
                }
                None => {
                    state.done = true;
                    if buffer.is_empty() {
                        return None;
                    }
                    return Some((Ok(buffer.freeze()), state));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> Vec<Result<Bytes, axum::Error>> {
        parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect()
    }

    async fn frames(body: Body) -> Vec<Bytes> {
        let mut stream = body.into_data_stream();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.push(chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_zero_interval_passes_frames_through() {
        let body = Body::from_stream(futures_util::stream::iter(chunks(&["a", "b", "c"])));
        let out = frames(coalesce(body, Duration::ZERO)).await;
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_ready_frames_are_coalesced() {
        let body = Body::from_stream(futures_util::stream::iter(chunks(&["a", "b", "c"])));
        let out = frames(coalesce(body, Duration::from_millis(50))).await;
        assert_eq!(out, vec!["abc"]);
    }

    #[tokio::test]
    async fn test_error_follows_buffered_bytes() {
        let items = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(axum::Error::new(std::io::Error::other("reset"))),
        ];
        let body = coalesce(
            Body::from_stream(futures_util::stream::iter(items)),
            Duration::from_millis(50),
        );

        let mut stream = body.into_data_stream();
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_frames_flush_per_interval() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, axum::Error>>(4);
        let stream = tokio_stream_from(rx);
        let body = coalesce(Body::from_stream(stream), Duration::from_millis(100));

        tokio::spawn(async move {
            tx.send(Ok(Bytes::from_static(b"first"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(Ok(Bytes::from_static(b"second"))).await.unwrap();
        });

        let out = frames(body).await;
        assert_eq!(out, vec!["first", "second"]);
    }

    fn tokio_stream_from(
        rx: tokio::sync::mpsc::Receiver<Result<Bytes, axum::Error>>,
    ) -> impl Stream<Item = Result<Bytes, axum::Error>> + Send {
        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
    }
}
