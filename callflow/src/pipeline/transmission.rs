//! Where a transport attempt executes.
//!
//! Both send modes share the request's state machine; they differ only in
//! whether the transport future is spawned on a runtime worker or polled on
//! the caller's own task. Either way the attempt races the request's
//! cancellation flag, and a late result is dropped once cancellation wins.

use super::cancellation::CancelFlag;
use crate::config::SendMode;
use crate::errors::TransportError;
use crate::transport::{AttemptRequest, ProgressReporter, Transport};
use std::sync::Arc;

/// What came back from one attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The transport finished, successfully or not.
    Completed(Result<Vec<u8>, TransportError>),
    /// Cancellation was observed first; any transport result is discarded.
    Cancelled,
}

/// Runs one attempt according to `mode`.
pub async fn transmit(
    mode: SendMode,
    transport: Arc<dyn Transport>,
    request: AttemptRequest,
    progress: ProgressReporter,
    cancel: &CancelFlag,
) -> AttemptOutcome {
    let timeout = request.timeout;

    match mode {
        SendMode::Asynchronous => {
            let mut handle = tokio::spawn(async move {
                tokio::time::timeout(timeout, transport.attempt(request, progress)).await
            });

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    handle.abort();
                    AttemptOutcome::Cancelled
                }
                joined = &mut handle => AttemptOutcome::Completed(match joined {
                    Ok(Ok(result)) => result,
                    Ok(Err(_elapsed)) => Err(TransportError::Timeout(timeout)),
                    Err(e) => Err(TransportError::Worker(e.to_string())),
                }),
            }
        }
        SendMode::Synchronous => {
            tokio::select! {
                biased;
                () = cancel.cancelled() => AttemptOutcome::Cancelled,
                result = tokio::time::timeout(timeout, transport.attempt(request, progress)) => {
                    AttemptOutcome::Completed(
                        result.unwrap_or(Err(TransportError::Timeout(timeout))),
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpMethod;
    use crate::testing::{MockReply, MockTransport};
    use std::time::Duration;

    fn attempt(timeout: Duration) -> AttemptRequest {
        AttemptRequest {
            request_id: 1,
            attempt: 1,
            url: "http://test/method".to_string(),
            http_method: HttpMethod::Get,
            parameters: Default::default(),
            media: Vec::new(),
            part_type: None,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_async_mode_returns_body() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::body(b"ok".to_vec()));

        let outcome = transmit(
            SendMode::Asynchronous,
            transport.clone(),
            attempt(Duration::from_secs(1)),
            ProgressReporter::noop(),
            &CancelFlag::new(),
        )
        .await;

        assert!(matches!(outcome, AttemptOutcome::Completed(Ok(ref body)) if body == b"ok"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_sync_mode_times_out() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::Hang);

        let outcome = transmit(
            SendMode::Synchronous,
            transport,
            attempt(Duration::from_millis(20)),
            ProgressReporter::noop(),
            &CancelFlag::new(),
        )
        .await;

        assert!(matches!(
            outcome,
            AttemptOutcome::Completed(Err(TransportError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_hanging_attempt() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::Hang);
        let cancel = Arc::new(CancelFlag::new());

        let task = {
            let cancel = cancel.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                transmit(
                    SendMode::Asynchronous,
                    transport,
                    attempt(Duration::from_secs(30)),
                    ProgressReporter::noop(),
                    &cancel,
                )
                .await
            })
        };

        transport.wait_for_calls(1).await;
        cancel.cancel("test");

        assert!(matches!(task.await.unwrap(), AttemptOutcome::Cancelled));
    }
}
