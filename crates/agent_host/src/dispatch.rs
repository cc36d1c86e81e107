//! The single remote call every dispatcher makes, bounded by a timeout and a
//! caller-supplied cancellation token.

use providers::{CompletionBackend, CompletionRequest, CompletionResponse};
use shared::error::{AgentError, DispatchResult};
use shared::settings::AgentSettings;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::history::DEFAULT_HISTORY_WINDOW;

/// Settings every dispatcher is constructed with.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub default_history_window: usize,
    pub request_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_history_window: DEFAULT_HISTORY_WINDOW,
            request_timeout: Duration::from_secs(480),
        }
    }
}

impl From<&AgentSettings> for DispatchSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            default_history_window: settings.default_history_window,
            request_timeout: settings.request_timeout(),
        }
    }
}

/// Issue one completion call.
///
/// Cancellation drops the in-flight request. No retries.
/// Milliseconds for error reporting, saturating at `u64::MAX`.
fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

pub async fn invoke(
    backend: &dyn CompletionBackend,
    request: CompletionRequest,
    settings: &DispatchSettings,
    cancel: &CancellationToken,
) -> DispatchResult<CompletionResponse> {
    let timeout = settings.request_timeout;
    let duration_ms = timeout_millis(timeout);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        outcome = tokio::time::timeout(timeout, backend.complete(request)) => match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) if is_transport_timeout(&err) => Err(AgentError::Timeout { duration_ms }),
            Ok(Err(err)) => Err(AgentError::RemoteCall(err)),
            Err(_) => Err(AgentError::Timeout { duration_ms }),
        },
    }
}

fn is_transport_timeout(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .is_some_and(reqwest::Error::is_timeout)
}
