use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancellation root shared by every endpoint created from it.
///
/// Terminating the context makes blocked receives return
/// [`BusError::Terminated`](crate::BusError::Terminated), stops publisher
/// accept loops, and fails later publishes. Termination is idempotent.
#[derive(Debug)]
pub struct Context {
    name: String,
    token: CancellationToken,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Context {
            name: name.into(),
            token: CancellationToken::new(),
        }
    }

    pub fn terminate(&self) {
        if !self.token.is_cancelled() {
            info!("Terminating {} context", self.name);
        }
        self.token.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}
