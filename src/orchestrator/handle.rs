//! Handle to a converge or lift running in the background.

use std::time::Duration;
use tokio::task::JoinHandle;

use super::report::ConvergeReport;
use crate::errors::ConvergeError;

type OperationResult = Result<ConvergeReport, ConvergeError>;

pub struct OperationHandle {
    handle: Option<JoinHandle<OperationResult>>,
}

impl OperationHandle {
    pub(crate) fn new(handle: JoinHandle<OperationResult>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the final report.
    pub async fn wait(mut self) -> OperationResult {
        match self.handle.take() {
            Some(handle) => join(handle.await),
            None => Err(already_taken()),
        }
    }

    /// Wait up to `timeout` for the final report.
    ///
    /// `None` means the operation is still running; it keeps running and the
    /// handle can be waited on again.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<OperationResult> {
        let Some(handle) = self.handle.as_mut() else {
            return Some(Err(already_taken()));
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => {
                self.handle = None;
                Some(join(joined))
            }
            Err(_) => None,
        }
    }
}

fn join(joined: Result<OperationResult, tokio::task::JoinError>) -> OperationResult {
    joined.map_err(|e| ConvergeError::Interrupted(e.to_string()))?
}

fn already_taken() -> ConvergeError {
    ConvergeError::Interrupted("operation result was already collected".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::report::Operation;

    #[tokio::test]
    async fn test_wait_timeout_does_not_cancel() {
        let mut handle = OperationHandle::new(tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(ConvergeReport::start(Operation::Lift).finish())
        }));

        assert!(handle.wait_timeout(Duration::from_millis(1)).await.is_none());
        assert!(!handle.is_finished());

        let report = handle
            .wait_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(report.is_success());

        // the result can only be collected once
        assert!(matches!(
            handle.wait_timeout(Duration::from_millis(1)).await,
            Some(Err(ConvergeError::Interrupted(_)))
        ));
    }

    #[tokio::test]
    async fn test_panicked_operation_is_interrupted() {
        let handle = OperationHandle::new(tokio::spawn(async {
            if true {
                panic!("provider crashed");
            }
            Ok(ConvergeReport::start(Operation::Converge))
        }));
        assert!(matches!(
            handle.wait().await,
            Err(ConvergeError::Interrupted(_))
        ));
    }
}
