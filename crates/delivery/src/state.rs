//! Delivery lifecycle state cell

use contracts::{DeliveryState, StatusEvent, StreamId};
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use crate::error::DeliveryError;

/// Current `DeliveryState` of one stream plus its status channel.
///
/// Every accepted transition is published as `StatusEvent::StateChanged`.
pub struct StateCell {
    stream: StreamId,
    state: watch::Sender<DeliveryState>,
    status: broadcast::Sender<StatusEvent>,
}

impl StateCell {
    pub fn new(stream: StreamId, status: broadcast::Sender<StatusEvent>) -> Self {
        let (state, _) = watch::channel(DeliveryState::Created);
        Self {
            stream,
            state,
            status,
        }
    }

    pub fn get(&self) -> DeliveryState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<DeliveryState> {
        self.state.subscribe()
    }

    /// Move to `to`. Returns the previous state.
    ///
    /// # Errors
    /// `IllegalTransition` when the lifecycle does not allow the move;
    /// the state is left unchanged.
    pub fn transition(
        &self,
        to: DeliveryState,
        reason: Option<String>,
    ) -> Result<DeliveryState, DeliveryError> {
        let mut previous = self.get();
        let changed = self.state.send_if_modified(|state| {
            previous = *state;
            if state.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        });
        if !changed {
            return Err(DeliveryError::IllegalTransition { from: previous, to });
        }

        info!(stream = %self.stream, from = %previous, to = %to, reason = reason.as_deref(), "state changed");
        observability::record_state(&self.stream, to);
        let _ = self.status.send(StatusEvent::StateChanged {
            stream: self.stream.clone(),
            from: previous,
            to,
            reason,
        });
        Ok(previous)
    }

    /// Move to `Failed` unless already terminal. Returns whether this call
    /// made the change, so a fatal condition is reported once.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        match self.transition(DeliveryState::Failed, Some(reason.clone())) {
            Ok(_) => {
                error!(stream = %self.stream, reason = %reason, "delivery stream failed");
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryState::*;

    fn cell() -> (StateCell, broadcast::Receiver<StatusEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (StateCell::new("s".into(), tx), rx)
    }

    #[test]
    fn test_happy_path_publishes_events() {
        let (cell, mut rx) = cell();
        cell.transition(Active, None).unwrap();
        cell.transition(Draining, Some("stop".into())).unwrap();
        cell.transition(Stopped, None).unwrap();
        assert_eq!(cell.get(), Stopped);

        let mut seen = Vec::new();
        while let Ok(StatusEvent::StateChanged { to, .. }) = rx.try_recv() {
            seen.push(to);
        }
        assert_eq!(seen, vec![Active, Draining, Stopped]);
    }

    #[test]
    fn test_skipping_draining_is_rejected() {
        let (cell, _rx) = cell();
        cell.transition(Active, None).unwrap();
        let err = cell.transition(Stopped, None).unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::IllegalTransition {
                from: Active,
                to: Stopped
            }
        ));
        assert_eq!(cell.get(), Active);
    }

    #[test]
    fn test_fail_reported_once() {
        let (cell, _rx) = cell();
        cell.transition(Active, None).unwrap();
        assert!(cell.fail("sink gone"));
        assert!(!cell.fail("sink gone again"));
        assert_eq!(cell.get(), Failed);
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let (cell, _rx) = cell();
        let mut watch = cell.watch();
        cell.transition(Draining, None).unwrap();
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow(), Draining);
    }
}
