//! Hosting for bus components.
//!
//! [`MessageBusService`] owns a set of [`MessageBus`] components and drives
//! them through one start/stop cycle, the way a supervisor would.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{MessageBus, Result};

/// Starts components in registration order, stops them in reverse.
#[derive(Default)]
pub struct MessageBusService {
    buses: Vec<Arc<dyn MessageBus>>,
}

impl MessageBusService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bus: Arc<dyn MessageBus>) -> &mut Self {
        self.buses.push(bus);
        self
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    /// Start every component. On failure the components already started are
    /// stopped again, in reverse order, and the error is returned.
    pub async fn start_async(&self, cancel: CancellationToken) -> Result<()> {
        for (index, bus) in self.buses.iter().enumerate() {
            if let Err(e) = bus.start_async(cancel.clone()).await {
                error!(bus = bus.name(), error = %e, "Failed to start bus");
                for started in self.buses[..index].iter().rev() {
                    if let Err(stop_err) = started.stop_async(CancellationToken::new()).await {
                        warn!(bus = started.name(), error = %stop_err, "Rollback stop failed");
                    }
                }
                return Err(e);
            }
            info!(bus = bus.name(), "Bus started");
        }
        Ok(())
    }

    /// Stop every component. Every component is attempted; the first error
    /// is returned.
    pub async fn stop_async(&self, cancel: CancellationToken) -> Result<()> {
        let mut first_error = None;
        for bus in self.buses.iter().rev() {
            match bus.stop_async(cancel.clone()).await {
                Ok(()) => info!(bus = bus.name(), "Bus stopped"),
                Err(e) => {
                    warn!(bus = bus.name(), error = %e, "Failed to stop bus");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn dispose(&self) {
        for bus in self.buses.iter().rev() {
            bus.dispose();
        }
    }

    /// Start, wait for `shutdown` or `cancel`, then stop.
    pub async fn run_until<F>(&self, shutdown: F, cancel: CancellationToken) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start_async(cancel.clone()).await?;
        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = cancel.cancelled() => info!("Host cancelled"),
        }
        self.stop_async(CancellationToken::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        fail_start: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_start: false,
                log: log.clone(),
            })
        }

        fn failing(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_start: true,
                log: log.clone(),
            })
        }
    }

    #[async_trait]
    impl MessageBus for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start_async(&self, cancel: CancellationToken) -> Result<()> {
            crate::bus::check_cancelled(&cancel)?;
            if self.fail_start {
                return Err(BusError::Disposed("recorder"));
            }
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop_async(&self, _cancel: CancellationToken) -> Result<()> {
            self.log.lock().push(format!("stop {}", self.name));
            Ok(())
        }

        fn dispose(&self) {
            self.log.lock().push(format!("dispose {}", self.name));
        }
    }

    #[tokio::test]
    async fn test_start_in_order_stop_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = MessageBusService::new();
        service
            .add(Recorder::new("relay", &log))
            .add(Recorder::new("publisher", &log));

        service.start_async(CancellationToken::new()).await.unwrap();
        service.stop_async(CancellationToken::new()).await.unwrap();
        service.dispose();

        assert_eq!(
            *log.lock(),
            vec![
                "start relay",
                "start publisher",
                "stop publisher",
                "stop relay",
                "dispose publisher",
                "dispose relay",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = MessageBusService::new();
        service
            .add(Recorder::new("a", &log))
            .add(Recorder::new("b", &log))
            .add(Recorder::failing("c", &log));

        let err = service.start_async(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BusError::Disposed(_)));
        assert_eq!(*log.lock(), vec!["start a", "start b", "stop b", "stop a"]);
    }

    #[tokio::test]
    async fn test_cancelled_start() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = MessageBusService::new();
        service.add(Recorder::new("a", &log));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            service.start_async(cancel).await,
            Err(BusError::Cancelled)
        ));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = MessageBusService::new();
        service.add(Recorder::new("relay", &log));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let run = service.run_until(
            async {
                let _ = rx.await;
            },
            CancellationToken::new(),
        );
        let trigger = async {
            tokio::task::yield_now().await;
            let _ = tx.send(());
        };
        let (result, ()) = tokio::join!(run, trigger);

        result.unwrap();
        assert_eq!(*log.lock(), vec!["start relay", "stop relay"]);
    }

    #[tokio::test]
    async fn test_run_until_cancel_still_stops() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = MessageBusService::new();
        service.add(Recorder::new("relay", &log));
        let cancel = CancellationToken::new();

        let run = service.run_until(futures::future::pending::<()>(), cancel.clone());
        let trigger = async {
            tokio::task::yield_now().await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, trigger);

        result.unwrap();
        assert_eq!(*log.lock(), vec!["start relay", "stop relay"]);
    }
}
