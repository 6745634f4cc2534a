//! Scanner orchestrator — one capture driver per monitored address.
//!
//! Each driver's blocking `scan()` runs on its own thread from the runtime's
//! blocking pool. A supervisor task polls the outstanding scans once a
//! second, reports the ones that failed and forgets their drivers, so an
//! address whose driver died can simply be added again.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use tap_core::config::NetworkConfig;
use tap_services::{EventSink, PendingRegistry};

use crate::capture::{BackendFactory, CaptureError};
use crate::connection::ParserFactory;
use crate::driver::CaptureDriver;
use crate::linker::{AddressWatch, LinkStats, LinkerFactory};

/// How often finished scans are collected.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

struct ScanTask {
    target: IpAddr,
    driver: Arc<CaptureDriver>,
    handle: JoinHandle<Result<(), CaptureError>>,
}

struct Inner {
    drivers: DashMap<IpAddr, Arc<CaptureDriver>>,
    tasks: Mutex<Vec<ScanTask>>,
    backends: Arc<dyn BackendFactory>,
    parsers: Arc<dyn ParserFactory>,
    network: NetworkConfig,
    runtime: Handle,
    running: AtomicBool,
}

#[derive(Clone)]
pub struct Scanner {
    inner: Arc<Inner>,
}

/// [`AddressWatch`] handed to parsers. Holds the orchestrator weakly so
/// the parsers it owns do not keep it alive.
struct ScannerWatch(Weak<Inner>);

impl AddressWatch for ScannerWatch {
    fn watch(&self, ip: IpAddr) {
        if let Some(inner) = self.0.upgrade() {
            if let Err(e) = inner.add(ip) {
                tracing::warn!(%ip, error = %e, "failed to monitor address");
            }
        }
    }
}

impl Scanner {
    /// Build an orchestrator. `parsers` receives the handle through which
    /// connection parsers ask for more addresses to be monitored.
    pub fn new<F>(
        network: NetworkConfig,
        backends: Arc<dyn BackendFactory>,
        runtime: Handle,
        parsers: F,
    ) -> Self
    where
        F: FnOnce(Arc<dyn AddressWatch>) -> Arc<dyn ParserFactory>,
    {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let watch: Arc<dyn AddressWatch> = Arc::new(ScannerWatch(weak.clone()));
            Inner {
                drivers: DashMap::new(),
                tasks: Mutex::new(Vec::new()),
                backends,
                parsers: parsers(watch),
                network,
                runtime: runtime.clone(),
                running: AtomicBool::new(true),
            }
        });
        runtime.spawn(supervise(Arc::downgrade(&inner)));
        Self { inner }
    }

    /// Orchestrator whose connections run the session linker.
    pub fn with_linker(
        network: NetworkConfig,
        backends: Arc<dyn BackendFactory>,
        runtime: Handle,
        registry: PendingRegistry,
        sink: Arc<dyn EventSink>,
    ) -> (Self, Arc<LinkStats>) {
        let mut stats = None;
        let scanner = Self::new(network, backends, runtime, |watch| {
            let linker = LinkerFactory::new(registry, watch, sink);
            stats = Some(linker.stats());
            Arc::new(linker) as Arc<dyn ParserFactory>
        });
        (scanner, stats.unwrap_or_default())
    }

    /// Start monitoring `ip`. Idempotent: returns the existing driver if
    /// there is one.
    pub fn add(&self, ip: IpAddr) -> Result<Arc<CaptureDriver>, CaptureError> {
        self.inner.add(ip)
    }

    /// Stop monitoring `ip`. Returns false if it was not monitored.
    pub fn remove(&self, ip: IpAddr) -> bool {
        match self.inner.drivers.remove(&ip) {
            Some((_, driver)) => {
                tracing::info!(%ip, "scanner removed");
                driver.close();
                true
            }
            None => false,
        }
    }

    /// Close every driver and halt the orchestrator. Later `add`s fail.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let drivers: Vec<_> = self.inner.drivers.iter().map(|e| e.value().clone()).collect();
        self.inner.drivers.clear();
        for driver in drivers {
            driver.close();
        }
        tracing::info!("scanner stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn driver(&self, ip: IpAddr) -> Option<Arc<CaptureDriver>> {
        self.inner.drivers.get(&ip).map(|d| d.value().clone())
    }

    /// Monitored addresses, sorted.
    pub fn watched(&self) -> Vec<IpAddr> {
        let mut ips: Vec<_> = self.inner.drivers.iter().map(|e| *e.key()).collect();
        ips.sort();
        ips
    }

    /// Scans not yet collected by the supervisor.
    pub fn outstanding(&self) -> usize {
        self.inner.tasks().len()
    }
}

impl Inner {
    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<ScanTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, ip: IpAddr) -> Result<Arc<CaptureDriver>, CaptureError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(CaptureError::Closed);
        }

        match self.drivers.entry(ip) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                // stop() visits every shard after clearing `running`, so a
                // check made under the shard lock cannot miss it
                if !self.running.load(Ordering::Acquire) {
                    return Err(CaptureError::Closed);
                }
                let backend = self.backends.open(ip)?;
                let driver = Arc::new(CaptureDriver::new(
                    ip,
                    backend,
                    self.parsers.clone(),
                    &self.network,
                ));
                slot.insert(driver.clone());
                tracing::info!(%ip, "new scanner");

                let handle = {
                    let driver = driver.clone();
                    self.runtime.spawn_blocking(move || driver.scan())
                };
                self.tasks().push(ScanTask {
                    target: ip,
                    driver: driver.clone(),
                    handle,
                });
                Ok(driver)
            }
        }
    }

    /// Take the finished scans out of the outstanding set.
    fn finished(&self) -> Vec<ScanTask> {
        let mut tasks = self.tasks();
        let (done, pending): (Vec<_>, Vec<_>) =
            tasks.drain(..).partition(|task| task.handle.is_finished());
        *tasks = pending;
        done
    }
}

async fn supervise(inner: Weak<Inner>) {
    let mut interval = tokio::time::interval(SUPERVISE_INTERVAL);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };

        for task in inner.finished() {
            match task.handle.await {
                Ok(Ok(())) => tracing::debug!(ip = %task.target, "scan finished"),
                Ok(Err(e)) => tracing::error!(ip = %task.target, error = %e, "capture driver failed"),
                Err(e) => tracing::error!(ip = %task.target, error = %e, "capture driver panicked"),
            }
            if inner
                .drivers
                .remove_if(&task.target, |_, driver| Arc::ptr_eq(driver, &task.driver))
                .is_some()
            {
                tracing::info!(ip = %task.target, "scanner forgotten after exit");
            }
        }

        if !inner.running.load(Ordering::Acquire) && inner.tasks().is_empty() {
            tracing::debug!("supervisor exiting");
            return;
        }
    }
}
