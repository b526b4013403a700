//! Named pool instances.

use crate::error::{CoreError, CoreResult};
use crate::pool::broker_pool::BrokerPool;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Running pools by instance name.
///
/// `configure` starts an instance once; later calls with the same name get
/// the running one back until it is stopped. A registry is an ordinary value:
/// a process wanting one shared registry keeps it wherever it keeps its
/// other application state.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: Mutex<BTreeMap<String, BrokerPool>>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the running pool called `name`, starting it with `open` if
    /// there is none. A pool that was shut down behind the registry's back
    /// is replaced.
    ///
    /// # Errors
    ///
    /// Returns whatever `open` returns, or `Configuration` if the opened
    /// pool reports a different name.
    pub fn configure<F>(&self, name: &str, open: F) -> CoreResult<BrokerPool>
    where
        F: FnOnce() -> CoreResult<BrokerPool>,
    {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(name) {
            if !pool.is_shut_down() {
                debug!(instance = name, "pool already running");
                return Ok(pool.clone());
            }
        }
        let pool = open()?;
        if pool.name() != name {
            if let Err(e) = pool.shutdown(true) {
                warn!(instance = pool.name(), error = %e, "shutdown of misnamed pool failed");
            }
            return Err(CoreError::configuration(format!(
                "pool opened as '{}' cannot be registered as '{name}'",
                pool.name()
            )));
        }
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    /// The running pool called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<BrokerPool> {
        self.pools
            .lock()
            .get(name)
            .filter(|p| !p.is_shut_down())
            .cloned()
    }

    /// Whether a running pool is registered under `name`.
    #[must_use]
    pub fn is_configured(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of the registered pools.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }

    /// Shuts down and unregisters `name`. Returns false if no such pool
    /// was registered.
    ///
    /// # Errors
    ///
    /// Returns the shutdown error; the pool is unregistered regardless.
    pub fn stop(&self, name: &str, force: bool) -> CoreResult<bool> {
        let Some(pool) = self.pools.lock().remove(name) else {
            return Ok(false);
        };
        pool.shutdown(force)?;
        Ok(true)
    }

    /// Shuts down every registered pool.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown error after attempting all of them.
    pub fn stop_all(&self, force: bool) -> CoreResult<()> {
        let pools: Vec<BrokerPool> = std::mem::take(&mut *self.pools.lock()).into_values().collect();
        let mut first_error = None;
        for pool in pools {
            if let Err(e) = pool.shutdown(force) {
                warn!(instance = pool.name(), error = %e, "shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use arbor_storage::InMemoryBackend;

    fn open(name: &str) -> CoreResult<BrokerPool> {
        BrokerPool::open_with_backends(
            Config::new().instance_name(name),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    #[test]
    fn configure_is_idempotent() {
        let registry = PoolRegistry::new();
        let first = registry.configure("main", || open("main")).unwrap();
        let second = registry
            .configure("main", || panic!("must not open twice"))
            .unwrap();
        assert!(first.same_instance(&second));
        assert!(registry.is_configured("main"));
    }

    #[test]
    fn stop_allows_restart() {
        let registry = PoolRegistry::new();
        let first = registry.configure("main", || open("main")).unwrap();
        assert!(registry.stop("main", false).unwrap());
        assert!(first.is_shut_down());
        assert!(!registry.stop("main", false).unwrap());

        let second = registry.configure("main", || open("main")).unwrap();
        assert!(!first.same_instance(&second));
    }

    #[test]
    fn stop_all_shuts_everything_down() {
        let registry = PoolRegistry::new();
        let a = registry.configure("a", || open("a")).unwrap();
        let b = registry.configure("b", || open("b")).unwrap();
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        registry.stop_all(true).unwrap();
        assert!(a.is_shut_down() && b.is_shut_down());
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn misnamed_pool_is_rejected() {
        let registry = PoolRegistry::new();
        assert!(matches!(
            registry.configure("main", || open("other")),
            Err(CoreError::Configuration { .. })
        ));
        assert!(!registry.is_configured("main"));
    }
}
