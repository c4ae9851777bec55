//! Host pool / load balancer
//!
//! A fixed roster of execution hosts, each with a live request counter.
//! `choose` picks the least-loaded online host, `offline` demotes a host
//! that failed to answer and `recover` brings every offline host back.
//!
//! The online/offline lists sit behind one pool-wide mutex. Load counters
//! are atomics on the hosts themselves so that dispatches never take the
//! pool lock just to count.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::PoolError;

/// One execution host
#[derive(Debug)]
pub struct Host {
    id: usize,
    address: String,
    port: u16,
    load: AtomicU64,
}

impl Host {
    fn new(id: usize, address: String, port: u16) -> Self {
        Self {
            id,
            address,
            port,
            load: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn load(&self) -> u64 {
        self.load.load(Ordering::SeqCst)
    }

    /// Count one in-flight request until the guard is dropped
    pub fn acquire(self: &Arc<Self>) -> LoadGuard {
        self.load.fetch_add(1, Ordering::SeqCst);
        LoadGuard {
            host: Arc::clone(self),
        }
    }

    fn release(&self) {
        // offline() may have reset the counter while a request was in flight
        let _ = self
            .load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Decrements the host's load counter on drop
#[derive(Debug)]
pub struct LoadGuard {
    host: Arc<Host>,
}

impl LoadGuard {
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.host.release();
    }
}

#[derive(Debug, Default)]
struct PoolState {
    online: Vec<usize>,
    offline: Vec<usize>,
}

#[derive(Debug)]
pub struct HostPool {
    hosts: Vec<Arc<Host>>,
    state: Mutex<PoolState>,
}

/// Point-in-time view of the pool for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub online: Vec<usize>,
    pub offline: Vec<usize>,
    pub hosts: Vec<HostSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub id: usize,
    pub address: String,
    pub port: u16,
    pub load: u64,
}

impl HostPool {
    /// Build a pool from `(address, port)` pairs; all hosts start online
    /// with zero load, in the given order.
    pub fn new(hosts: Vec<(String, u16)>) -> Result<Self, PoolError> {
        if hosts.is_empty() {
            return Err(PoolError::Config("no execution hosts configured".to_string()));
        }
        let hosts: Vec<Arc<Host>> = hosts
            .into_iter()
            .enumerate()
            .map(|(id, (address, port))| Arc::new(Host::new(id, address, port)))
            .collect();
        let state = PoolState {
            online: (0..hosts.len()).collect(),
            offline: Vec::new(),
        };
        Ok(Self {
            hosts,
            state: Mutex::new(state),
        })
    }

    /// Parse a host list: one `address:port` per line. Blank lines and `#`
    /// comments are ignored, malformed lines are skipped with a warning.
    pub fn parse(config: &str) -> Result<Self, PoolError> {
        let mut hosts = Vec::new();
        for (lineno, line) in config.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_host(line) {
                Some(host) => hosts.push(host),
                None => warn!("Skipping malformed host entry on line {}: {:?}", lineno + 1, line),
            }
        }
        Self::new(hosts)
    }

    pub fn load(path: &Path) -> Result<Self, PoolError> {
        let config = fs::read_to_string(path).map_err(|source| PoolError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let pool = Self::parse(&config)?;
        info!("Loaded {} execution hosts from {:?}", pool.len(), path);
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn host(&self, id: usize) -> Option<&Arc<Host>> {
        self.hosts.get(id)
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Least-loaded online host; ties go to the earliest online position
    pub fn choose(&self) -> Result<Arc<Host>, PoolError> {
        let state = self.state();
        let mut best: Option<&Arc<Host>> = None;
        for &id in &state.online {
            let host = &self.hosts[id];
            if best.map_or(true, |b| host.load() < b.load()) {
                best = Some(host);
            }
        }
        best.cloned().ok_or(PoolError::Unavailable)
    }

    /// Demote a host; a no-op if it is already offline
    pub fn offline(&self, id: usize) {
        let mut state = self.state();
        let Some(pos) = state.online.iter().position(|&h| h == id) else {
            return;
        };
        state.online.remove(pos);
        state.offline.push(id);
        if let Some(host) = self.hosts.get(id) {
            host.load.store(0, Ordering::SeqCst);
            warn!("Execution host {} ({}) marked offline", id, host);
        }
    }

    /// Move every offline host back online, preserving their order.
    /// Returns the number of recovered hosts.
    pub fn recover(&self) -> usize {
        let mut state = self.state();
        let recovered = std::mem::take(&mut state.offline);
        let count = recovered.len();
        state.online.extend(recovered);
        if count > 0 {
            warn!("Recovered {} execution hosts", count);
        }
        count
    }

    pub fn online(&self) -> Vec<usize> {
        self.state().online.clone()
    }

    pub fn offline_ids(&self) -> Vec<usize> {
        self.state().offline.clone()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state();
        PoolSnapshot {
            online: state.online.clone(),
            offline: state.offline.clone(),
            hosts: self
                .hosts
                .iter()
                .map(|h| HostSnapshot {
                    id: h.id,
                    address: h.address.clone(),
                    port: h.port,
                    load: h.load(),
                })
                .collect(),
        }
    }
}

fn parse_host(line: &str) -> Option<(String, u16)> {
    let (address, port) = line.rsplit_once(':')?;
    let address = address.trim();
    if address.is_empty() || address.contains(char::is_whitespace) {
        return None;
    }
    let port = port.trim().parse::<u16>().ok().filter(|&p| p != 0)?;
    Some((address.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> HostPool {
        HostPool::new(
            (0..n)
                .map(|i| ("10.0.0.1".to_string(), 9000 + i as u16))
                .collect(),
        )
        .unwrap()
    }

    fn set_load(pool: &HostPool, id: usize, load: u64) {
        pool.host(id).unwrap().load.store(load, Ordering::SeqCst);
    }

    #[test]
    fn test_choose_least_loaded_first_found() {
        let pool = pool(4);
        for (id, load) in [3, 1, 4, 1].into_iter().enumerate() {
            set_load(&pool, id, load);
        }
        assert_eq!(pool.choose().unwrap().id(), 1);
    }

    #[test]
    fn test_choose_skips_offline_hosts() {
        let pool = pool(3);
        set_load(&pool, 0, 5);
        set_load(&pool, 1, 0);
        set_load(&pool, 2, 2);
        pool.offline(1);
        assert_eq!(pool.choose().unwrap().id(), 2);
    }

    #[test]
    fn test_choose_empty_online_is_unavailable() {
        let pool = pool(2);
        pool.offline(0);
        pool.offline(1);
        assert!(matches!(pool.choose(), Err(PoolError::Unavailable)));
    }

    #[test]
    fn test_offline_is_idempotent_and_resets_load() {
        let pool = pool(3);
        set_load(&pool, 2, 7);
        pool.offline(2);
        let before = pool.snapshot();
        pool.offline(2);
        assert_eq!(pool.snapshot(), before);
        assert_eq!(before.online, vec![0, 1]);
        assert_eq!(before.offline, vec![2]);
        assert_eq!(pool.host(2).unwrap().load(), 0);
    }

    #[test]
    fn test_recover_appends_in_order() {
        let pool = pool(4);
        pool.offline(2);
        pool.offline(0);
        assert_eq!(pool.recover(), 2);
        assert_eq!(pool.online(), vec![1, 3, 2, 0]);
        assert!(pool.offline_ids().is_empty());

        let before = pool.snapshot();
        assert_eq!(pool.recover(), 0);
        assert_eq!(pool.snapshot(), before);
    }

    #[test]
    fn test_every_host_in_exactly_one_list() {
        let pool = pool(5);
        pool.offline(1);
        pool.offline(4);
        pool.offline(1);
        pool.recover();
        pool.offline(3);
        let mut all: Vec<usize> = pool.online();
        all.extend(pool.offline_ids());
        all.sort();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_load_guard_restores_counter() {
        let pool = pool(1);
        let host = pool.choose().unwrap();
        {
            let _a = host.acquire();
            let _b = host.acquire();
            assert_eq!(host.load(), 2);
        }
        assert_eq!(host.load(), 0);
    }

    #[test]
    fn test_guard_after_offline_does_not_underflow() {
        let pool = pool(1);
        let host = pool.choose().unwrap();
        let guard = host.acquire();
        pool.offline(0);
        drop(guard);
        assert_eq!(host.load(), 0);
    }

    #[test]
    fn test_parse_skips_comments_and_malformed_lines() {
        let pool = HostPool::parse(
            "# execution hosts\n127.0.0.1:8081\n\nnot-a-host\nexec-2.local:8082\nbad:port\n10.0.0.3:0\n",
        )
        .unwrap();
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.hosts.len(), 2);
        assert_eq!(snapshot.hosts[0].address, "127.0.0.1");
        assert_eq!(snapshot.hosts[0].port, 8081);
        assert_eq!(snapshot.hosts[1].address, "exec-2.local");
        assert_eq!(snapshot.online, vec![0, 1]);
    }

    #[test]
    fn test_parse_all_malformed_is_fatal() {
        assert!(matches!(
            HostPool::parse("nothing here\n:80\n"),
            Err(PoolError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = HostPool::load(Path::new("/nonexistent/service_machine.conf")).unwrap_err();
        assert!(matches!(err, PoolError::Io { .. }));
    }

    #[test]
    fn test_concurrent_guards_balance_out() {
        let pool = Arc::new(pool(3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let host = pool.choose().unwrap();
                        let _guard = host.acquire();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.snapshot().hosts.iter().all(|h| h.load == 0));
    }
}
