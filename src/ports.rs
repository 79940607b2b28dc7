// SPDX-License-Identifier: MIT
//! Deterministic per-project port allocation.
//!
//! A project hashes onto a stable offset in a fixed pool so restarts reuse
//! the same port. Before a port is handed out, anything still bound to it
//! (a prior run, an orphaned dev server) is forcibly terminated and the
//! port re-probed with a real bind test. Allocation never fails: exhausting
//! the pool falls back to a random high port with a small residual
//! collision risk.

use rand::Rng;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PortAllocator {
    base_port: u16,
    pool_size: u16,
}

impl PortAllocator {
    pub fn new(base_port: u16, pool_size: u16) -> Self {
        Self {
            base_port,
            pool_size: pool_size.max(1),
        }
    }

    /// The pool port a project id deterministically maps onto, before any
    /// collision handling.
    pub fn preferred_port(&self, project_id: &str) -> u16 {
        let offset = stable_hash(project_id) % u32::from(self.pool_size);
        self.base_port.wrapping_add(offset as u16)
    }

    /// Assign a port for the project: free and claim the preferred port,
    /// then walk the rest of the pool, then fall back to a random high port.
    pub async fn assign(&self, project_id: &str) -> u16 {
        let target = self.preferred_port(project_id);
        if force_free(target).await {
            debug!(project = project_id, port = target, "assigned preferred port");
            return target;
        }

        // Something unkillable (a system process, another user) holds the
        // preferred port; walk the remaining pool offsets in order.
        warn!(project = project_id, port = target, "preferred port unavailable, walking pool");
        for i in 1..self.pool_size {
            let candidate = self.pool_candidate(target, i);
            if force_free(candidate).await {
                info!(project = project_id, port = candidate, "assigned alternate pool port");
                return candidate;
            }
        }

        let random = rand::thread_rng().gen_range(20000..30000);
        warn!(project = project_id, port = random, "pool exhausted, using random port");
        random
    }

    /// The `i`-th alternative pool port after `target`, wrapping within the
    /// pool. All arithmetic wraps so a base near the top of the u16 range
    /// stays well-defined.
    fn pool_candidate(&self, target: u16, i: u16) -> u16 {
        let offset = (target.wrapping_sub(self.base_port).wrapping_add(i)) % self.pool_size;
        self.base_port.wrapping_add(offset)
    }

    /// Release a previously assigned port. The allocator keeps no state of
    /// its own, so this force-frees whatever is still bound to it.
    pub async fn release(&self, port: u16) {
        if !force_free(port).await {
            warn!(port, "port still busy after release");
        }
    }
}

/// JS-style 32-bit string hash (`h = h*31 + c`), kept stable so existing
/// project directories keep mapping onto the same ports.
fn stable_hash(s: &str) -> u32 {
    let mut hash: i32 = 0;
    for c in s.chars() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(c as i32);
    }
    hash.unsigned_abs()
}

/// Try to make `port` bindable: probe, kill any owners, re-probe.
/// Returns true when the port is free afterwards.
pub async fn force_free(port: u16) -> bool {
    if bindable(port) {
        return true;
    }
    let killed = kill_port_owners(port).await;
    if killed > 0 {
        // Give the OS a moment to tear the sockets down.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    bindable(port)
}

/// Real bind test: open a listener on 127.0.0.1 and drop it. Holding the
/// socket for the probe closes the check-then-spawn gap far enough for a
/// single-operator daemon; the dev server re-binds right after.
fn bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Kill every process bound to `port` (SIGKILL). Returns how many were
/// signalled. The actual OS release happens when those processes exit.
#[cfg(unix)]
pub async fn kill_port_owners(port: u16) -> usize {
    let output = tokio::process::Command::new("lsof")
        .arg("-ti")
        .arg(format!(":{port}"))
        .output()
        .await;
    let Ok(output) = output else {
        return 0;
    };
    let mut killed = 0;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Ok(pid) = line.trim().parse::<i32>() {
            info!(port, pid, "killing process holding preview port");
            // The process may have exited between lsof and here; ignore.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
            killed += 1;
        }
    }
    killed
}

#[cfg(not(unix))]
pub async fn kill_port_owners(_port: u16) -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_calls() {
        assert_eq!(stable_hash("proj_abc_123"), stable_hash("proj_abc_123"));
        assert_ne!(stable_hash("proj_a"), stable_hash("proj_b"));
    }

    #[test]
    fn preferred_port_lands_in_pool() {
        let alloc = PortAllocator::new(5173, 100);
        for id in ["proj_a", "proj_b", "proj_longer_identifier"] {
            let port = alloc.preferred_port(id);
            assert!((5173..5273).contains(&port), "port {port} outside pool");
        }
    }

    #[tokio::test]
    async fn repeated_assign_is_deterministic_on_free_pool() {
        // High base well away from common dev servers so the pool is free.
        let alloc = PortAllocator::new(42650, 50);
        let first = alloc.assign("proj_fixed").await;
        let second = alloc.assign("proj_fixed").await;
        assert_eq!(first, second);
        assert_eq!(first, alloc.preferred_port("proj_fixed"));
    }

    #[test]
    fn pool_walk_wraps_around() {
        let alloc = PortAllocator::new(42750, 10);
        let preferred = alloc.preferred_port("proj_walk");
        // The walk formula must visit every other pool port exactly once.
        let mut seen = std::collections::HashSet::new();
        for i in 1..10u16 {
            seen.insert(alloc.pool_candidate(preferred, i));
        }
        assert_eq!(seen.len(), 9);
        assert!(!seen.contains(&preferred));
    }

    #[test]
    fn pool_walk_near_u16_max_does_not_overflow() {
        // Pool 65530..=65535 wrapping into 0..=3.
        let alloc = PortAllocator::new(65530, 10);
        let preferred = alloc.preferred_port("proj_high");
        let mut seen = std::collections::HashSet::new();
        for i in 1..10u16 {
            let candidate = alloc.pool_candidate(preferred, i);
            assert!(
                candidate >= 65530 || candidate <= 3,
                "candidate {candidate} outside wrapped pool"
            );
            seen.insert(candidate);
        }
        assert_eq!(seen.len(), 9);
        assert!(!seen.contains(&preferred));
    }
}
