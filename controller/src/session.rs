//! Broker session bookkeeping shared by the receive side and the control loop.
//!
//! The receive side only records that a session came up or went away. Subscribing
//! and announcing `online` happen on the control side, which never holds a
//! broker event while it calls into the client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionFlags {
    connected: AtomicBool,
    established: AtomicU64,
}

impl SessionFlags {
    pub fn mark_connected(&self) {
        self.established.fetch_add(1, Ordering::AcqRel);
        self.connected.store(true, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// `true` once for every session established after `announced`, which the
    /// caller keeps and hands back. Reset it to 0 to retry a failed announcement.
    pub fn claim_announcement(&self, announced: &mut u64) -> bool {
        if !self.is_connected() {
            return false;
        }

        let established = self.established.load(Ordering::Acquire);
        if established == *announced {
            return false;
        }

        *announced = established;
        true
    }
}
