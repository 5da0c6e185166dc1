//! Simulated Kerberos KDC
//!
//! Issues tickets with a fixed lifetime measured on the injected clock.
//! While paused, every `kinit` fails the way an unreachable KDC does.

use crate::harness::clock::SharedClock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Service ticket held by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// Full principal, `user@REALM`
    pub principal: String,
    pub issued_at: Duration,
    pub expires_at: Duration,
}

impl Ticket {
    pub fn is_valid_at(&self, now: Duration) -> bool {
        now < self.expires_at
    }
}

pub struct SimulatedKdc {
    realm: String,
    lifetime: Duration,
    clock: SharedClock,
    principals: Mutex<HashSet<String>>,
    running: AtomicBool,
    paused: AtomicBool,
}

impl SimulatedKdc {
    pub fn new(realm: &str, lifetime: Duration, clock: SharedClock) -> Self {
        Self {
            realm: realm.to_string(),
            lifetime,
            clock,
            principals: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Start serving and register the given short principal names
    pub fn start(&self, principals: &[String]) {
        let mut registered = self.principals.lock().unwrap_or_else(|e| e.into_inner());
        for name in principals {
            registered.insert(self.qualify(name));
        }
        log::debug!("KDC {} registered {} principals", self.realm, registered.len());
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
    }

    /// `user` → `user@REALM`; already qualified names are kept
    pub fn qualify(&self, principal: &str) -> String {
        if principal.contains('@') {
            principal.to_string()
        } else {
            format!("{}@{}", principal, self.realm)
        }
    }

    /// Obtain a fresh ticket for `principal`
    pub fn kinit(&self, principal: &str) -> Result<Ticket, String> {
        if !self.is_reachable() {
            return Err(format!(
                "Cannot contact any KDC for realm '{}' while getting initial credentials",
                self.realm
            ));
        }

        let principal = self.qualify(principal);
        let known = self
            .principals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&principal);
        if !known {
            return Err(format!(
                "Client '{}' not found in Kerberos database while getting initial credentials",
                principal
            ));
        }

        let now = self.clock.now();
        Ok(Ticket {
            principal,
            issued_at: now,
            expires_at: now + self.lifetime,
        })
    }

    /// Accept or reject a ticket presented to a service
    pub fn verify(&self, ticket: &Ticket) -> Result<(), String> {
        if ticket.is_valid_at(self.clock.now()) {
            Ok(())
        } else {
            Err(format!(
                "GSS initiate failed: ticket for {} expired",
                ticket.principal
            ))
        }
    }
}
