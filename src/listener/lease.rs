//! # Lease Manager
//!
//! Acquire, heartbeat and release the lease of one contention domain.
//!
//! ## Protocol
//!
//! - **Acquire**: one atomic conditional write ([`LeaseStore::try_acquire`]). A new row
//!   records the caller's cursor; an expired or released row is adopted and its stored offset
//!   replaces the caller's cursor.
//! - **Renew**: heartbeat, push the expiry out by the lease duration and persist the cursor.
//! - **Release**: clear the expiry and keep the offset, so the next holder resumes from the
//!   last heartbeat.
//!
//! Every write is conditional on this session still holding the row. A session whose lease
//! expired and was taken over finds out on its next renew.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::clock::{checked_after, Clock};
use crate::error::{NotifierError, Result};
use crate::logging::log_lease_operation;
use crate::models::{Lease, LeaseClaim, LeaseDomain};
use crate::store::LeaseStore;

/// Lease handle of one consumer session
#[derive(Debug)]
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    domain: LeaseDomain,
    duration: ChronoDuration,
    session: Uuid,
    active: Option<Lease>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        domain: LeaseDomain,
        duration: Duration,
    ) -> Result<Self> {
        let duration = ChronoDuration::from_std(duration)
            .map_err(|e| NotifierError::invalid_argument(format!("lease duration out of range: {e}")))?;
        Ok(Self {
            store,
            clock,
            domain,
            duration,
            session: Uuid::new_v4(),
            active: None,
        })
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn domain(&self) -> &LeaseDomain {
        &self.domain
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.active.as_ref()
    }

    /// Try to take the domain's lease, returning the offset to resume from
    ///
    /// `None` means another session holds a live lease.
    #[instrument(skip(self), fields(domain = %self.domain, session = %self.session))]
    pub async fn acquire(&mut self, offset: i64) -> Result<Option<i64>> {
        if self.active.is_some() {
            return Err(NotifierError::logic("lease is already held by this session"));
        }
        let now = self.clock.now();
        let claim = LeaseClaim {
            now,
            expires_at: checked_after(now, self.duration)?,
            offset,
            holder: self.session,
        };

        let Some(lease) = self.store.try_acquire(&self.domain, &claim).await? else {
            warn!(domain = %self.domain, "Lease is held by another session");
            return Ok(None);
        };
        let resume_from = lease.offset;
        log_lease_operation(
            "acquire",
            &self.domain.to_string(),
            &self.session.to_string(),
            Some(resume_from),
            "acquired",
        );
        self.active = Some(lease);
        Ok(Some(resume_from))
    }

    /// Heartbeat the held lease and persist `offset`
    pub async fn renew(&mut self, offset: i64) -> Result<()> {
        let Some(lease) = self.active.as_mut() else {
            return Err(NotifierError::logic("cannot renew a lease that was never acquired"));
        };
        let now = self.clock.now();
        let mut renewed = lease.clone();
        renewed.lock_date = now;
        renewed.lock_expiry_date = Some(checked_after(now, self.duration)?);
        renewed.offset = offset;

        if !self.store.save_lease(&renewed).await? {
            self.active = None;
            warn!(domain = %self.domain, session = %self.session, "Lease was taken over by another session");
            return Err(NotifierError::locked(format!("{} (lease lost)", self.domain)));
        }
        debug!(domain = %self.domain, offset = offset, "Lease renewed");
        *lease = renewed;
        Ok(())
    }

    /// Make the lease available again, keeping its last persisted offset
    pub async fn release(&mut self) -> Result<()> {
        let Some(mut lease) = self.active.take() else {
            return Err(NotifierError::logic("cannot release without an active lease"));
        };
        lease.lock_expiry_date = None;

        if self.store.save_lease(&lease).await? {
            log_lease_operation(
                "release",
                &self.domain.to_string(),
                &self.session.to_string(),
                Some(lease.offset),
                "released",
            );
        } else {
            warn!(domain = %self.domain, session = %self.session, "Lease was already taken over; nothing to release");
        }
        Ok(())
    }
}
