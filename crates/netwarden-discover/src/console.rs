//! Operator console: the authenticated surface over the monitor.
//!
//! Every operation resolves the caller's credential first. Observers may
//! read; only admins may change device or scanner state, and a rejected
//! call never touches the store or the audit log.

use std::sync::Arc;

use netwarden_audit::{AuditLog, AuditQuery, AuditRecord};
use netwarden_core::types::staleness_threshold;
use netwarden_core::{
    AuditEvent, Clock, Device, EventKind, HardwareId, NetwardenError, NetworkStatus, Principal,
};
use netwarden_store::DeviceStore;

use crate::identity::IdentityProvider;
use crate::reconcile::ReconcileSummary;
use crate::scanner::{ScanStatus, ScannerLoop, StartOutcome, StopOutcome};
use crate::status::StatusAggregator;

type Result<T> = std::result::Result<T, NetwardenError>;

pub struct Console {
    store: Arc<dyn DeviceStore>,
    audit: Arc<dyn AuditLog>,
    scanner: Arc<ScannerLoop>,
    status: StatusAggregator,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
}

impl Console {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        audit: Arc<dyn AuditLog>,
        scanner: Arc<ScannerLoop>,
        status: StatusAggregator,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            scanner,
            status,
            identity,
            clock,
        }
    }

    fn principal(&self, credential: Option<&str>) -> Result<Principal> {
        self.identity.authenticate(credential)
    }

    fn require_admin(&self, credential: Option<&str>, action: &str) -> Result<Principal> {
        let principal = self.principal(credential)?;
        if !principal.can_mutate() {
            tracing::warn!(username = %principal.username, action, "Rejected operator action");
            return Err(NetwardenError::Unauthorized {
                username: principal.username,
                action: action.to_string(),
            });
        }
        Ok(principal)
    }

    // ── Scanner ───────────────────────────────────────────────────

    pub async fn start_scan(&self, credential: Option<&str>) -> Result<StartOutcome> {
        let principal = self.require_admin(credential, "start scanning")?;
        let outcome = self.scanner.start().await;
        tracing::info!(username = %principal.username, outcome = ?outcome, "Start scan requested");
        Ok(outcome)
    }

    pub async fn stop_scan(&self, credential: Option<&str>) -> Result<StopOutcome> {
        let principal = self.require_admin(credential, "stop scanning")?;
        let outcome = self.scanner.stop().await;
        tracing::info!(username = %principal.username, outcome = ?outcome, "Stop scan requested");
        Ok(outcome)
    }

    pub fn scan_status(&self, credential: Option<&str>) -> Result<ScanStatus> {
        self.principal(credential)?;
        Ok(self.scanner.status())
    }

    /// Run one sweep right now, outside the loop schedule.
    pub async fn sweep_now(&self, credential: Option<&str>) -> Result<ReconcileSummary> {
        self.require_admin(credential, "run a sweep")?;
        Ok(self.scanner.sweeper().run_sweep().await?)
    }

    // ── Devices ───────────────────────────────────────────────────

    /// Devices currently inside the presence window.
    pub async fn list_devices(&self, credential: Option<&str>) -> Result<Vec<Device>> {
        self.principal(credential)?;
        let now = self.clock.now();
        Ok(self.store.list_within(staleness_threshold(), now).await?)
    }

    /// Every device ever seen.
    pub async fn list_history(&self, credential: Option<&str>) -> Result<Vec<Device>> {
        self.principal(credential)?;
        Ok(self.store.list_all().await?)
    }

    pub async fn network_status(&self, credential: Option<&str>) -> Result<NetworkStatus> {
        self.principal(credential)?;
        Ok(self.status.status().await?)
    }

    /// Authorize or revoke a device. Every call appends an event, even when
    /// the flag already had the requested value.
    pub async fn set_authorized(
        &self,
        credential: Option<&str>,
        hardware_id: &str,
        value: bool,
    ) -> Result<Device> {
        let action = if value { "authorize devices" } else { "revoke devices" };
        let principal = self.require_admin(credential, action)?;
        let id = HardwareId::parse(hardware_id)?;

        let device = self.store.set_authorized(&id, value).await?;
        let (kind, details) = if value {
            (EventKind::Authorize, "Device authorized")
        } else {
            (EventKind::Revoke, "Device unauthorized")
        };
        self.audit.append(AuditEvent::for_device(
            kind,
            &device,
            details,
            self.clock.now(),
        ))?;

        tracing::info!(
            hardware_id = %id,
            authorized = value,
            username = %principal.username,
            "Device authorization updated"
        );

        // Re-signal the indicator; the mutation already succeeded.
        if let Err(e) = self.status.status().await {
            tracing::warn!(error = %e, "Status refresh after authorization failed");
        }

        Ok(device)
    }

    /// Rename a device. Renaming to the current name changes nothing and
    /// records nothing.
    pub async fn rename(
        &self,
        credential: Option<&str>,
        hardware_id: &str,
        new_name: &str,
    ) -> Result<Device> {
        let principal = self.require_admin(credential, "rename devices")?;
        let id = HardwareId::parse(hardware_id)?;
        let name = new_name.trim();
        if name.is_empty() {
            return Err(NetwardenError::InvalidInput(
                "device name must not be empty".to_string(),
            ));
        }

        let current = self
            .store
            .get(&id)
            .await?
            .ok_or_else(|| NetwardenError::NotFound {
                hardware_id: id.to_string(),
            })?;
        if current.display_name == name {
            return Ok(current);
        }

        let renamed = self.store.set_name(&id, name).await?;
        let details = format!(
            "Device name changed from '{}' to '{}'",
            renamed.previous_name, name
        );
        self.audit.append(AuditEvent::for_device(
            EventKind::NameChange,
            &renamed.device,
            details,
            self.clock.now(),
        ))?;

        tracing::info!(
            hardware_id = %id,
            previous = %renamed.previous_name,
            name,
            username = %principal.username,
            "Device renamed"
        );
        Ok(renamed.device)
    }

    // ── Audit ─────────────────────────────────────────────────────

    pub fn audit_log(&self, credential: Option<&str>, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        self.principal(credential)?;
        Ok(self.audit.query(query)?)
    }

    /// Verify the hash chain, returning the number of records checked.
    pub fn verify_audit(&self, credential: Option<&str>) -> Result<u64> {
        self.principal(credential)?;
        Ok(self.audit.verify_chain()?)
    }
}
