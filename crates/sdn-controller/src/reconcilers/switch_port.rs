//! SwitchPort reconciler.
//!
//! Converges one switch interface towards its record. The pass computes the
//! diff against the last observed state, validates the whole diff (fetching
//! the VLAN table only when a VLAN is involved) and only then pushes the
//! fields in order. Maintenance and read-only mode stop the pass before any
//! device call and leave the port in the `blocked` phase.

use crate::context::Context;
use crate::diff::{switch_port_diff, PortChannelChange};
use async_trait::async_trait;
use sdn_common::resources::{PortPhase, SwitchPort};
use sdn_common::{kinds, naming, SdnError};
use sdn_reconcile::{mutate, Constraint, Reconciler, Requeue, TaskError, TaskResult};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct SwitchPortReconciler {
    ctx: Arc<Context>,
}

impl SwitchPortReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn set_phase(
        &self,
        key: &str,
        phase: PortPhase,
        pending: Vec<String>,
        message: Option<String>,
    ) -> TaskResult<()> {
        mutate(self.ctx.stores.switch_ports.as_ref(), key, |p: &mut SwitchPort| {
            p.status.phase = phase;
            p.status.pending = pending.clone();
            p.status.message = message.clone();
        })
        .await
        .map_err(SdnError::from)?;
        Ok(())
    }

    async fn fail(&self, key: &str, phase: PortPhase, err: SdnError) -> TaskError {
        self.ctx.warn(kinds::SWITCH_PORT, key, &err);
        if let Err(e) = self.set_phase(key, phase, Vec::new(), Some(err.to_string())).await {
            debug!(port = key, error = %e, "could not record failure in status");
        }
        err.into()
    }
}

#[async_trait]
impl Reconciler for SwitchPortReconciler {
    fn name(&self) -> &str {
        "switchport"
    }

    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
        let Some(record) = self
            .ctx
            .stores
            .switch_ports
            .get(key)
            .await
            .map_err(SdnError::from)?
        else {
            return Ok(Requeue::Never);
        };
        let port = record.value;
        let fqdn = port.spec.switch_fqdn.clone();

        if port.spec.is_unmaintained() {
            if port.status.phase != PortPhase::Unmaintained {
                self.set_phase(key, PortPhase::Unmaintained, Vec::new(), None).await?;
            }
            return Ok(Requeue::Resync);
        }

        if !port.status.has_observation() {
            debug!(port = key, "waiting for first observation");
            self.ctx.reporter.accelerate(&fqdn);
            return Ok(Requeue::Resync);
        }

        let diff = switch_port_diff(
            &port.spec,
            &port.status,
            self.ctx.settings.port_channels_enabled,
        );
        if diff.is_empty() {
            if port.status.phase != PortPhase::Converged || !port.status.pending.is_empty() {
                self.set_phase(key, PortPhase::Converged, Vec::new(), None).await?;
            }
            return Ok(Requeue::Resync);
        }

        let join = match diff.port_channel {
            Some(PortChannelChange::Join(id)) => Some(id),
            _ => None,
        };
        let spine = self
            .ctx
            .stores
            .spine_port_channel_for(&fqdn, &port.spec.name, join)
            .await
            .map_err(SdnError::from)?;
        if let Some(pc_key) = spine {
            let err = SdnError::validation(
                key,
                format!("port-channel {} faces a spine and is read-only", pc_key),
            );
            return Err(self.fail(key, PortPhase::Blocked, err).await);
        }

        if let Some(id) = join {
            let pc_key = naming::port_channel_name(id, &fqdn);
            let exists = self
                .ctx
                .stores
                .port_channels
                .get(&pc_key)
                .await
                .map_err(SdnError::from)?
                .is_some();
            if !exists {
                info!(port = key, port_channel = %pc_key, "waiting for port-channel record");
                self.ctx.events.warning(
                    kinds::SWITCH_PORT,
                    key,
                    "PortChannelNotFound",
                    format!("port-channel {} has no record yet", pc_key),
                );
                return Err(TaskError::waiting_for(Constraint::new(
                    kinds::PORT_CHANNEL,
                    pc_key,
                )));
            }
        }

        let switch = self.ctx.switch(&fqdn).await?;
        let pending: Vec<String> = diff.fields().iter().map(|f| f.to_string()).collect();
        if let Some(reason) = self.ctx.mutation_gate(&switch) {
            info!(port = key, reason, fields = ?pending, "device writes blocked");
            self.set_phase(
                key,
                PortPhase::Blocked,
                pending,
                Some(format!("pending changes blocked: {}", reason)),
            )
            .await?;
            return Ok(Requeue::Resync);
        }

        let client = self.ctx.access.client(&fqdn)?;

        let vlan_table = if diff.needs_vlan_table() {
            Some(client.get_vlans().await?)
        } else {
            None
        };
        if let Err(e) = diff.validate(key, &self.ctx.settings, vlan_table.as_deref()) {
            warn!(port = key, error = %e, "desired state rejected");
            return Err(self.fail(key, PortPhase::Syncing, e).await);
        }

        if let Err(e) = diff.apply(client.as_ref(), &port.spec.name).await {
            warn!(port = key, error = %e, "device update failed");
            return Err(self.fail(key, PortPhase::Syncing, e).await);
        }

        info!(port = key, fields = ?pending, "pushed switchport changes");
        self.ctx.events.normal(
            kinds::SWITCH_PORT,
            key,
            "Updated",
            format!("updated {}", pending.join(", ")),
        );
        self.set_phase(key, PortPhase::Syncing, Vec::new(), None).await?;
        self.ctx.reporter.accelerate(&fqdn);
        Ok(Requeue::Resync)
    }
}
