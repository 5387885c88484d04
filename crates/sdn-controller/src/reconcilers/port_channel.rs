//! PortChannel reconciler.
//!
//! Creates requested port-channels, converges their switchport fields and
//! deletes them only when the record asks for it explicitly. Spine-facing
//! port-channels are observed but never changed.

use crate::context::Context;
use crate::diff::port_channel_diff;
use async_trait::async_trait;
use sdn_common::resources::{PortChannel, PortPhase};
use sdn_common::{kinds, SdnError, SdnResult};
use sdn_reconcile::{mutate, Reconciler, Requeue, TaskError, TaskResult};
use sdn_switch_client::SwitchClient;
use sdn_types::Managed;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct PortChannelReconciler {
    ctx: Arc<Context>,
}

impl PortChannelReconciler {
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
        mutate(self.ctx.stores.port_channels.as_ref(), key, |pc: &mut PortChannel| {
            pc.status.phase = phase;
            pc.status.pending = pending.clone();
            pc.status.message = message.clone();
        })
        .await
        .map_err(SdnError::from)?;
        Ok(())
    }

    fn reject(&self, key: &str, err: SdnError) -> TaskError {
        warn!(port_channel = key, error = %err, "port-channel change rejected");
        self.ctx.warn(kinds::PORT_CHANNEL, key, &err);
        err.into()
    }

    /// Removes members, then the port-channel, rolling back on failure.
    async fn delete_on_device(&self, client: &dyn SwitchClient, pc: &PortChannel) -> SdnResult<()> {
        let checkpoint = format!("pre-delete-po{}", pc.spec.id);
        client.save_config(&checkpoint).await?;

        let result: SdnResult<()> = async {
            for member in &pc.status.members {
                client.remove_from_port_channel(member).await?;
            }
            match client.delete_port_channel(pc.spec.id).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        }
        .await;

        if let Err(e) = result {
            warn!(port_channel = pc.key(), error = %e, "delete failed, restoring checkpoint");
            if let Err(restore) = client.restore_config(&checkpoint).await {
                warn!(port_channel = pc.key(), error = %restore, "checkpoint restore failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str, pc: &PortChannel) -> TaskResult<Requeue> {
        let fqdn = &pc.spec.switch_fqdn;
        if pc.is_spine() {
            return Err(self.reject(
                key,
                SdnError::validation(key, "spine port-channels are never deleted"),
            ));
        }

        let switch = self.ctx.switch(fqdn).await?;
        if let Some(reason) = self.ctx.mutation_gate(&switch) {
            info!(port_channel = key, reason, "delete blocked");
            self.set_phase(
                key,
                PortPhase::Blocked,
                vec!["delete".to_string()],
                Some(format!("delete blocked: {}", reason)),
            )
            .await?;
            return Ok(Requeue::Resync);
        }

        let client = self.ctx.access.client(fqdn)?;
        if let Err(e) = self.delete_on_device(client.as_ref(), pc).await {
            self.ctx.warn(kinds::PORT_CHANNEL, key, &e);
            return Err(e.into());
        }

        // Members must not re-join a port-channel that no longer exists
        for record in self
            .ctx
            .stores
            .switch_ports
            .list()
            .await
            .map_err(SdnError::from)?
        {
            let port = &record.value;
            if port.spec.switch_fqdn == *fqdn
                && port.spec.port_channel == Managed::Value(i64::from(pc.spec.id))
            {
                mutate(self.ctx.stores.switch_ports.as_ref(), &record.key, |p| {
                    p.spec.port_channel = Managed::Unmanaged;
                })
                .await
                .map_err(SdnError::from)?;
            }
        }

        self.ctx
            .stores
            .port_channels
            .delete(key)
            .await
            .map_err(SdnError::from)?;
        info!(port_channel = key, "deleted port-channel");
        self.ctx.events.normal(
            kinds::PORT_CHANNEL,
            key,
            "Deleted",
            format!("deleted {}", pc.interface()),
        );
        self.ctx.reporter.accelerate(fqdn);
        Ok(Requeue::Never)
    }
}

#[async_trait]
impl Reconciler for PortChannelReconciler {
    fn name(&self) -> &str {
        "portchannel"
    }

    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
        let Some(record) = self
            .ctx
            .stores
            .port_channels
            .get(key)
            .await
            .map_err(SdnError::from)?
        else {
            return Ok(Requeue::Never);
        };
        let pc = record.value;
        let fqdn = pc.spec.switch_fqdn.clone();

        if pc.spec.delete_requested {
            return self.delete(key, &pc).await;
        }

        if pc.is_spine() {
            if pc.spec.has_managed_fields() {
                return Err(self.reject(
                    key,
                    SdnError::validation(key, "spine port-channels are read-only"),
                ));
            }
            return Ok(Requeue::Resync);
        }

        if pc.status.last_observed.is_none() {
            debug!(port_channel = key, "waiting for first observation");
            self.ctx.reporter.accelerate(&fqdn);
            return Ok(Requeue::Resync);
        }

        let switch = self.ctx.switch(&fqdn).await?;

        if !pc.status.present {
            if pc.spec.autodiscovered {
                // Gone from the device; discovery never recreates it
                return Ok(Requeue::Resync);
            }
            if let Some(reason) = self.ctx.mutation_gate(&switch) {
                info!(port_channel = key, reason, "create blocked");
                self.set_phase(
                    key,
                    PortPhase::Blocked,
                    vec!["create".to_string()],
                    Some(format!("create blocked: {}", reason)),
                )
                .await?;
                return Ok(Requeue::Resync);
            }
            let client = self.ctx.access.client(&fqdn)?;
            match client.create_port_channel(pc.spec.id).await {
                Ok(()) => {
                    info!(port_channel = key, "created port-channel");
                    self.ctx.events.normal(
                        kinds::PORT_CHANNEL,
                        key,
                        "Created",
                        format!("created {}", pc.interface()),
                    );
                }
                Err(e) if e.is_success_equivalent() => {
                    debug!(port_channel = key, "port-channel already exists");
                }
                Err(e) => {
                    self.ctx.warn(kinds::PORT_CHANNEL, key, &e);
                    return Err(e.into());
                }
            }
            self.set_phase(key, PortPhase::Syncing, Vec::new(), None).await?;
            self.ctx.reporter.accelerate(&fqdn);
            return Ok(Requeue::Resync);
        }

        let diff = port_channel_diff(&pc.spec, &pc.status);
        if diff.is_empty() {
            return Ok(Requeue::Resync);
        }

        let pending: Vec<String> = diff.fields().iter().map(|f| f.to_string()).collect();
        if let Some(reason) = self.ctx.mutation_gate(&switch) {
            info!(port_channel = key, reason, fields = ?pending, "device writes blocked");
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
            return Err(self.reject(key, e));
        }
        if let Err(e) = diff.apply(client.as_ref(), &pc.interface()).await {
            self.ctx.warn(kinds::PORT_CHANNEL, key, &e);
            return Err(e.into());
        }

        info!(port_channel = key, fields = ?pending, "pushed port-channel changes");
        self.ctx.events.normal(
            kinds::PORT_CHANNEL,
            key,
            "Updated",
            format!("updated {}", pending.join(", ")),
        );
        self.set_phase(key, PortPhase::Syncing, Vec::new(), None).await?;
        self.ctx.reporter.accelerate(&fqdn);
        Ok(Requeue::Resync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcilers::testing::{bed, LEAF};
    use pretty_assertions::assert_eq;
    use sdn_common::naming;
    use sdn_common::resources::SwitchPort;
    use sdn_types::{InterfaceRole, PortMode};

    async fn request(bed: &crate::reconcilers::testing::Bed, id: u32) -> String {
        let pc = PortChannel::new(LEAF, id);
        let key = pc.key().to_string();
        bed.ctx.stores.port_channels.create(&key, pc).await.unwrap();
        bed.ctx.reporter.refresh_switch(LEAF).await.unwrap();
        key
    }

    #[tokio::test]
    async fn test_create_then_configure() {
        let bed = bed().await;
        let key = request(&bed, 10).await;
        let reconciler = PortChannelReconciler::new(Arc::clone(&bed.ctx));

        reconciler.reconcile(&key).await.unwrap();
        assert!(bed.switch.has_port_channel(10));

        mutate(bed.ctx.stores.port_channels.as_ref(), &key, |pc| {
            pc.spec.mode = Some(PortMode::Access);
            pc.spec.vlan = Managed::Value(150);
        })
        .await
        .unwrap();
        bed.ctx.reporter.refresh_switch(LEAF).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();

        let iface = bed.switch.interface("Port-Channel10").unwrap();
        assert_eq!(iface.vlan, 150);

        bed.ctx.reporter.refresh_switch(LEAF).await.unwrap();
        let updates = bed.updates();
        reconciler.reconcile(&key).await.unwrap();
        assert_eq!(bed.updates(), updates);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_success() {
        let bed = bed().await;
        let key = request(&bed, 10).await;
        bed.switch.create_port_channel(10).await.unwrap();
        let reconciler = PortChannelReconciler::new(Arc::clone(&bed.ctx));

        assert!(reconciler.reconcile(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_only_when_requested() {
        let bed = bed().await;
        let key = request(&bed, 10).await;
        let reconciler = PortChannelReconciler::new(Arc::clone(&bed.ctx));
        reconciler.reconcile(&key).await.unwrap();
        bed.switch.add_to_port_channel("Ethernet2", 10).await.unwrap();

        let mut member = SwitchPort::new(LEAF, "Ethernet2");
        member.spec.port_channel = Managed::Value(10);
        let member_key = member.key().to_string();
        bed.ctx
            .stores
            .switch_ports
            .create(&member_key, member)
            .await
            .unwrap();
        bed.ctx.reporter.refresh_switch(LEAF).await.unwrap();

        mutate(bed.ctx.stores.port_channels.as_ref(), &key, |pc| {
            pc.spec.delete_requested = true
        })
        .await
        .unwrap();
        assert_eq!(reconciler.reconcile(&key).await.unwrap(), Requeue::Never);

        assert!(!bed.switch.has_port_channel(10));
        assert_eq!(bed.switch.interface("Ethernet2").unwrap().port_channel, 0);
        assert!(bed.ctx.stores.port_channels.get(&key).await.unwrap().is_none());
        let member = bed
            .ctx
            .stores
            .switch_ports
            .get(&member_key)
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(member.spec.port_channel, Managed::Unmanaged);
    }

    #[tokio::test]
    async fn test_failed_delete_restores_checkpoint() {
        let bed = bed().await;
        let key = request(&bed, 10).await;
        let reconciler = PortChannelReconciler::new(Arc::clone(&bed.ctx));
        reconciler.reconcile(&key).await.unwrap();
        bed.switch.add_to_port_channel("Ethernet2", 10).await.unwrap();
        bed.ctx.reporter.refresh_switch(LEAF).await.unwrap();

        bed.switch.fail_next("delete_port_channel", 1);
        mutate(bed.ctx.stores.port_channels.as_ref(), &key, |pc| {
            pc.spec.delete_requested = true
        })
        .await
        .unwrap();

        assert!(reconciler.reconcile(&key).await.is_err());
        assert!(bed.switch.has_port_channel(10));
        assert_eq!(bed.switch.interface("Ethernet2").unwrap().port_channel, 10);
        assert!(bed.ctx.stores.port_channels.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spine_port_channels_are_read_only() {
        let bed = bed().await;
        let key = naming::port_channel_name(20, LEAF);
        let mut pc = PortChannel::autodiscovered(LEAF, 20, InterfaceRole::Spine);
        pc.spec.delete_requested = true;
        bed.ctx.stores.port_channels.create(&key, pc).await.unwrap();
        bed.switch.create_port_channel(20).await.unwrap();
        let reconciler = PortChannelReconciler::new(Arc::clone(&bed.ctx));

        let err = reconciler.reconcile(&key).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation { .. }));
        assert!(bed.switch.has_port_channel(20));
        assert_eq!(bed.ctx.access.metrics().mutations(LEAF), 0);
    }
}
