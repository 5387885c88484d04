//! Switch reconciler.
//!
//! Resolves the management address, keeps a connection and a status
//! reporter alive and converges the switch-level BGP community.

use crate::context::Context;
use async_trait::async_trait;
use sdn_common::resources::Switch;
use sdn_common::validation::{validate_address_override, validate_bgp_community};
use sdn_common::{kinds, SdnError};
use sdn_reconcile::{mutate, Reconciler, Requeue, TaskResult};
use sdn_types::Managed;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct SwitchReconciler {
    ctx: Arc<Context>,
}

impl SwitchReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Address to connect to: a valid override, else the IP, else the FQDN.
    fn resolve_address(&self, switch: &Switch) -> String {
        let fqdn = switch.fqdn();
        if let Some(value) = switch.spec.ip_override.as_deref().filter(|v| !v.trim().is_empty()) {
            return match validate_address_override(fqdn, value, &self.ctx.settings.fqdn_policy) {
                Ok(address) => address,
                Err(e) => {
                    warn!(switch = fqdn, error = %e, "ignoring address override");
                    self.ctx.warn(kinds::SWITCH, fqdn, &e);
                    fqdn.to_string()
                }
            };
        }
        if switch.spec.ip.trim().is_empty() {
            fqdn.to_string()
        } else {
            switch.spec.ip.trim().to_string()
        }
    }

    async fn update_status<F>(&self, fqdn: &str, f: F) -> TaskResult<()>
    where
        F: FnMut(&mut Switch) + Send,
    {
        mutate(self.ctx.stores.switches.as_ref(), fqdn, f)
            .await
            .map_err(SdnError::from)?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for SwitchReconciler {
    fn name(&self) -> &str {
        "switch"
    }

    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
        let Some(record) = self
            .ctx
            .stores
            .switches
            .get(key)
            .await
            .map_err(SdnError::from)?
        else {
            return Ok(Requeue::Never);
        };
        let switch = record.value;
        let fqdn = switch.fqdn().to_string();
        let address = switch_address_change(&switch, self.resolve_address(&switch));

        if let Some(previous) = &address.previous {
            info!(switch = %fqdn, from = %previous, to = %address.current, "management address changed");
            self.ctx.access.disconnect(&fqdn);
        }

        let client = match self.ctx.access.connect(&fqdn, &address.current).await {
            Ok(client) => client,
            Err(e) => {
                warn!(switch = %fqdn, error = %e, "switch unreachable");
                self.ctx.warn(kinds::SWITCH, &fqdn, &e);
                let message = e.to_string();
                self.update_status(&fqdn, |s| {
                    s.status.reachable = false;
                    s.status.message = Some(message.clone());
                })
                .await?;
                return Err(e.into());
            }
        };

        let resolved = address.current.clone();
        self.update_status(&fqdn, |s| {
            s.status.resolved_address = Some(resolved.clone());
            s.status.reachable = true;
            s.status.message = None;
        })
        .await?;
        self.ctx.reporter.ensure_worker(&fqdn);

        let Managed::Value(desired) = switch.spec.bgp_community else {
            return Ok(Requeue::Resync);
        };
        if let Err(e) = validate_bgp_community(&fqdn, desired) {
            self.ctx.warn(kinds::SWITCH, &fqdn, &e);
            return Err(e.into());
        }
        if switch.status.last_refresh.is_none() {
            debug!(switch = %fqdn, "bgp community waits for first observation");
            self.ctx.reporter.accelerate(&fqdn);
            return Ok(Requeue::Resync);
        }
        if !switch.bgp_drifted() {
            return Ok(Requeue::Resync);
        }

        if let Some(reason) = self.ctx.mutation_gate(&switch) {
            info!(switch = %fqdn, reason, desired, "bgp community update blocked");
            let message = format!("bgp community {} pending: {}", desired, reason);
            self.update_status(&fqdn, |s| s.status.message = Some(message.clone()))
                .await?;
            return Ok(Requeue::Resync);
        }

        if let Err(e) = client.update_bgp_community(desired).await {
            warn!(switch = %fqdn, error = %e, "bgp community update failed");
            self.ctx.warn(kinds::SWITCH, &fqdn, &e);
            return Err(e.into());
        }

        info!(switch = %fqdn, desired, "pushed bgp community");
        self.ctx.events.normal(
            kinds::SWITCH,
            &fqdn,
            "BgpCommunityUpdated",
            format!("set bgp community {}", desired),
        );
        self.update_status(&fqdn, |s| s.status.last_pushed_bgp = Managed::Value(desired))
            .await?;
        self.ctx.reporter.accelerate(&fqdn);
        Ok(Requeue::Resync)
    }

    fn on_deleted(&self, key: &str) {
        self.ctx.reporter.stop(key);
        if self.ctx.access.disconnect(key) {
            info!(switch = key, "disconnected removed switch");
        }
    }
}

struct AddressChange {
    current: String,
    previous: Option<String>,
}

fn switch_address_change(switch: &Switch, current: String) -> AddressChange {
    let previous = switch
        .status
        .resolved_address
        .clone()
        .filter(|prev| *prev != current);
    AddressChange { current, previous }
}
