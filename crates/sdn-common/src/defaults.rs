//! Default timing and policy values.
//!
//! Every value here can be overridden from the controller configuration
//! file.

use std::time::Duration;

/// Periodic reconcile interval for converged resources.
pub const RESYNC_PERIOD: Duration = Duration::from_secs(60);

/// Delay of the single accelerated re-check after a device write.
pub const ACCELERATED_DELAY: Duration = Duration::from_secs(5);

/// Floor for the accelerated re-check delay.
pub const MIN_ACCELERATED_DELAY: Duration = Duration::from_secs(1);

/// Interval of the per-switch observed-state refresh.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// NodeGroup requeue period while fabrics are not in sync.
pub const NODE_GROUP_REQUEUE: Duration = Duration::from_secs(3);

/// Maximum reconcile passes running at once per reconciler.
pub const MAX_CONCURRENT_RECONCILES: usize = 10;

/// Connection attempts before a switch is reported unreachable.
pub const CONNECT_ATTEMPTS: u32 = 5;

/// First back-off delay between connection attempts.
pub const CONNECT_BACKOFF_MIN: Duration = Duration::from_millis(200);

/// Upper bound of the connection back-off.
pub const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// VLANs a port may be assigned to.
pub const ALLOWED_VLANS: &str = "100-3999,4008";

/// VLANs a trunk may use as native VLAN.
pub const ALLOWED_NATIVE_VLANS: &str = "1,55";

/// ASN prefix used to render BGP communities (`<asn>:<value>`).
pub const BGP_COMMUNITY_ASN: u32 = 101;

/// Label prefix marking a host as enrolled.
pub const ENROLLMENT_LABEL_PREFIX: &str = "instance-type.sdn/";

/// LLDP neighbor descriptions of switches that are never managed.
pub const IGNORED_LLDP_DESCRIPTIONS: &[&str] = &["edgecore"];

/// Accelerator port counts a host may report.
pub const ALLOWED_ACCELERATOR_PORT_COUNTS: &[usize] = &[1, 2, 4, 8];

/// Capacity of each record store's change feed.
pub const WATCH_CAPACITY: usize = 1024;
