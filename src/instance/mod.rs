//! Instance records, locks, and on-disk materialization.

mod lock;
mod materialize;
mod record;

pub use lock::InstanceLock;
pub use materialize::{materialize, render_manage_script};
pub use record::{
    validate_instance_name, InstanceRecord, InstanceStore, LifecycleManager, RuntimeMode,
};

#[cfg(test)]
pub(crate) use record::tests::sample_record;
