pub mod bootstrap;
pub mod cache;
pub mod chroot;
pub mod datasets;
pub mod disk;
pub mod partition;
pub mod pools;
pub mod preflight;
pub mod teardown;

use crate::pipeline::Pipeline;

/// The whole install, in the only order that works.
pub fn pipeline() -> Pipeline {
    let mut p = Pipeline::new();
    p.push(disk::ResolveDisk);
    p.push(partition::Partition);
    p.push(pools::CreatePools);
    p.push(datasets::CreateDatasets);
    p.push(bootstrap::InstallBase);
    p.push(bootstrap::PrepareChroot);
    for stage in chroot::STAGES {
        p.push(stage);
    }
    p.push(cache::StabilizeCache);
    p.push(teardown::Teardown);
    p
}
