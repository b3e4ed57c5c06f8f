pub mod event;
pub mod hourly;
pub mod server;
pub mod snapshot;
pub mod time;
pub mod tunnel;

pub use event::{DetectedEvent, Event, EventType, EventWithServer, PrevState, detect_transitions};
pub use hourly::{BufferEntry, HourlySample, HourlySampleWithServer, RollupAggregates, rollup_buffer};
pub use server::{Server, ServerPatch};
pub use snapshot::{
    ActiveState, DiskInfo, GpuAggregate, GpuInfo, LatestSnapshot, ServiceInfo, Snapshot,
    aggregate_gpu_metrics,
};
pub use time::{canonical_hour, next_hour_boundary};
pub use tunnel::{ProxyConfig, TunnelState, TunnelStatus, backoff_seconds};
