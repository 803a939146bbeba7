//! aistrack-tracker-lib: live AIS ingestion and fan-out
//!
//! Partitions the tracked MMSIs across several aisstream connections, keeps
//! the latest position per vessel in a shared store, and fans every accepted
//! update out to live observers.

pub mod ais;
pub mod broadcaster;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod resolver;
pub mod server;
pub mod store;
pub mod supervisor;
pub mod traits;
pub mod worker;

pub use ais::{AisStreamSource, AISSTREAM_WS_URL};
pub use broadcaster::{Broadcaster, ObserverHandle, ObserverId, VesselUpdate};
pub use error::{ResolverError, StreamError, TrackerError};
pub use partition::{partition, Batch, MAX_MMSI_PER_CONNECTION};
pub use resolver::{ApiKey, SourceResolver};
pub use server::{create_router, run_server, ServerState};
pub use store::{PositionSample, StateStore, VesselState};
pub use supervisor::{IngestionSupervisor, StartReport, SupervisorConfig, TrackingStatus};
pub use traits::{KeyResolver, StreamConnection, StreamSource};
pub use worker::{ConnectionWorker, WorkerConfig, WorkerHandle, WorkerState};
