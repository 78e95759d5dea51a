pub mod health_aggregator;
pub mod payload_builder;
pub mod sync_client;
pub mod sync_coordinator;
pub mod token_provider;

pub use health_aggregator::{HealthDataSource, HealthSnapshotAggregator, NullHealthSource};
pub use payload_builder::PayloadBuilder;
pub use sync_client::SyncClient;
pub use sync_coordinator::{SyncCoordinator, SyncOutcome};
pub use token_provider::{Credential, StaticTokenProvider, TokenProvider};
