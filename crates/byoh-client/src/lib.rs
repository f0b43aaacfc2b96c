//! BYOH Object Store Client
//!
//! Typed access to the Kubernetes API for the BYOH manager and host agent.
//! Reconcilers depend on the traits in this crate, never on `kube::Api`
//! directly, so they can be unit tested against in-memory mocks.
//!
//! # Example
//!
//! ```no_run
//! use byoh_client::{KubeStore, ObjectStore, Selector};
//! use crds::ByoHost;
//!
//! # async fn example(client: kube::Client) -> Result<(), byoh_client::StoreError> {
//! let hosts: KubeStore<ByoHost> = KubeStore::new(client);
//! let free = hosts
//!     .list(None, &Selector::everything().does_not_exist("cluster.x-k8s.io/cluster-name"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **test-util**: `MockStore`, `MockWorkloadCluster` and `RecordingEventPublisher`

pub mod client;
pub mod error;
pub mod events;
pub mod persist;
pub mod selector;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{KubeStore, KubeWorkloadClusterClient};
pub use error::StoreError;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use persist::{persist, persist_rebased};
pub use selector::Selector;
pub use store_trait::{ObjectStore, WorkloadClusterClient};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockStore, MockWorkloadCluster, RecordingEventPublisher};
