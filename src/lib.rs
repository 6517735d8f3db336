//! Google Cloud Long-Running Operation Driver
//!
//! The shared core behind every mutating cloud command: submit a request,
//! receive an operation, poll it to completion while reporting progress,
//! and hand back the final resource (or the operation handle in `--async`
//! mode).
//!
//! # Features
//!
//! - **Resource references**: parse short names, relative names and
//!   self-link URLs against an immutable collection registry
//! - **Operation resolution**: route zonal, regional, global and
//!   service-specific operations to the right polling collection
//! - **LRO driver**: submit once, poll with jittered exponential backoff,
//!   cancellation and a total wait budget
//! - **Progress reporting**: interactive spinner or one line per transition
//! - **Transport**: bearer auth with refresh on 401, retry with full jitter
//!   on transient faults, typed API errors
//!
//! # Example
//!
//! ```no_run
//! use integrations_google_cloud_lro::prelude::*;
//! use serde_json::Value;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .auth_provider(StaticTokenProvider::new("ya29.token"))
//!     .endpoints(EndpointContext::from_env()?)
//!     .build()?;
//! let client = std::sync::Arc::new(CloudClient::new(config)?);
//!
//! let defaults = ParamDefaults::new().project("my-project").zone("us-central1-a");
//! let disk = client.parse("data-1", "compute.disks", &defaults)?;
//!
//! let submit_client = client.clone();
//! let fetch_client = client.clone();
//! let request = LroRequest::<Value>::new("Deleting disk [data-1]", move || async move {
//!     let cancel = CancellationToken::new();
//!     let response = submit_client
//!         .executor()
//!         .execute(HttpMethod::Delete, &disk.url(), None, &cancel)
//!         .await?;
//!     let body: Value = serde_json::from_slice(&response.body).unwrap_or_default();
//!     SubmitOutcome::from_json(body)
//! })
//! .fetch(move |operation| async move {
//!     fetch_client.fetch_target(&operation, &CancellationToken::new()).await
//! })
//! .hints(ScopeHints::project("my-project").with_zone("us-central1-a"))
//! .progress(reporter_for(false));
//!
//! match client.lro().run(request).await {
//!     Ok(_) => {}
//!     Err(error) => std::process::exit(error.exit_code()),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

// Core modules
pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod lro;
pub mod operations;
pub mod progress;
pub mod resilience;
pub mod resources;
pub mod services;
pub mod transport;

// Test support
pub mod mocks;

// Re-exports for convenience
pub use auth::{AccessToken, AuthProvider, RefreshingTokenProvider, StaticTokenProvider};
pub use client::CloudClient;
pub use config::{ClientConfig, ClientConfigBuilder, EndpointContext};
pub use errors::{CloudError, CloudResult};
pub use lro::{LroDriver, LroOutcome, LroRequest, Mode, PollPolicy};
pub use operations::{OperationHandle, OperationScope, OperationStatus, ScopeHints, SubmitOutcome};
pub use resources::{ParamDefaults, Registry, ResourceRef};

/// Prelude module with commonly used types and traits.
///
/// ```no_run
/// use integrations_google_cloud_lro::prelude::*;
/// ```
pub mod prelude {
    // Client
    pub use crate::client::{CloudClient, RequestExecutor};

    // Configuration
    pub use crate::config::{ClientConfig, ClientConfigBuilder, EndpointContext};

    // Authentication
    pub use crate::auth::{AccessToken, AuthProvider, RefreshingTokenProvider, StaticTokenProvider};

    // Resources
    pub use crate::resources::{CollectionInfo, ParamDefaults, Registry, ResourceRef};

    // Operations
    pub use crate::operations::{
        OperationHandle, OperationResolver, OperationScope, OperationStatus, ScopeHints,
        SubmitOutcome,
    };

    // Driver
    pub use crate::lro::{
        BatchOutcome, BatchRequest, LroDriver, LroOutcome, LroRequest, Mode, PollPolicy,
    };

    // Progress
    pub use crate::progress::{
        reporter_for, EventKind, ProgressEvent, ProgressReporter, RecordingReporter,
    };

    // Transport
    pub use crate::transport::HttpMethod;

    // Errors
    pub use crate::errors::{CloudError, CloudResult};

    // Cancellation
    pub use tokio_util::sync::CancellationToken;
}
