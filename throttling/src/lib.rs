//! In-process admission control
//!
//! Bounds the number of concurrently in-flight operations, queues excess
//! demand up to a limit and subdivides capacity between callers with quotas.
//! Limits are re-read from configuration periodically and applied to live
//! traffic without blocking it.
//!
//! ```no_run
//! use throttling::ThrottlingConfiguration;
//! use throttling::ThrottlingEssentials;
//! use throttling::ThrottlingPriority;
//! use throttling::ThrottlingProvider;
//!
//! # async fn handle() -> throttling::Result<()> {
//! let provider = ThrottlingProvider::new(
//!     ThrottlingConfiguration::builder().essentials(ThrottlingEssentials { capacity_limit: Some(100), ..Default::default() }).build(),
//! );
//!
//! let result = provider.throttle_consumer("billing", None, ThrottlingPriority::Ordinary).await?;
//! if result.is_passed() {
//!     // do the work, capacity is returned when `result` is dropped
//! }
//! # Ok(())
//! # }
//! ```

pub mod actualizer;
pub mod checker;
pub mod config;
pub mod error;
mod lifo_stack;
pub mod metrics;
pub mod observer;
pub mod properties;
pub mod provider;
pub mod quotas;
pub mod result;
pub mod semaphore;
pub mod state;
pub mod state_provider;

pub use actualizer::ConfigurationActualizer;
pub use actualizer::StateActualizer;
pub use actualizer::UNLIMITED_CAPACITY;
pub use checker::QuotaRejection;
pub use checker::QuotasChecker;
pub use config::ThrottlingConfiguration;
pub use config::ThrottlingConfigurationBuilder;
pub use config::ThrottlingEssentials;
pub use error::Result;
pub use error::ThrottlingError;
pub use metrics::ThrottlingInfo;
pub use metrics::ThrottlingMetrics;
pub use observer::Subscription;
pub use observer::ThrottlingEvent;
pub use observer::ThrottlingObserver;
pub use properties::Property;
pub use properties::ThrottlingPriority;
pub use properties::ThrottlingProperties;
pub use properties::ThrottlingPropertiesBuilder;
pub use provider::ThrottlingProvider;
pub use result::ThrottlingResult;
pub use result::ThrottlingResultInfo;
pub use result::ThrottlingStatus;
pub use semaphore::LifoSemaphore;
pub use state::ThrottlingState;
pub use state_provider::StateProvider;
pub use state_provider::ThrottlingStateProvider;
