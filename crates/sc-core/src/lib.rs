//! Safety Center Core
//!
//! The engine that:
//! - Fans refresh requests out to every applicable source and tracks the
//!   answers until each (source, user) pair completed, failed or timed out
//! - Stores the latest report of every source
//! - Tracks issue dismissals and resurfaces them per policy
//! - Aggregates everything into one deterministic view per profile group
//! - Notifies listeners only when that view actually changed
//!
//! The components ([`IssueDismissalCache`], [`RefreshTracker`],
//! [`DataRepository`], [`ActionsInFlight`]) are plain single-threaded
//! structs. [`SafetyCenterService`] owns them behind one lock and is the
//! only entry point meant for concurrent use.
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_core::{Collaborators, SafetyCenterService};
//! use sc_model::{RefreshReason, UserId};
//!
//! # fn example(config: sc_config::SafetyCenterConfig, collaborators: Collaborators) -> Result<(), sc_core::SafetyCenterError> {
//! let service = SafetyCenterService::new(config, Default::default(), collaborators)?;
//! let broadcast_id = service.refresh_safety_sources(RefreshReason::PageOpen, UserId::SYSTEM)?;
//! println!("refresh {broadcast_id} started");
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod actions;
pub mod aggregation;
pub mod clock;
pub mod dismissal;
pub mod error;
pub mod listeners;
pub mod persistence;
pub mod refresh;
pub mod repository;
pub mod service;
pub mod timeouts;
pub mod transport;
pub mod users;
mod validation;

// Re-exports for convenience
pub use actions::{ActionKey, ActionsInFlight};
pub use aggregation::{
    ActionView, AggregateView, EntryState, EntryView, IssueStats, IssueView, SafetyCenterDataFactory,
    SafetyCenterStatus,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dismissal::{DismissalRecord, IssueDismissalCache};
pub use error::{PersistenceError, SafetyCenterError, TimeoutError};
pub use listeners::{ErrorDetails, ErrorKind, ListenerRegistry, SafetyCenterListener};
pub use persistence::{DismissalStore, InMemoryStore, JsonFileStore};
pub use refresh::{RefreshInProgress, RefreshPlan, RefreshTracker, SourceRefreshState};
pub use repository::{DataRepository, SourceReport};
pub use service::{Collaborators, SafetyCenterService};
pub use timeouts::{TimeoutKey, TimeoutScheduler};
pub use transport::{LoggingTransport, RefreshRequest, SourceTransport};
pub use users::{StaticUserTopology, UserInfo, UserProfileGroup, UserTopology};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding the safety center
    pub use crate::{
        AggregateView, Collaborators, SafetyCenterError, SafetyCenterListener,
        SafetyCenterService, SourceTransport, UserProfileGroup,
    };
    pub use sc_model::{
        IssueKey, RefreshReason, SafetyEvent, SafetySourceData, SeverityLevel, SourceKey, UserId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
