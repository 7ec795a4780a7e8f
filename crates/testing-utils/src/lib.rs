//! # Taskbus Testing Utils
//!
//! Shared testing utilities for the taskbus workspace.
//!
//! - **Mock Repositories**: in-memory implementations of the repository traits,
//!   with failure injection for isolation tests
//! - **Recording Email Sender**: captures every email instead of sending it
//! - **Test Data Builders**: `ScheduledTaskBuilder` with sensible defaults
//! - **Helpers**: polling waits for asynchronous assertions
//!
//! ```rust
//! use taskbus_testing_utils::{MockScheduledTaskRepository, ScheduledTaskBuilder};
//!
//! let repo = MockScheduledTaskRepository::new();
//! let task = ScheduledTaskBuilder::new().with_name("nightly").build();
//! repo.insert(task);
//! assert_eq!(repo.count(), 1);
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
