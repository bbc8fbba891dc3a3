//! Infrastructure layer — owns the scarce automation resources and exposes
//! capabilities only. No business flow, no mappings knowledge beyond what a
//! session needs at acquire time.

pub mod capability;
pub mod chromium;
pub mod session;

pub use capability::{ClickOptions, OriginState, PortalSession, SessionFactory, StorageState};
pub use chromium::{ChromiumFactory, ChromiumSession};
pub use session::SessionManager;
