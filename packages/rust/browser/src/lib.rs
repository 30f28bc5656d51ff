//! Headless browser plumbing for stacksift.
//!
//! - [`BrowserPage`] / [`PageSource`]: the automation boundary the pipeline codes against
//! - [`BrowserManager`]: one Chrome process, isolated contexts, asset blocking
//! - [`ScrollHandler`]: infinite-scroll pagination
//!
//! Enable the `test-support` feature for [`mock::ScriptedPage`] and
//! [`mock::ScriptedSource`].

pub mod cdp;
pub mod manager;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod page;
pub mod scroll;

pub use cdp::{BLOCKED_EXTENSIONS, CdpPage};
pub use manager::{BrowserManager, ContextSession, USER_AGENT, VIEWPORT};
pub use page::{BrowserPage, ObservedResponse, PageSession, PageSource, ResponseFilter};
pub use scroll::ScrollHandler;
