pub mod backend;
pub mod command_builder;
pub mod display;
pub mod duration;
pub mod error;
pub mod fallback;
pub mod freeze;
pub mod image;
pub mod layout;
pub mod probe;
pub mod region;
pub mod session;
pub mod stall;
pub mod supervisor;
pub mod target;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{CommandBackend, MediaBackend};
pub use command_builder::{CommandBuilder, ProgramConfig};
pub use display::{DisplayEnumerator, DisplayOutput};
pub use duration::format_duration;
pub use error::{ErrorReporting, Result, VidwallError};
pub use fallback::FallbackPresenter;
pub use layout::{resolve, Assignment, Layout, Unassigned};
pub use probe::Liveness;
pub use region::Region;
pub use session::{PlaybackSession, SessionEndReason, SessionHandle};
pub use supervisor::StreamSupervisor;
pub use target::{OutputBinding, StreamTarget};
