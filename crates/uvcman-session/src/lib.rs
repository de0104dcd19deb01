//! uvcman Session - Lifecycle management for attached UVC devices
//!
//! This crate sequences the attach → permission → open → preview → stop → close
//! protocol for every device the driver reports:
//! - A registry holding at most one session per device identifier
//! - The per-device session state machine
//! - A coordinator that turns driver events into transitions, driver calls and
//!   application callbacks
//! - A cancellable per-device frame loop bound to the previewing state

pub mod coordinator;
pub mod driver;
pub mod error;
pub mod events;
pub mod frame_loop;
pub mod handlers;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{CoordinatorConfig, SessionCoordinator};
pub use driver::{CodecPreference, DeviceHandle, DriverError, RenderSurfaceProvider, SurfaceRef, UvcDriver};
pub use error::SessionError;
pub use events::{DriverEvent, SessionEvent};
pub use frame_loop::FrameLoop;
pub use handlers::{
    AttachDecision, AttachPolicy, DefaultHandlers, DetachHandler, Handlers, PreviewHandler,
    ResolutionChoice, ResolutionPolicy,
};
pub use registry::{SessionEntry, SessionRegistry, SharedSession};
pub use session::{DeviceSession, SessionSnapshot, SessionState, StreamTarget};
