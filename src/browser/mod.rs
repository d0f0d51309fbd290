//! Browser module - sensing and acting over the DevTools protocol

pub mod cdp;
pub mod executor;
pub mod sensor;
pub mod snapshot;
pub mod tabs;
pub mod target;

pub use cdp::{CdpConnection, CdpTransport};
pub use executor::ActionExecutor;
pub use sensor::PageSensor;
pub use snapshot::{ElementDescriptor, Generations, HandleTable, PageSnapshot, Rect, Viewport};
pub use tabs::TabTools;
pub use target::{Attachment, TargetInfo, TargetTracker};
