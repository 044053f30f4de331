//! Outbound notification delivery: the channel interface and the
//! router that fans messages out to registered channels.

pub mod channel;
pub mod console;
pub mod router;

pub use channel::{Button, ButtonRows, MessageRef, NotificationChannel, SendOutcome};
pub use console::ConsoleChannel;
pub use router::NotificationRouter;
