//! Wire-level protocol pieces shared by every transport.

pub mod commands;
pub mod echo;
pub mod icmp;
pub mod ping_frame;

// Re-export common types
pub use echo::{EchoRule, EchoVerdict, evaluate};
pub use ping_frame::{FrameDecode, PingFrame};
