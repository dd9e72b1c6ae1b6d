//! Streaming side channels: minicap for frames, minitouch for touches

mod install;
mod minicap;
mod minitouch;
mod session;
mod touch;

pub use install::{binary_present, binary_variant, PIE_MIN_SDK};
pub use minicap::{strip_still_frame, DisplayInfo, FrameStream, Minicap, MinicapHeader, StreamEvent};
pub use minitouch::{parse_contacts_banner, parse_greeting, transform_xy, Minitouch, SensorBounds};
pub use session::{ForwardBinding, ServerState, StreamingSession};
pub use touch::{encode_batch, TouchCommand, DEFAULT_PRESSURE};
