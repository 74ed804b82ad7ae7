//! Minimal RFB (VNC) client: version 3.3/3.7/3.8, security type None,
//! Raw pixels plus the Cursor, PointerPos and DesktopSize pseudo-encodings.

pub mod codec;
pub mod handshake;
pub mod link;

pub use codec::{ClientMessage, PixelFormat, RectBody, RfbCodec, ServerMessage};
pub use handshake::{ProtocolVersion, ServerInit, handshake};
pub use link::{DEFAULT_CONNECT_TIMEOUT, RfbLink};
