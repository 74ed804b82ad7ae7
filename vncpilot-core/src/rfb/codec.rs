//! RFB message framing for `tokio_util::codec::Framed`.
//!
//! Only the post-handshake message stream goes through this codec. The
//! version and security exchange is a short fixed dialogue handled directly
//! on the socket in [`super::handshake`].
//!
//! FramebufferUpdate is decoded one rectangle at a time so a large update
//! never has to be buffered whole: the decoder yields a
//! [`ServerMessage::Rect`] per rectangle and a final
//! [`ServerMessage::UpdateEnd`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::PilotError;
use crate::types::{ButtonMask, Point};

// ── Constants ────────────────────────────────────────────────────

/// Raw encoding.
pub const ENCODING_RAW: i32 = 0;
/// Cursor pseudo-encoding.
pub const ENCODING_CURSOR: i32 = -239;
/// PointerPos pseudo-encoding.
pub const ENCODING_POINTER_POS: i32 = -232;
/// DesktopSize pseudo-encoding.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Encodings announced in SetEncodings, in preference order.
pub const SUPPORTED_ENCODINGS: [i32; 4] = [
    ENCODING_RAW,
    ENCODING_CURSOR,
    ENCODING_POINTER_POS,
    ENCODING_DESKTOP_SIZE,
];

/// Bytes per pixel of the negotiated pixel format.
pub const BYTES_PER_PIXEL: usize = 4;

/// Largest rectangle body accepted from the server.
pub const MAX_RECT_BYTES: usize = 256 * 1024 * 1024;

const RECT_HEADER_LEN: usize = 12;

// ── PixelFormat ──────────────────────────────────────────────────

/// The 16-byte PIXEL_FORMAT structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// 32 bpp little-endian true colour, `0x00RRGGBB`.
    ///
    /// On the wire each pixel is the byte sequence `B G R X`.
    pub const BGRX: PixelFormat = PixelFormat {
        bits_per_pixel: 32,
        depth: 24,
        big_endian: false,
        true_colour: true,
        red_max: 255,
        green_max: 255,
        blue_max: 255,
        red_shift: 16,
        green_shift: 8,
        blue_shift: 0,
    };

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u8(self.bits_per_pixel);
        dst.put_u8(self.depth);
        dst.put_u8(u8::from(self.big_endian));
        dst.put_u8(u8::from(self.true_colour));
        dst.put_u16(self.red_max);
        dst.put_u16(self.green_max);
        dst.put_u16(self.blue_max);
        dst.put_u8(self.red_shift);
        dst.put_u8(self.green_shift);
        dst.put_u8(self.blue_shift);
        dst.put_bytes(0, 3);
    }

    pub fn read(src: &mut impl Buf) -> Self {
        let pf = PixelFormat {
            bits_per_pixel: src.get_u8(),
            depth: src.get_u8(),
            big_endian: src.get_u8() != 0,
            true_colour: src.get_u8() != 0,
            red_max: src.get_u16(),
            green_max: src.get_u16(),
            blue_max: src.get_u16(),
            red_shift: src.get_u8(),
            green_shift: src.get_u8(),
            blue_shift: src.get_u8(),
        };
        src.advance(3);
        pf
    }
}

// ── Messages ─────────────────────────────────────────────────────

/// Body of one FramebufferUpdate rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RectBody {
    /// `width * height` pixels in the negotiated format.
    Raw(Bytes),
    /// Cursor pixels followed by a 1-bit-per-pixel transparency mask.
    Cursor { pixels: Bytes, mask: Bytes },
    /// The rectangle origin is the pointer position.
    PointerPos,
    /// The rectangle size is the new desktop size.
    DesktopSize,
}

/// A decoded server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Rect {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        body: RectBody,
    },
    UpdateEnd,
    SetColourMapEntries,
    Bell,
    ServerCutText(String),
}

/// A client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest {
        incremental: bool,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    KeyEvent {
        down: bool,
        keysym: u32,
    },
    PointerEvent {
        buttons: ButtonMask,
        x: u16,
        y: u16,
    },
}

impl ClientMessage {
    /// PointerEvent at `at`, clamped to the protocol's coordinate range.
    pub fn pointer(buttons: ButtonMask, at: Point) -> Self {
        let clamp = |v: i32| v.clamp(0, i32::from(u16::MAX)) as u16;
        ClientMessage::PointerEvent {
            buttons,
            x: clamp(at.x),
            y: clamp(at.y),
        }
    }
}

// ── RfbCodec ─────────────────────────────────────────────────────

/// Stateful codec for the RFB message stream.
#[derive(Debug, Default)]
pub struct RfbCodec {
    /// Rectangles of the current FramebufferUpdate not yet decoded.
    rects_remaining: u16,
    /// The last rectangle was yielded; `UpdateEnd` is due.
    end_pending: bool,
}

impl RfbCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_rect(&mut self, src: &mut BytesMut) -> Result<Option<ServerMessage>, PilotError> {
        if src.len() < RECT_HEADER_LEN {
            return Ok(None);
        }
        let mut header = &src[..RECT_HEADER_LEN];
        let x = header.get_u16();
        let y = header.get_u16();
        let width = header.get_u16();
        let height = header.get_u16();
        let encoding = header.get_i32();

        let pixel_bytes = usize::from(width) * usize::from(height) * BYTES_PER_PIXEL;
        let body_len = match encoding {
            ENCODING_RAW => pixel_bytes,
            ENCODING_CURSOR => pixel_bytes + usize::from(width).div_ceil(8) * usize::from(height),
            ENCODING_POINTER_POS | ENCODING_DESKTOP_SIZE => 0,
            other => {
                return Err(PilotError::Protocol(format!(
                    "server sent unrequested encoding {other}"
                )));
            }
        };
        if body_len > MAX_RECT_BYTES {
            return Err(PilotError::Protocol(format!(
                "rectangle of {body_len} bytes exceeds limit"
            )));
        }
        if src.len() < RECT_HEADER_LEN + body_len {
            src.reserve(RECT_HEADER_LEN + body_len - src.len());
            return Ok(None);
        }

        src.advance(RECT_HEADER_LEN);
        let body = match encoding {
            ENCODING_RAW => RectBody::Raw(src.split_to(body_len).freeze()),
            ENCODING_CURSOR => {
                let pixels = src.split_to(pixel_bytes).freeze();
                let mask = src.split_to(body_len - pixel_bytes).freeze();
                RectBody::Cursor { pixels, mask }
            }
            ENCODING_POINTER_POS => RectBody::PointerPos,
            _ => RectBody::DesktopSize,
        };

        self.rects_remaining -= 1;
        if self.rects_remaining == 0 {
            self.end_pending = true;
        }
        Ok(Some(ServerMessage::Rect {
            x,
            y,
            width,
            height,
            body,
        }))
    }
}

impl Decoder for RfbCodec {
    type Item = ServerMessage;
    type Error = PilotError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.end_pending {
            self.end_pending = false;
            return Ok(Some(ServerMessage::UpdateEnd));
        }
        if self.rects_remaining > 0 {
            return self.decode_rect(src);
        }
        if src.is_empty() {
            return Ok(None);
        }

        match src[0] {
            // FramebufferUpdate: type, padding, rect count.
            0 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                src.advance(2);
                let count = src.get_u16();
                if count == 0 {
                    return Ok(Some(ServerMessage::UpdateEnd));
                }
                self.rects_remaining = count;
                self.decode_rect(src)
            }
            // SetColourMapEntries: type, padding, first colour, count, entries.
            1 => {
                if src.len() < 6 {
                    return Ok(None);
                }
                let count = usize::from(u16::from_be_bytes([src[4], src[5]]));
                let total = 6 + count * 6;
                if src.len() < total {
                    return Ok(None);
                }
                src.advance(total);
                Ok(Some(ServerMessage::SetColourMapEntries))
            }
            // Bell.
            2 => {
                src.advance(1);
                Ok(Some(ServerMessage::Bell))
            }
            // ServerCutText: type, padding, length, Latin-1 text.
            3 => {
                if src.len() < 8 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                if len > MAX_RECT_BYTES {
                    return Err(PilotError::Protocol(format!("cut text of {len} bytes")));
                }
                if src.len() < 8 + len {
                    return Ok(None);
                }
                src.advance(8);
                let text = src.split_to(len).iter().map(|&b| char::from(b)).collect();
                Ok(Some(ServerMessage::ServerCutText(text)))
            }
            other => Err(PilotError::Protocol(format!(
                "unknown server message type {other}"
            ))),
        }
    }
}

impl Encoder<ClientMessage> for RfbCodec {
    type Error = PilotError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ClientMessage::SetPixelFormat(pf) => {
                dst.reserve(20);
                dst.put_u8(0);
                dst.put_bytes(0, 3);
                pf.write(dst);
            }
            ClientMessage::SetEncodings(encodings) => {
                let count = u16::try_from(encodings.len())
                    .map_err(|_| PilotError::Protocol("too many encodings".into()))?;
                dst.reserve(4 + encodings.len() * 4);
                dst.put_u8(2);
                dst.put_u8(0);
                dst.put_u16(count);
                for encoding in encodings {
                    dst.put_i32(encoding);
                }
            }
            ClientMessage::FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            } => {
                dst.reserve(10);
                dst.put_u8(3);
                dst.put_u8(u8::from(incremental));
                dst.put_u16(x);
                dst.put_u16(y);
                dst.put_u16(width);
                dst.put_u16(height);
            }
            ClientMessage::KeyEvent { down, keysym } => {
                dst.reserve(8);
                dst.put_u8(4);
                dst.put_u8(u8::from(down));
                dst.put_bytes(0, 2);
                dst.put_u32(keysym);
            }
            ClientMessage::PointerEvent { buttons, x, y } => {
                dst.reserve(6);
                dst.put_u8(5);
                dst.put_u8(buttons.bits());
                dst.put_u16(x);
                dst.put_u16(y);
            }
        }
        Ok(())
    }
}
