//! RFB version and security negotiation, ClientInit and ServerInit.
//!
//! Runs on the raw stream before it is wrapped in a `Framed` codec.

use bytes::Buf;
use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::codec::PixelFormat;
use crate::error::{PilotError, Result};

const SECURITY_INVALID: u8 = 0;
const SECURITY_NONE: u8 = 1;
const SECURITY_VNC_AUTH: u8 = 2;

/// Protocol revision agreed with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// Pick the highest revision we speak that the server offers.
    pub fn negotiate(banner: &[u8; 12]) -> Result<Self> {
        let text = std::str::from_utf8(banner)
            .map_err(|_| PilotError::Protocol("malformed protocol banner".into()))?;
        let bad = || PilotError::Protocol(format!("unsupported protocol banner {text:?}"));

        let rest = text.strip_prefix("RFB ").ok_or_else(bad)?;
        let rest = rest.strip_suffix('\n').ok_or_else(bad)?;
        let (major, minor) = rest.split_once('.').ok_or_else(bad)?;
        let major: u32 = major.parse().map_err(|_| bad())?;
        let minor: u32 = minor.parse().map_err(|_| bad())?;

        match (major, minor) {
            (3, m) if m >= 8 => Ok(Self::V3_8),
            (3, 7) => Ok(Self::V3_7),
            (3, _) => Ok(Self::V3_3),
            _ => Err(bad()),
        }
    }

    pub fn banner(self) -> &'static [u8; 12] {
        match self {
            Self::V3_3 => b"RFB 003.003\n",
            Self::V3_7 => b"RFB 003.007\n",
            Self::V3_8 => b"RFB 003.008\n",
        }
    }
}

/// What the server told us in ServerInit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

/// Run the opening dialogue up to and including ServerInit.
///
/// `password` is only used when the server insists on VNC authentication.
pub async fn handshake<S>(stream: &mut S, password: Option<&str>) -> Result<ServerInit>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner).await?;
    let version = ProtocolVersion::negotiate(&banner)?;
    stream.write_all(version.banner()).await?;
    debug!(?version, "Protocol version agreed");

    negotiate_security(stream, version, password).await?;

    // ClientInit: share the desktop with other clients.
    stream.write_u8(1).await?;

    let mut fixed = [0u8; 24];
    stream.read_exact(&mut fixed).await?;
    let mut buf = &fixed[..];
    let width = buf.get_u16();
    let height = buf.get_u16();
    let pixel_format = PixelFormat::read(&mut buf);
    let name_len = buf.get_u32() as usize;
    let name = read_string(stream, name_len).await?;

    Ok(ServerInit {
        width,
        height,
        pixel_format,
        name,
    })
}

async fn negotiate_security<S>(
    stream: &mut S,
    version: ProtocolVersion,
    password: Option<&str>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if version == ProtocolVersion::V3_3 {
        // The server decides.
        let chosen = stream.read_u32().await?;
        return match u8::try_from(chosen) {
            Ok(SECURITY_NONE) => Ok(()),
            Ok(SECURITY_VNC_AUTH) => {
                let password = password.ok_or(PilotError::PasswordRequired)?;
                authenticate(stream, version, password).await
            }
            Ok(SECURITY_INVALID) => Err(read_failure(stream).await),
            _ => Err(unsupported_security(&[chosen as u8])),
        };
    }

    let count = stream.read_u8().await?;
    if count == 0 {
        return Err(read_failure(stream).await);
    }
    let mut offered = vec![0u8; usize::from(count)];
    stream.read_exact(&mut offered).await?;

    if offered.contains(&SECURITY_NONE) {
        stream.write_u8(SECURITY_NONE).await?;
        if version == ProtocolVersion::V3_8 {
            let result = stream.read_u32().await?;
            if result != 0 {
                return Err(read_failure(stream).await);
            }
        }
        return Ok(());
    }

    if !offered.contains(&SECURITY_VNC_AUTH) {
        return Err(unsupported_security(&offered));
    }
    let password = password.ok_or(PilotError::PasswordRequired)?;
    stream.write_u8(SECURITY_VNC_AUTH).await?;
    authenticate(stream, version, password).await
}

/// VNC authentication: answer the 16-byte challenge, then read SecurityResult.
async fn authenticate<S>(stream: &mut S, version: ProtocolVersion, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut challenge = [0u8; 16];
    stream.read_exact(&mut challenge).await?;
    stream
        .write_all(&challenge_response(password, &challenge))
        .await?;
    debug!("VNC authentication response sent");

    match stream.read_u32().await? {
        0 => Ok(()),
        _ if version == ProtocolVersion::V3_8 => {
            let len = stream.read_u32().await?;
            let reason = read_string(stream, len as usize).await?;
            Err(PilotError::AuthFailed(reason))
        }
        _ => Err(PilotError::AuthFailed("password rejected".into())),
    }
}

/// DES-encrypt the challenge with the password as key.
///
/// The key is the first 8 password bytes, zero padded, with the bit order
/// of every byte reversed.
pub fn challenge_response(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (k, b) in key.iter_mut().zip(password.bytes()) {
        *k = b.reverse_bits();
    }
    let cipher = Des::new(&GenericArray::from(key));

    let mut response = *challenge;
    for block in response.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    response
}

fn unsupported_security(offered: &[u8]) -> PilotError {
    PilotError::Protocol(format!("no supported security type among {offered:?}"))
}

/// Read the reason string that follows a refusal.
async fn read_failure<S>(stream: &mut S) -> PilotError
where
    S: AsyncRead + Unpin,
{
    let reason = match stream.read_u32().await {
        Ok(len) => read_string(stream, len as usize).await.ok(),
        Err(_) => None,
    };
    PilotError::Protocol(format!(
        "server refused connection: {}",
        reason.unwrap_or_else(|| "no reason given".into())
    ))
}

async fn read_string<S>(stream: &mut S, len: usize) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    if len > 64 * 1024 {
        return Err(PilotError::Protocol(format!("string of {len} bytes")));
    }
    let mut bytes = vec![0u8; len];
    stream.read_exact(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
