use crate::{Error, Result};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};

/// ID carried by unsolicited server traffic (chat, join/leave notices).
pub(crate) const PASSIVE_ID: i32 = 0;
/// ID of the duplicate-buffer artifact the server emits; always dropped.
pub(crate) const DISCARD_ID: i32 = 1;
/// First ID handed out to caller-issued commands. 0 and 1 are reserved.
pub(crate) const FIRST_COMMAND_ID: i32 = 2;

/// Kind of package sent to the server. `Command` and `Validation` share a
/// wire code; they differ only in how the session treats them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PackageType {
    Auth,
    Command,
    Validation,
}

impl PackageType {
    pub(crate) fn wire_code(self) -> i32 {
        match self {
            PackageType::Auth => 3,
            PackageType::Command | PackageType::Validation => 2,
        }
    }
}

/// One length-prefixed unit of the wire protocol.
///
/// Layout: `i32 size | i32 id | i32 type | body bytes | 0x00 | 0x00`, with
/// `size = 8 + body.len() + 2` and every integer little-endian on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub id: i32,
    pub ty: i32,
    pub body: String,
}

impl Frame {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let size = 4 + 4 + body.len() + 2;

        let mut buf = Vec::with_capacity(size + 4);
        buf.extend_from_slice(&(size as i32).to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.ty.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }
}

/// Decode one full frame from the stream. The size prefix is consumed and
/// validated for presence only; the body's NUL terminators delimit it.
pub(crate) async fn decode<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Frame> {
    decode_size(stream).await?;
    let id = read_i32(stream).await?;
    let ty = read_i32(stream).await?;
    let body = decode_body(stream).await?;
    Ok(Frame { id, ty, body })
}

/// Read the 4-byte little-endian size prefix.
///
/// Some servers leak the two bytes `0xEF 0xBF` ahead of the size field. When
/// that happens the two bytes that followed them are really the low half of
/// the size, so shift them down and pull two more bytes to complete it.
pub(crate) async fn decode_size<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i32> {
    let mut raw = [0u8; 4];
    read_exact(stream, &mut raw).await?;

    if raw[0] == 0xEF && raw[1] == 0xBF {
        raw[0] = raw[2];
        raw[1] = raw[3];

        let mut rest = [0u8; 2];
        read_exact(stream, &mut rest).await?;
        raw[2] = rest[0];
        raw[3] = rest[1];
    }

    Ok(i32::from_le_bytes(raw))
}

/// Read the body up to (and excluding) its NUL terminator, then require the
/// second trailing NUL.
pub(crate) async fn decode_body<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String> {
    let mut body = Vec::new();
    loop {
        let byte = read_u8(stream).await?;
        if byte == 0 {
            break;
        }
        body.push(byte);
    }

    if read_u8(stream).await? != 0 {
        return Err(Error::IllegalProtocol(
            "frame body missing second trailing NUL".into(),
        ));
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

async fn read_i32<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i32> {
    let mut raw = [0u8; 4];
    read_exact(stream, &mut raw).await?;
    Ok(i32::from_le_bytes(raw))
}

async fn read_u8<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u8> {
    let mut raw = [0u8; 1];
    read_exact(stream, &mut raw).await?;
    Ok(raw[0])
}

// A stream that ends mid-frame has lost protocol alignment for good.
async fn read_exact<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).await.map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            Error::IllegalProtocol("stream ended mid-frame".into())
        } else {
            Error::Io(err)
        }
    })?;
    Ok(())
}
