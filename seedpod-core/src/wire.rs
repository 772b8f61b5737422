//! Envelope codec. Framing: length-prefix (4 bytes LE) + bincode payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LEN_SIZE: usize = 4;
/// Upper bound on one envelope. Whole-file uploads travel in a single frame.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024; // 64 MiB

/// Encode an envelope into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameDecodeError> {
    bincode::deserialize(payload).map_err(FrameDecodeError::Decode)
}

/// Error decoding a frame: oversized length prefix or bincode failure.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Outcome of reading one frame off a stream.
#[derive(Debug)]
pub enum ReadFrame<T> {
    Message(T),
    /// A whole frame arrived but its payload is not a valid envelope.
    /// The stream stays aligned on the next frame.
    Malformed(FrameDecodeError),
    /// Peer closed the stream cleanly before a new frame.
    Closed,
}

/// Read exactly one frame from `reader`.
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<ReadFrame<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; LEN_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadFrame::Closed),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            FrameDecodeError::TooLarge,
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(match decode_payload(&payload) {
        Ok(msg) => ReadFrame::Message(msg),
        Err(e) => ReadFrame::Malformed(e),
    })
}

/// Write an already-encoded frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Payload, Request, Response, Status};

    fn sample_request() -> Request {
        Request::ping("hello")
    }

    async fn read_one<T: DeserializeOwned>(reader: &mut &[u8]) -> ReadFrame<T> {
        read_frame(reader).await.unwrap()
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error_not_a_message() {
        let frame = encode_frame(&sample_request()).unwrap();
        let mut short = &frame[..frame.len() - 1];
        let err = read_frame::<_, Request>(&mut short).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

        let mut empty: &[u8] = &[];
        assert!(matches!(read_one::<Request>(&mut empty).await, ReadFrame::Closed));
    }

    #[tokio::test]
    async fn consecutive_envelopes_on_one_stream() {
        let a = sample_request();
        let b = Response::text(Status::Ok, "pong");
        let mut buf = encode_frame(&a).unwrap();
        buf.extend_from_slice(&encode_frame(&b).unwrap());
        let mut reader = &buf[..];

        match read_one::<Request>(&mut reader).await {
            ReadFrame::Message(m) => assert_eq!(m.operation, "PING"),
            other => panic!("unexpected {:?}", other),
        }
        match read_one::<Response>(&mut reader).await {
            ReadFrame::Message(m) => assert_eq!(m.message, Payload::Text("pong".into())),
            other => panic!("unexpected {:?}", other),
        }
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn oversized_length_prefix_rejected() {
        let frame = (MAX_FRAME_LEN + 1).to_le_bytes();
        let mut reader = &frame[..];
        let err = read_frame::<_, Request>(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn stream_read_reports_malformed_then_continues() {
        let mut bytes = 2u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xff]);
        bytes.extend_from_slice(&encode_frame(&sample_request()).unwrap());
        let mut reader = &bytes[..];

        let first: ReadFrame<Request> = read_frame(&mut reader).await.unwrap();
        assert!(matches!(first, ReadFrame::Malformed(FrameDecodeError::Decode(_))));
        let second: ReadFrame<Request> = read_frame(&mut reader).await.unwrap();
        assert!(matches!(second, ReadFrame::Message(r) if r.operation == "PING"));
        let third: ReadFrame<Request> = read_frame(&mut reader).await.unwrap();
        assert!(matches!(third, ReadFrame::Closed));
    }
}
