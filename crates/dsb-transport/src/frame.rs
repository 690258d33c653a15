//! Length-prefixed framing for the reliable link.
//!
//! ```text
//! [4 bytes: payload length (u32 big-endian)] [N bytes: JSON envelope]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames. EOF inside the length header is an error.
pub async fn read_frame<R>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader
            .read(&mut len_buf[filled..])
            .await
            .map_err(TransportError::Receive)?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::Receive(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream closed after {filled} of 4 length bytes"),
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(TransportError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(TransportError::Receive)?;

    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_are_read_back_in_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"first").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        write_frame(&mut client, b"third").await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server, 64).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut server, 64).await.unwrap().unwrap(), b"");
        assert_eq!(read_frame(&mut server, 64).await.unwrap().unwrap(), b"third");
        assert!(read_frame(&mut server, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &[0u8; 100]).await.unwrap();

        match read_frame(&mut server, 64).await {
            Err(TransportError::MessageTooLarge { size, max }) => {
                assert_eq!(size, 100);
                assert_eq!(max, 64);
            }
            other => panic!("expected MessageTooLarge, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_length_header_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[0u8, 0]).await.unwrap();
        drop(client);

        match read_frame(&mut server, 64).await {
            Err(TransportError::Receive(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected Receive, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn header_split_across_writes_is_reassembled() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let reader = tokio::spawn(async move { read_frame(&mut server, 64).await });

        client.write_all(&[0u8, 0]).await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(&[0u8, 2]).await.unwrap();
        client.write_all(b"ok").await.unwrap();

        let frame = reader.await.unwrap().unwrap();
        assert_eq!(frame.as_deref(), Some(&b"ok"[..]));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server, 64).await,
            Err(TransportError::Receive(_))
        ));
    }
}
