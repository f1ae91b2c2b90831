use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::config::MAX_MESSAGE_SIZE;
use crate::ctap2::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the maximum message size")]
    FrameTooLarge(u32),
}

/// Read one `u32 BE length || payload` frame. `Ok(None)` on clean EOF
/// before the length prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len as usize > MAX_MESSAGE_SIZE {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError> {
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// One request frame in, one response frame out, until the peer hangs up.
pub async fn serve_connection<S>(mut stream: S, dispatcher: Arc<Dispatcher>) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(request) = read_frame(&mut stream).await? {
        let response = dispatcher.dispatch(&request).await;
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

/// Accept loop. Each connection is served on its own task; all share one
/// dispatcher and therefore one authenticator.
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> Result<(), TransportError> {
    tracing::info!(addr = %listener.local_addr()?, "Local transport listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "Client connected");
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            match serve_connection(stream, dispatcher).await {
                Ok(()) => tracing::debug!(%peer, "Client disconnected"),
                Err(e) => tracing::warn!(%peer, error = %e, "Connection closed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &[0x04]).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(vec![0x04]));
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes()).await.unwrap();
        assert!(matches!(read_frame(&mut b).await, Err(TransportError::FrameTooLarge(7610))));
    }
}
