//! Bidirectional byte relay shared by local_forward, remote_forward, and
//! the SOCKS5 server (§4.1, §4.2).
//!
//! Two copy tasks move bytes in each direction. The relay terminates when
//! either copy returns or cancellation fires; at that point both
//! directions are aborted and the accumulated byte counts are returned.
//! No I/O error from either direction propagates out of this function.
//! Callers log at the `ConnectionLog` level, not here.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

async fn copy_loop<R, W>(mut reader: R, mut writer: W, counter: Arc<AtomicU64>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
    writer.shutdown().await.ok();
    Ok(())
}

/// Relay bytes between `a` and `b` until either side closes or `cancel`
/// fires. Returns `(bytes_b_to_a, bytes_a_to_b)`.
pub async fn run<A, B>(a: A, b: B, cancel: CancellationToken) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);

    let a_to_b_bytes = Arc::new(AtomicU64::new(0));
    let b_to_a_bytes = Arc::new(AtomicU64::new(0));

    let c1 = a_to_b_bytes.clone();
    let mut a_to_b = tokio::spawn(copy_loop(ar, bw, c1));
    let c2 = b_to_a_bytes.clone();
    let mut b_to_a = tokio::spawn(copy_loop(br, aw, c2));

    tokio::select! {
        _ = &mut a_to_b => { b_to_a.abort(); }
        _ = &mut b_to_a => { a_to_b.abort(); }
        _ = cancel.cancelled() => {
            a_to_b.abort();
            b_to_a.abort();
        }
    }

    (b_to_a_bytes.load(Ordering::Relaxed), a_to_b_bytes.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relays_until_one_side_closes() {
        let (mut client_a, a) = duplex(64);
        let (mut client_b, b) = duplex(64);

        let handle = tokio::spawn(run(a, b, CancellationToken::new()));

        client_a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(client_a);
        drop(client_b);

        let (b_to_a, a_to_b) = handle.await.unwrap();
        assert_eq!(a_to_b, 5);
        assert_eq!(b_to_a, 0);
    }

    #[tokio::test]
    async fn cancellation_terminates_the_relay() {
        let (client_a, a) = duplex(64);
        let (_client_b, b) = duplex(64);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(a, b, cancel.clone()));
        cancel.cancel();
        let (_b_to_a, _a_to_b) = handle.await.unwrap();
        drop(client_a);
    }
}
