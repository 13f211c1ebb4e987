//! Tests for the tokio runtime, using real localhost sockets.

use crate::*;

use futures::future::pending;
use std::io::Result as IoResult;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Write all of `buf` onto `h`.
async fn write_all<H: SocketHandle>(h: &H, mut buf: &[u8]) -> IoResult<()> {
    while !buf.is_empty() {
        let n = h.write(buf).await?;
        buf = &buf[n..];
    }
    Ok(())
}

/// Fill all of `buf` from `h`, failing on EOF.
async fn read_exact<H: SocketHandle>(h: &H, buf: &mut [u8]) -> IoResult<()> {
    let mut got = 0;
    while got < buf.len() {
        let n = h.read(&mut buf[got..]).await?;
        assert!(n > 0, "unexpected EOF");
        got += n;
    }
    Ok(())
}

/// Return a localhost address with an OS-chosen port.
fn localhost() -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0).into()
}

/// Open a listener and a connection to it; return (client, server).
async fn connected_pair(rt: &TokioRuntimeHandle) -> IoResult<(TcpHandle, TcpHandle)> {
    let listener = rt.listen(&localhost()).await?;
    let addr = listener.local_addr()?;
    let (accepted, connected) = futures::join!(listener.accept(), rt.connect(&addr));
    let (server, peer) = accepted?;
    let client = connected?;
    assert_eq!(peer, client.local_addr()?);
    assert_eq!(client.peer_addr()?, addr);
    Ok((client, server))
}

#[test]
fn small_timeout_ok() {
    test_with_runtime(|rt| async move {
        let one_day = Duration::from_secs(86400);
        let outcome = rt.timeout(one_day, async { 413_u32 }).await;
        assert_eq!(outcome, Ok(413));
    });
}

#[test]
fn small_timeout_expire() {
    test_with_runtime(|rt| async move {
        let one_micros = Duration::from_micros(1);
        let outcome = rt.timeout(one_micros, pending::<()>()).await;
        let e = outcome.unwrap_err();
        assert_eq!(e.limit(), one_micros);
        assert_eq!(e.to_string(), "Timed out after 1µs");
    });
}

#[test]
fn missing_timeout_never_fires() {
    test_with_runtime(|rt| async move {
        let outcome = rt.timeout_opt(None, async { "done" }).await;
        assert_eq!(outcome, Ok("done"));
    });
}

#[test]
fn self_connect() -> IoResult<()> {
    test_with_runtime(|rt| async move {
        let (client, server) = connected_pair(&rt).await?;

        write_all(&client, b"Hello world").await?;
        let mut buf = [0_u8; 11];
        read_exact(&server, &mut buf[..]).await?;
        assert_eq!(&buf, b"Hello world");

        write_all(&server, b"xyz").await?;
        // The bytes may take a moment to show up on the other side.
        let mut avail = 0;
        for _ in 0..100 {
            avail = client.available()?;
            if avail == 3 {
                break;
            }
            rt.sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(avail, 3);
        // Closing with unread data would make the kernel send a reset.
        let mut xyz = [0_u8; 3];
        read_exact(&client, &mut xyz[..]).await?;
        assert_eq!(&xyz, b"xyz");
        assert_eq!(client.available()?, 0);

        client.close()?;
        // The server sees EOF once the client is gone.
        let mut rest = [0_u8; 8];
        assert_eq!(server.read(&mut rest[..]).await?, 0);
        server.close()?;
        Ok(())
    })
}

#[test]
fn shutdown_wakes_reader() -> IoResult<()> {
    test_with_runtime(|rt| async move {
        let (client, _server) = connected_pair(&rt).await?;

        let (read_result, shutdown_result) = futures::join!(
            async {
                let mut buf = [0_u8; 4];
                client.read(&mut buf[..]).await
            },
            async {
                rt.sleep(Duration::from_millis(20)).await;
                client.shutdown(Shutdown::Both)
            }
        );
        shutdown_result?;
        assert_eq!(read_result?, 0);
        Ok(())
    })
}
