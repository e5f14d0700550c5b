
use std::sync::atomic::Ordering;
use std::time::Duration;

use harness::{eventually, payload, ProxyHandle, RecordingBackend, TcpEchoBackend};
use rstest::rstest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WITHIN: Duration = Duration::from_secs(5);

#[rstest]
#[case::single_byte(1)]
#[case::one_buffer(8192)]
#[case::many_buffers(256 * 1024 + 17)]
#[tokio::test]
async fn client_bytes_arrive_unmodified(#[case] len: usize) {
    let backend = RecordingBackend::spawn(Vec::new(), false).await.unwrap();
    let proxy = ProxyHandle::spawn(&[backend.addr]).await;
    let sent = payload(len, 3);

    let mut client = TcpStream::connect(proxy.listen_addr()).await.unwrap();
    client.write_all(&sent).await.unwrap();
    client.shutdown().await.unwrap();

    let mut rest = Vec::new();
    let _ = timeout(WITHIN, client.read_to_end(&mut rest)).await;

    let mut received = Vec::new();
    assert!(
        eventually(WITHIN, || {
            received = backend.received.try_lock().map(|r| r.clone()).unwrap_or_default();
            !received.is_empty()
        })
        .await,
        "backend should record the connection"
    );
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], sent);
}

#[rstest]
#[case::single_byte(1)]
#[case::one_buffer(8192)]
#[case::many_buffers(256 * 1024 + 17)]
#[tokio::test]
async fn upstream_bytes_arrive_unmodified(#[case] len: usize) {
    let sent = payload(len, 11);
    let backend = RecordingBackend::spawn(sent.clone(), true).await.unwrap();
    let proxy = ProxyHandle::spawn(&[backend.addr]).await;

    let mut client = TcpStream::connect(proxy.listen_addr()).await.unwrap();
    let mut received = Vec::new();
    timeout(WITHIN, client.read_to_end(&mut received))
        .await
        .expect("upstream close should reach the client")
        .unwrap();

    assert_eq!(received, sent);
}

#[tokio::test]
async fn concurrent_connections_stay_independent() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(&[backend.addr]).await;
    let addr = proxy.listen_addr();

    let mut clients = Vec::new();
    for i in 0..16u8 {
        clients.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let message = payload(4096 + i as usize, i);
            let (mut reader, mut writer) = stream.split();

            let write = async {
                writer.write_all(&message).await.unwrap();
            };
            let read = async {
                let mut echoed = vec![0u8; message.len()];
                reader.read_exact(&mut echoed).await.unwrap();
                echoed
            };
            let ((), echoed) = tokio::join!(write, read);
            assert_eq!(echoed, message, "client {} got foreign bytes", i);
        }));
    }

    for client in clients {
        timeout(WITHIN, client).await.expect("client finished").unwrap();
    }

    assert_eq!(backend.connection_count(), 16);
    assert_eq!(
        proxy.stats[0].connections_accepted.load(Ordering::Relaxed),
        16
    );
}

#[tokio::test]
async fn ping_round_trip_then_client_close() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let mut proxy = ProxyHandle::spawn(&[backend.addr]).await;

    let mut client = TcpStream::connect(proxy.listen_addr()).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(WITHIN, client.read_exact(&mut buf))
        .await
        .expect("echo arrives")
        .unwrap();
    assert_eq!(&buf, b"ping");

    drop(client);

    assert!(
        eventually(WITHIN, || backend.closed_count() == 1).await,
        "upstream connection should close after the client leaves"
    );
    assert!(
        eventually(WITHIN, || {
            proxy.stats[0].connections_closed.load(Ordering::Relaxed) == 1
        })
        .await
    );

    assert_eq!(
        proxy
            .lines("[ClientID:1]summary: copy to upstream 4 bytes, exit err: nil")
            .len(),
        1
    );
    assert_eq!(
        proxy.lines("[ClientID:1]summary: copy to client 4 bytes").len(),
        1
    );
    assert_eq!(proxy.lines("[ClientID:1]state: Closed").len(), 1);

    let exits = proxy.stop(WITHIN).await;
    assert_eq!(exits.len(), 1);
}

#[tokio::test]
async fn payload_tap_logs_hex() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn_with(&[backend.addr], true).await;

    let mut client = TcpStream::connect(proxy.listen_addr()).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(WITHIN, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"ping");

    assert_eq!(proxy.lines("[ClientID:1]recv:70 69 6E 67").len(), 1);
    assert_eq!(proxy.lines("[ClientID:1]send:70 69 6E 67").len(), 1);
}

#[tokio::test]
async fn pairs_forward_to_their_own_upstream() {
    let first = RecordingBackend::spawn(b"first".to_vec(), true).await.unwrap();
    let second = RecordingBackend::spawn(b"second".to_vec(), true).await.unwrap();
    let proxy = ProxyHandle::spawn(&[first.addr, second.addr]).await;

    for (addr, expected) in proxy
        .listen_addrs
        .iter()
        .zip([b"first".as_slice(), b"second".as_slice()])
    {
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut greeting = Vec::new();
        timeout(WITHIN, client.read_to_end(&mut greeting))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(greeting, expected);
    }
}
