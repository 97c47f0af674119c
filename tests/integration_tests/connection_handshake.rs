use std::time::Duration;

use cassandra_native_driver::{
    auth::NoneAuthProvider,
    connection::{Connection, ConnectionConfig, ConnectionState},
    protocol::{
        frame::{Direction, FrameDecoder, FrameFlags, encode_frame},
        opcode::Opcode,
        version::ProtocolVersion,
    },
};
use tokio::{io::AsyncWriteExt, net::TcpListener};

/// Spins up a bare TCP listener that speaks just enough CQL framing to
/// drive a `Connection` through STARTUP -> READY and one OPTIONS ->
/// SUPPORTED round trip, then drops the socket.
async fn fake_server(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.expect("accept");
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        use tokio::io::AsyncReadExt;
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.feed(&buf[..n]);

        while let Ok(Some((header, _body))) = decoder.try_decode(ProtocolVersion::V4) {
            let reply_opcode = match header.opcode {
                Opcode::Startup => Opcode::Ready,
                Opcode::Options => Opcode::Supported,
                _ => return,
            };
            let reply = encode_frame(
                ProtocolVersion::V4,
                Direction::Response,
                FrameFlags::empty(),
                header.stream,
                reply_opcode,
                // SUPPORTED carries a string multimap; an empty one decodes fine.
                if reply_opcode == Opcode::Supported { &[0x00, 0x00] } else { &[] },
            );
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::test]
async fn startup_reaches_ready_and_options_round_trips() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(fake_server(listener));

    let conn = Connection::connect(addr, ProtocolVersion::V4, ConnectionConfig::default())
        .await
        .expect("connect");
    assert_eq!(conn.state(), ConnectionState::Init);

    conn.startup("3.0.0", None, &NoneAuthProvider, None).await.expect("startup");
    assert_eq!(conn.state(), ConnectionState::Ready);

    let response = tokio::time::timeout(Duration::from_secs(2), conn.send(cassandra_native_driver::protocol::messages::Request::Options(
        cassandra_native_driver::protocol::messages::startup::Options,
    )))
    .await
    .expect("send did not time out")
    .expect("send succeeded");

    assert!(matches!(
        response,
        cassandra_native_driver::protocol::messages::Response::Supported(_)
    ));

    conn.close();
    assert!(conn.is_closed());
}
