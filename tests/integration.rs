//! Integration tests for netdde-client.
//!
//! Each test runs the real client against an in-process fake server on an
//! ephemeral TCP port, scripted frame by frame.

use std::time::Duration;

use netdde_client::protocol::{packet_type, ASYNC_PACKET_ID};
use netdde_client::{format, ClientEvent, ClientOptions, DdeData, NetDdeClient, NetDdeError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

fn client_for(port: u16) -> NetDdeClient {
    NetDdeClient::new(
        "EXCEL",
        ClientOptions {
            host: "127.0.0.1".to_owned(),
            port,
            computer: Some("roadrunner".to_owned()),
            user: Some("guilherme".to_owned()),
            process: Some("NetDDEClient.exe".to_owned()),
            response_timeout: TEST_TIMEOUT,
        },
    )
    .unwrap()
}

async fn bind_server() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Read one frame, returning `(type, id, payload)`, or `None` on EOF.
async fn read_frame(stream: &mut TcpStream) -> Option<(u32, u32, Vec<u8>)> {
    let mut header = [0u8; 12];
    stream.read_exact(&mut header).await.ok()?;
    let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_type = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let id = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).await.ok()?;
    Some((packet_type, id, payload))
}

fn frame(packet_type: u32, id: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(12 + payload.len());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&packet_type.to_le_bytes());
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn cstring(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + value.len() + 1);
    bytes.extend_from_slice(&(value.len() as u32 + 1).to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    bytes
}

fn connect_ack(id: u32, result: bool) -> Vec<u8> {
    let mut payload = vec![u8::from(result)];
    payload.extend(cstring("v2.0"));
    frame(packet_type::NETDDE_CLIENT_CONNECT, id, &payload)
}

fn create_ack(id: u32, handle: u32, conv_id: u32) -> Vec<u8> {
    let mut payload = vec![1u8];
    payload.extend_from_slice(&handle.to_le_bytes());
    payload.extend_from_slice(&conv_id.to_le_bytes());
    frame(packet_type::DDE_CREATE_CONVERSATION, id, &payload)
}

fn request_ack(id: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![1u8];
    payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
    payload.extend_from_slice(data);
    frame(packet_type::DDE_REQUEST, id, &payload)
}

fn result_ack(packet_type_value: u32, id: u32, result: bool) -> Vec<u8> {
    frame(packet_type_value, id, &[u8::from(result)])
}

fn advise_notice(handle: u32, item: &str, format_id: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&handle.to_le_bytes());
    payload.extend(cstring(item));
    payload.extend_from_slice(&format_id.to_le_bytes());
    payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
    payload.extend_from_slice(data);
    payload.push(1);
    frame(packet_type::DDE_ADVISE, ASYNC_PACKET_ID, &payload)
}

/// Accept a connection and answer the connect handshake.
async fn accept_and_greet(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
    assert_eq!(packet_type_value, packet_type::NETDDE_CLIENT_CONNECT);
    stream.write_all(&connect_ack(id, true)).await.unwrap();
    stream
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    matches_event: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    timeout(TEST_TIMEOUT, async {
        loop {
            let event = events.recv().await.unwrap();
            if matches_event(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

#[tokio::test]
async fn handshake_then_request_roundtrip() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;

        let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_CREATE_CONVERSATION);
        stream
            .write_all(&create_ack(id, 0x0200_0580, 1))
            .await
            .unwrap();

        let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_REQUEST);
        stream
            .write_all(&request_ack(id, b"bar\r\n\0"))
            .await
            .unwrap();

        stream
    });

    let client = client_for(port);
    let version = client.connect().await.unwrap();
    assert_eq!(version, "v2.0");
    assert!(client.is_connected());

    let value = client
        .request("[Book1.xlsx]Sheet1", "r1c1", format::CF_TEXT)
        .await
        .unwrap();
    assert_eq!(value, DdeData::Text("bar\r\n".to_owned()));

    let _stream = server.await.unwrap();
}

#[tokio::test]
async fn rejected_handshake_fails_connect() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream.write_all(&connect_ack(id, false)).await.unwrap();
        stream
    });

    let client = client_for(port);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, NetDdeError::ServerRefused(_)));
    assert!(!client.is_connected());

    let _stream = server.await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_share_one_conversation() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;

        let mut creates = 0u32;
        let mut requests = 0u32;
        while requests < 2 {
            let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
            match packet_type_value {
                packet_type::DDE_CREATE_CONVERSATION => {
                    creates += 1;
                    stream
                        .write_all(&create_ack(id, 0x0500_0580, 3))
                        .await
                        .unwrap();
                }
                packet_type::DDE_REQUEST => {
                    requests += 1;
                    stream.write_all(&request_ack(id, b"v\0")).await.unwrap();
                }
                other => panic!("unexpected packet type {other:#x}"),
            }
        }
        (creates, stream)
    });

    let client = client_for(port);
    client.connect().await.unwrap();

    let (first, second) = tokio::join!(
        client.request("[Book1.xlsx]Sheet1", "r1c1", format::CF_TEXT),
        client.request("[Book1.xlsx]Sheet1", "r1c2", format::CF_TEXT),
    );
    assert_eq!(first.unwrap(), DdeData::Text("v".to_owned()));
    assert_eq!(second.unwrap(), DdeData::Text("v".to_owned()));

    let (creates, _stream) = server.await.unwrap();
    assert_eq!(creates, 1, "concurrent callers must share one creation");
}

#[tokio::test]
async fn graceful_disconnect_destroys_conversations() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;

        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&create_ack(id, 0x0200_0580, 1))
            .await
            .unwrap();

        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&result_ack(packet_type::DDE_POKE, id, true))
            .await
            .unwrap();

        // disconnect sequence: destroy-conversation, then client-disconnect,
        // both fire-and-forget, then the client half-closes
        let (packet_type_value, _, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_DESTROY_CONVERSATION);
        let (packet_type_value, _, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::NETDDE_CLIENT_DISCONNECT);
        assert!(read_frame(&mut stream).await.is_none());
        drop(stream); // close our side; the client observes the close

        // a fresh session starts from empty conversation tables, so the
        // same topic must be created again
        let mut stream = accept_and_greet(&listener).await;
        let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_CREATE_CONVERSATION);
        stream
            .write_all(&create_ack(id, 0x0600_0580, 9))
            .await
            .unwrap();
        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&result_ack(packet_type::DDE_POKE, id, true))
            .await
            .unwrap();
        stream
    });

    let client = client_for(port);
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    client
        .poke("[Book1.xlsx]Sheet1", "r1c1", format::CF_TEXT, "foo")
        .await
        .unwrap();

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
    wait_for_event(&mut events, |event| matches!(event, ClientEvent::Closed)).await;

    client.connect().await.unwrap();
    client
        .poke("[Book1.xlsx]Sheet1", "r1c1", format::CF_TEXT, "bar")
        .await
        .unwrap();

    let _stream = server.await.unwrap();
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;

        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&create_ack(id, 0x0200_0580, 1))
            .await
            .unwrap();

        // swallow the item request and never answer
        let (packet_type_value, _, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_REQUEST);
        std::future::pending::<()>().await;
    });

    let client = NetDdeClient::new(
        "EXCEL",
        ClientOptions {
            host: "127.0.0.1".to_owned(),
            port,
            response_timeout: Duration::from_millis(150),
            ..ClientOptions::default()
        },
    )
    .unwrap();

    client.connect().await.unwrap();
    let err = client
        .request("[Book1.xlsx]Sheet1", "r1c1", format::CF_TEXT)
        .await
        .unwrap_err();
    assert!(matches!(err, NetDdeError::ResponseTimeout(t) if t == packet_type::DDE_REQUEST));

    // only that one call failed; the session is still up
    assert!(client.is_connected());

    server.abort();
}

#[tokio::test]
async fn advise_updates_reach_subscribers() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;

        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&create_ack(id, 0x0500_0580, 3))
            .await
            .unwrap();

        let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_START_ADVISE);
        stream
            .write_all(&result_ack(packet_type::DDE_START_ADVISE, id, true))
            .await
            .unwrap();

        stream
            .write_all(&advise_notice(
                0x0500_0580,
                "r1c1:r3c2",
                format::CF_TEXT,
                b"foo\tbar\r\n\0",
            ))
            .await
            .unwrap();

        stream
    });

    let client = client_for(port);
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    client
        .advise("[Book1.xlsx]Sheet1", "r1c1:r3c2", format::CF_TEXT, false)
        .await
        .unwrap();

    let event = wait_for_event(&mut events, |event| {
        matches!(event, ClientEvent::Advise(_))
    })
    .await;
    let ClientEvent::Advise(update) = event else {
        unreachable!()
    };
    assert_eq!(update.topic, "[Book1.xlsx]Sheet1");
    assert_eq!(update.item, "r1c1:r3c2");
    assert_eq!(update.format, format::CF_TEXT);
    assert_eq!(update.data, DdeData::Text("foo\tbar\r\n".to_owned()));

    let _stream = server.await.unwrap();
}

#[tokio::test]
async fn advise_for_unknown_handle_is_an_observer_error() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;
        stream
            .write_all(&advise_notice(0xDEAD, "r1c1", format::CF_TEXT, b"x\0"))
            .await
            .unwrap();
        stream
    });

    let client = client_for(port);
    let mut events = client.subscribe();
    client.connect().await.unwrap();

    let event = wait_for_event(&mut events, |event| {
        matches!(event, ClientEvent::Error(_))
    })
    .await;
    let ClientEvent::Error(error) = event else {
        unreachable!()
    };
    assert!(error.to_string().contains("unknown handle"));

    // observer-level error only; the session survives
    assert!(client.is_connected());

    let _stream = server.await.unwrap();
}

#[tokio::test]
async fn conversation_disconnect_detaches_topic() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;

        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&create_ack(id, 0x0011, 5))
            .await
            .unwrap();
        let (_, id, _) = read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&result_ack(packet_type::DDE_EXECUTE, id, true))
            .await
            .unwrap();

        // server closes the conversation
        stream
            .write_all(&frame(
                packet_type::DDE_DISCONNECT,
                ASYNC_PACKET_ID,
                &0x0011u32.to_le_bytes(),
            ))
            .await
            .unwrap();

        // the next execute must re-create the conversation
        let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_CREATE_CONVERSATION);
        stream.write_all(&create_ack(id, 0x0022, 6)).await.unwrap();
        let (packet_type_value, id, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::DDE_EXECUTE);
        stream
            .write_all(&result_ack(packet_type::DDE_EXECUTE, id, true))
            .await
            .unwrap();

        stream
    });

    let client = client_for(port);
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    client.execute("[Book1.xlsx]Sheet1", "baz").await.unwrap();

    let event = wait_for_event(&mut events, |event| {
        matches!(event, ClientEvent::TopicDisconnect(_))
    })
    .await;
    let ClientEvent::TopicDisconnect(topic) = event else {
        unreachable!()
    };
    assert_eq!(topic, "[Book1.xlsx]Sheet1");

    client.execute("[Book1.xlsx]Sheet1", "baz").await.unwrap();

    let _stream = server.await.unwrap();
}

#[tokio::test]
async fn server_disconnect_notice_closes_the_session() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;

        stream
            .write_all(&frame(
                packet_type::NETDDE_SERVER_DISCONNECT,
                ASYNC_PACKET_ID,
                &[],
            ))
            .await
            .unwrap();

        // the client answers with its disconnect notice and half-closes
        let (packet_type_value, _, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(packet_type_value, packet_type::NETDDE_CLIENT_DISCONNECT);
        assert!(read_frame(&mut stream).await.is_none());
    });

    let client = client_for(port);
    let mut events = client.subscribe();
    client.connect().await.unwrap();

    wait_for_event(&mut events, |event| matches!(event, ClientEvent::Closed)).await;
    assert!(!client.is_connected());

    server.await.unwrap();
}

#[tokio::test]
async fn transport_loss_interrupts_pending_requests() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_and_greet(&listener).await;
        // read the create-conversation request, then drop the connection
        let (_, _, _) = read_frame(&mut stream).await.unwrap();
    });

    let client = NetDdeClient::new(
        "EXCEL",
        ClientOptions {
            host: "127.0.0.1".to_owned(),
            port,
            response_timeout: Duration::ZERO, // no per-request timers
            ..ClientOptions::default()
        },
    )
    .unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();

    let err = client
        .request("[Book1.xlsx]Sheet1", "r1c1", format::CF_TEXT)
        .await
        .unwrap_err();
    assert!(matches!(err, NetDdeError::Interrupted));

    wait_for_event(&mut events, |event| matches!(event, ClientEvent::Closed)).await;
    assert!(!client.is_connected());

    server.await.unwrap();
}
