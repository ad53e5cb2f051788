use std::net::SocketAddr;
use std::time::Duration;

use tck_manager::{Command, ManagerConfig, ManagerError, TestManager, TestManagerHandle};
use tck_wire::{handshake_bytes, Code, CommandFrame, Envelope, JsonSplitter, Message, Status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"))
        .is_test(true)
        .try_init();
}

async fn start_manager(
    request_timeout_ms: u64,
    notification_capacity: usize,
) -> TestManagerHandle {
    let config = ManagerConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        request_timeout_ms,
        notification_capacity,
    };
    TestManager::bind(config).await.expect("bind manager").spawn().expect("spawn manager")
}

async fn connect_agent(manager: &TestManagerHandle, sdk: &str) -> TcpStream {
    let mut stream = TcpStream::connect(manager.local_addr()).await.expect("connect");
    stream.write_all(&handshake_bytes(sdk).expect("handshake")).await.expect("write handshake");
    assert!(manager.wait_for_sdk(sdk, Duration::from_secs(2)).await, "{sdk} registered");
    stream
}

async fn read_command(stream: &mut TcpStream, splitter: &mut JsonSplitter) -> CommandFrame {
    let mut buffer = [0u8; 4096];
    loop {
        let n = stream.read(&mut buffer).await.expect("read command");
        assert!(n > 0, "manager closed the connection");
        if let Some(object) = splitter.push(&buffer[..n]).expect("split").into_iter().next() {
            return CommandFrame::parse(&object).expect("command frame");
        }
    }
}

async fn write_envelope(stream: &mut TcpStream, envelope: Envelope) {
    stream.write_all(&envelope.to_json_bytes().expect("json")).await.expect("write envelope");
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    let read =
        timeout(Duration::from_secs(2), stream.read(&mut byte)).await.expect("closed in time");
    assert!(matches!(read, Ok(0) | Err(_)), "expected connection close, read {read:?}");
}

#[tokio::test]
async fn first_frame_must_be_handshake() {
    init_logging();
    let manager = start_manager(1_000, 16).await;

    let mut stream = TcpStream::connect(manager.local_addr()).await.expect("connect");
    write_envelope(&mut stream, Envelope::status(&Status::ok()).expect("envelope")).await;
    assert_closed(&mut stream).await;
    assert!(manager.connected_sdks().is_empty());

    manager.shutdown();
}

#[tokio::test]
async fn request_returns_the_agents_status() {
    init_logging();
    let manager = start_manager(2_000, 16).await;
    let mut agent = connect_agent(&manager, "  Rust ").await;
    assert!(manager.has_sdk_connection("RUST"));
    assert_eq!(manager.connected_sdks(), vec!["rust".to_string()]);

    let responder = tokio::spawn(async move {
        let mut splitter = JsonSplitter::new();
        let frame = read_command(&mut agent, &mut splitter).await;
        assert_eq!(frame.command, Command::RegisterListener);
        assert_eq!(frame.message.source, "topic:door");
        let status = Status::fail(Code::NotFound, "no such listener");
        write_envelope(&mut agent, Envelope::status(&status).expect("envelope")).await;
        agent
    });

    let status = manager
        .request("rust", Command::RegisterListener, &Message::publish("topic:door", Vec::new()))
        .await
        .expect("status");
    assert_eq!(status, Status::fail(Code::NotFound, "no such listener"));
    responder.await.expect("responder");

    manager.shutdown();
}

#[tokio::test]
async fn handshake_and_notification_in_one_segment() {
    init_logging();
    let manager = start_manager(2_000, 16).await;

    let message = Message::publish("topic:door", b"open".to_vec());
    let mut bytes = handshake_bytes("java").expect("handshake");
    let envelope = Envelope::on_receive(&message).expect("envelope");
    bytes.extend_from_slice(&envelope.to_json_bytes().expect("json"));

    let mut stream = TcpStream::connect(manager.local_addr()).await.expect("connect");
    stream.write_all(&bytes).await.expect("write");
    assert!(manager.wait_for_sdk("java", Duration::from_secs(2)).await);

    let received = manager.get_onreceive("java").await.expect("notification");
    assert_eq!(received, message);

    manager.shutdown();
}

#[tokio::test]
async fn envelope_split_across_writes_is_reassembled() {
    init_logging();
    let manager = start_manager(2_000, 16).await;
    let mut stream = connect_agent(&manager, "python").await;

    let message = Message::publish("topic:door", vec![7; 300]);
    let bytes = Envelope::on_receive(&message).expect("envelope").to_json_bytes().expect("json");
    let (head, tail) = bytes.split_at(bytes.len() / 2);
    stream.write_all(head).await.expect("write head");
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(tail).await.expect("write tail");

    assert_eq!(manager.get_onreceive("python").await.expect("notification"), message);

    manager.shutdown();
}

#[tokio::test]
async fn notifications_are_fifo_and_bounded() {
    init_logging();
    let manager = start_manager(2_000, 2).await;
    let mut stream = connect_agent(&manager, "cpp").await;

    let messages: Vec<Message> =
        (0u8..3).map(|n| Message::publish("topic:door", vec![n])).collect();
    for message in &messages {
        write_envelope(&mut stream, Envelope::on_receive(message).expect("envelope")).await;
    }

    timeout(Duration::from_secs(2), async {
        while manager.pending_notifications("cpp") < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queued");
    // Give the third envelope time to land and evict the first.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(manager.get_onreceive("cpp").await.expect("second"), messages[1]);
    assert_eq!(manager.get_onreceive("cpp").await.expect("third"), messages[2]);
    let empty = manager.get_onreceive_within("cpp", Duration::from_millis(50)).await;
    assert!(matches!(empty, Err(ManagerError::Timeout { .. })));

    manager.shutdown();
}

#[tokio::test]
async fn notifications_survive_agent_disconnect() {
    init_logging();
    let manager = start_manager(2_000, 16).await;
    let mut agent = connect_agent(&manager, "rust").await;

    let message = Message::publish("topic:door", b"last words".to_vec());
    write_envelope(&mut agent, Envelope::on_receive(&message).expect("envelope")).await;
    timeout(Duration::from_secs(2), async {
        while manager.pending_notifications("rust") < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queued");

    drop(agent);
    timeout(Duration::from_secs(2), async {
        while manager.has_sdk_connection("rust") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("unregistered");

    assert_eq!(manager.get_onreceive("rust").await.expect("queued notification"), message);
    let drained = manager.get_onreceive_within("rust", Duration::from_millis(50)).await;
    assert!(matches!(drained, Err(ManagerError::Disconnected(name)) if name == "rust"));
    let never = manager.get_onreceive_within("go", Duration::from_millis(50)).await;
    assert!(matches!(never, Err(ManagerError::UnknownSdk(name)) if name == "go"));

    manager.shutdown();
}

#[tokio::test]
async fn status_before_a_stray_byte_still_answers_the_request() {
    init_logging();
    let manager = start_manager(2_000, 16).await;
    let mut agent = connect_agent(&manager, "rust").await;

    let responder = tokio::spawn(async move {
        let mut splitter = JsonSplitter::new();
        read_command(&mut agent, &mut splitter).await;
        let envelope = Envelope::status(&Status::ok()).expect("envelope");
        let mut bytes = envelope.to_json_bytes().expect("json");
        bytes.push(b'x');
        agent.write_all(&bytes).await.expect("write status");
        assert_closed(&mut agent).await;
    });

    let status = manager
        .request("rust", Command::Send, &Message::publish("topic:door", Vec::new()))
        .await
        .expect("status delivered before the protocol error");
    assert_eq!(status, Status::ok());
    responder.await.expect("responder");

    manager.shutdown();
}

#[tokio::test]
async fn unanswered_request_times_out() {
    init_logging();
    let manager = start_manager(100, 16).await;
    let _agent = connect_agent(&manager, "rust").await;

    let err = manager
        .request("rust", Command::Send, &Message::publish("topic:door", Vec::new()))
        .await
        .expect_err("timeout");
    assert!(err.is_timeout(), "unexpected {err}");

    manager.shutdown();
}

#[tokio::test]
async fn unknown_sdk_is_reported() {
    init_logging();
    let manager = start_manager(100, 16).await;

    let err = manager
        .request("go", Command::Send, &Message::publish("topic:door", Vec::new()))
        .await
        .expect_err("unknown");
    assert!(matches!(err, ManagerError::UnknownSdk(name) if name == "go"));

    manager.shutdown();
}

#[tokio::test]
async fn agent_disconnect_fails_waiting_request() {
    init_logging();
    let manager = start_manager(5_000, 16).await;
    let mut agent = connect_agent(&manager, "rust").await;

    let dropper = tokio::spawn(async move {
        let mut splitter = JsonSplitter::new();
        read_command(&mut agent, &mut splitter).await;
        drop(agent);
    });

    let err = manager
        .request("rust", Command::InvokeMethod, &Message::publish("topic:door", Vec::new()))
        .await
        .expect_err("disconnected");
    assert!(matches!(err, ManagerError::Disconnected(_)), "unexpected {err}");
    dropper.await.expect("dropper");

    timeout(Duration::from_secs(2), async {
        while manager.has_sdk_connection("rust") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("unregistered");

    manager.shutdown();
}

#[tokio::test]
async fn duplicate_name_is_rejected() {
    init_logging();
    let manager = start_manager(1_000, 16).await;
    let _first = connect_agent(&manager, "rust").await;

    let mut second = TcpStream::connect(manager.local_addr()).await.expect("connect");
    second.write_all(&handshake_bytes("RUST").expect("handshake")).await.expect("write");
    assert_closed(&mut second).await;
    assert!(manager.has_sdk_connection("rust"));

    manager.shutdown();
}

#[tokio::test]
async fn close_connection_unregisters_and_closes() {
    init_logging();
    let manager = start_manager(1_000, 16).await;
    let mut agent = connect_agent(&manager, "rust").await;

    assert!(manager.close_connection("Rust"));
    assert!(!manager.has_sdk_connection("rust"));
    assert!(!manager.close_connection("rust"));
    assert_closed(&mut agent).await;

    let err = manager
        .request("rust", Command::Send, &Message::publish("topic:door", Vec::new()))
        .await
        .expect_err("closed");
    assert!(matches!(err, ManagerError::UnknownSdk(_)));

    manager.shutdown();
}

#[tokio::test]
async fn unknown_action_closes_connection() {
    init_logging();
    let manager = start_manager(1_000, 16).await;
    let mut agent = connect_agent(&manager, "rust").await;

    write_envelope(&mut agent, Envelope::wrap("teleport", b"")).await;
    assert_closed(&mut agent).await;
    timeout(Duration::from_secs(2), async {
        while manager.has_sdk_connection("rust") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("unregistered");

    manager.shutdown();
}
