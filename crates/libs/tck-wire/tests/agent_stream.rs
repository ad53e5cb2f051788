use tck_wire::{
    handshake_bytes, AgentFrame, Code, Envelope, JsonSplitter, Message, Status, WireError,
};

fn agent_stream() -> (Vec<u8>, Message) {
    let notification = Message::publish("topic:door", b"open".to_vec());
    let mut bytes = handshake_bytes("Rust").expect("handshake");
    bytes.extend_from_slice(b"\n");
    let status = Envelope::status(&Status::fail(Code::NotFound, "none")).expect("status");
    bytes.extend_from_slice(&status.to_json_bytes().expect("json"));
    let on_receive = Envelope::on_receive(&notification).expect("onReceive");
    bytes.extend_from_slice(&on_receive.to_json_bytes().expect("json"));
    (bytes, notification)
}

#[test]
fn stream_split_at_every_offset_yields_same_frames() {
    let (bytes, notification) = agent_stream();
    let expected = vec![
        AgentFrame::Handshake { sdk_name: "rust".into() },
        AgentFrame::Status(Status::fail(Code::NotFound, "none")),
        AgentFrame::OnReceive(notification),
    ];

    for split in 0..=bytes.len() {
        let mut splitter = JsonSplitter::new();
        let mut objects = splitter.push(&bytes[..split]).expect("head");
        objects.extend(splitter.push(&bytes[split..]).expect("tail"));
        let frames: Vec<AgentFrame> =
            objects.iter().map(|object| AgentFrame::parse(object).expect("frame")).collect();
        assert_eq!(frames, expected, "split at {split}");
        assert_eq!(splitter.pending(), 0);
    }
}

#[test]
fn corrupt_base64_is_a_frame_error() {
    let object = r#"{"action":"uStatus","message":"***"}"#;
    assert!(matches!(AgentFrame::parse(object), Err(WireError::Base64(_))));
}
