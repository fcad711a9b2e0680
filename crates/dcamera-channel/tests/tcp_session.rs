//! Sessions over a loopback TCP connection

use dcamera_channel::{
    ChannelEvent, DCameraCommand, SessionConfig, SessionFlag, SoftbusSession, deserialize,
    serialize, tcp,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn connected_pair(
    flag: SessionFlag,
) -> (
    (Arc<SoftbusSession>, mpsc::Receiver<ChannelEvent>),
    (Arc<SoftbusSession>, mpsc::Receiver<ChannelEvent>),
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (accepted, connected) = tokio::join!(tcp::accept(&listener), tcp::connect(&addr));
    let (sink_rx, sink_tx) = accepted.unwrap();
    let (source_rx, source_tx) = connected.unwrap();
    (
        SoftbusSession::open("cam", flag, SessionConfig::default(), sink_rx, sink_tx),
        SoftbusSession::open("cam", flag, SessionConfig::default(), source_rx, source_tx),
    )
}

async fn next_data(events: &mut mpsc::Receiver<ChannelEvent>) -> Vec<u8> {
    loop {
        match events.recv().await.unwrap() {
            ChannelEvent::Data(data) => return data,
            ChannelEvent::Connected => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_large_frame_crosses_tcp_intact() {
    let ((_sink, mut sink_events), (source, _source_events)) =
        connected_pair(SessionFlag::DataContinue).await;

    // Spans several fragments
    let frame: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8).collect();
    source.send_data(&frame).await.unwrap();
    source.send_data(&[7; 16]).await.unwrap();

    assert_eq!(next_data(&mut sink_events).await, frame);
    assert_eq!(next_data(&mut sink_events).await, vec![7; 16]);
}

#[tokio::test]
async fn test_control_command_round_trip() {
    let ((sink, mut sink_events), (source, mut source_events)) =
        connected_pair(SessionFlag::Control).await;

    source
        .send_data(&serialize(&DCameraCommand::stop_capture("cam")).unwrap())
        .await
        .unwrap();
    let command = deserialize(&next_data(&mut sink_events).await).unwrap();
    assert_eq!(command, DCameraCommand::stop_capture("cam"));

    sink.send_data(&serialize(&DCameraCommand::get_info("cam")).unwrap())
        .await
        .unwrap();
    let reply = deserialize(&next_data(&mut source_events).await).unwrap();
    assert_eq!(reply.dh_id, "cam");
}

#[tokio::test]
async fn test_peer_close_is_reported() {
    let ((_sink, mut sink_events), (source, _source_events)) =
        connected_pair(SessionFlag::DataSnapshot).await;

    source.close();
    assert!(source.send_data(&[1]).await.is_err());
    drop(source);
    loop {
        match sink_events.recv().await.unwrap() {
            ChannelEvent::Disconnected => break,
            ChannelEvent::Connected => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
}
