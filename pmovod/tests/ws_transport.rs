//! WebSocket transport against a local tokio-tungstenite server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pmovod::{
    session_channel, ChannelConnector, ChannelEvent, ClientMessage, DisconnectReason, MediaSink,
    ReadyState, Segment, ServerMessage, SessionEventKind, SessionNotifier, SinkError, SinkEvent,
    TimeRange, VodConfig, VodPlayer, WireFrame, WsConnector,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::{accept_async, tungstenite::Message};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(data) => Message::Binary(data.into()),
    }
}

async fn bind() -> (TcpListener, String) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/vod", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn test_connector_exchanges_frames() {
    let (listener, url) = bind().await;

    let (start_tx, start_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a text frame");
        };
        start_tx
            .send(ClientMessage::decode(text.as_str()).unwrap())
            .unwrap();

        let info = ServerMessage::MediaInfo(pmovod::MediaInfo {
            duration: 90.0,
            thumbnail_template: None,
        });
        ws.send(to_message(info.encode().unwrap())).await.unwrap();
        let data = ServerMessage::Data(Segment::new(7, vec![1, 2, 3]));
        ws.send(to_message(data.encode().unwrap())).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let (sender, mut rx) = session_channel();
    let mut connector = WsConnector::new(&url).unwrap();
    let mut handle = connector.connect(sender.notifier(pmovod::Generation(3)));
    handle
        .send(ClientMessage::Start(pmovod::StartRequest {
            file: "/movies/a.mp4".to_string(),
            offset: 12.0,
            speed: 1.0,
        }))
        .unwrap();

    let mut events = Vec::new();
    while events.len() < 4 {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.generation, pmovod::Generation(3));
        match event.kind {
            SessionEventKind::Channel(e) => events.push(e),
            other => panic!("unexpected {:?}", other),
        }
    }

    match start_rx.await.unwrap() {
        ClientMessage::Start(request) => {
            assert_eq!(request.file, "/movies/a.mp4");
            assert_eq!(request.offset, 12.0);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(events[0], ChannelEvent::Connected);
    assert!(matches!(
        &events[1],
        ChannelEvent::Message(ServerMessage::MediaInfo(info)) if info.duration == 90.0
    ));
    assert_eq!(
        events[2],
        ChannelEvent::Message(ServerMessage::Data(Segment::new(7, vec![1, 2, 3])))
    );
    assert_eq!(
        events[3],
        ChannelEvent::Disconnected(DisconnectReason::ServerDisconnect)
    );
    handle.close();
}

#[tokio::test]
async fn test_refused_connection_reports_failure() {
    let (listener, url) = bind().await;
    drop(listener);

    let (sender, mut rx) = session_channel();
    let mut connector = WsConnector::new(&url).unwrap();
    let _handle = connector.connect(sender.notifier(pmovod::Generation(1)));

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .unwrap();
    assert!(matches!(
        event.kind,
        SessionEventKind::Channel(ChannelEvent::ConnectFailed(_))
    ));
}

/// Sink completing every append immediately.
#[derive(Default)]
struct InstantSinkState {
    notifier: Option<SessionNotifier>,
    ready: Option<ReadyState>,
    has_target: bool,
    appended: Vec<Bytes>,
}

#[derive(Clone, Default)]
struct InstantSink(Arc<Mutex<InstantSinkState>>);

impl InstantSink {
    fn state(&self) -> std::sync::MutexGuard<'_, InstantSinkState> {
        self.0.lock().unwrap()
    }
}

impl MediaSink for InstantSink {
    fn attach(&mut self, notifier: SessionNotifier) {
        notifier.post_sink(SinkEvent::SourceOpen);
        let mut state = self.state();
        state.notifier = Some(notifier);
        state.ready = Some(ReadyState::Open);
    }

    fn detach(&mut self) {
        let mut state = self.state();
        state.notifier = None;
        state.ready = Some(ReadyState::Closed);
        state.has_target = false;
    }

    fn clear_source(&mut self) {}

    fn add_append_target(&mut self, _codec: &str) -> Result<(), SinkError> {
        self.state().has_target = true;
        Ok(())
    }

    fn has_append_target(&self) -> bool {
        self.state().has_target
    }

    fn append(&mut self, payload: Bytes) -> Result<(), SinkError> {
        let mut state = self.state();
        state.appended.push(payload);
        if let Some(notifier) = &state.notifier {
            notifier.post_sink(SinkEvent::UpdateEnd);
        }
        Ok(())
    }

    fn is_updating(&self) -> bool {
        false
    }

    fn ready_state(&self) -> ReadyState {
        self.state().ready.unwrap_or(ReadyState::Closed)
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        self.state().ready = Some(ReadyState::Ended);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        0.0
    }

    fn set_current_time(&mut self, _seconds: f64) {}

    fn buffered(&self) -> Vec<TimeRange> {
        Vec::new()
    }

    fn play(&mut self) {}

    fn pause(&mut self) {}
}

#[tokio::test]
async fn test_player_end_to_end() {
    let (listener, url) = bind().await;

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let mut received = Vec::new();

        // start
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            received.push(ClientMessage::decode(text.as_str()).unwrap());
        }
        for seq in 1..=5u64 {
            let data = ServerMessage::Data(Segment::new(seq, vec![seq as u8; 16]));
            ws.send(to_message(data.encode().unwrap())).await.unwrap();
        }
        ws.send(to_message(ServerMessage::Eos.encode().unwrap()))
            .await
            .unwrap();
        while received.len() < 6 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    received.push(ClientMessage::decode(text.as_str()).unwrap())
                }
                Some(Ok(_)) => {}
                _ => break,
            }
        }
        let _ = done_tx.send(received);
        // keep the connection up until the player closes it
        while let Some(Ok(_)) = ws.next().await {}
    });

    let sink = InstantSink::default();
    let config = VodConfig {
        server_url: url,
        reconnect: false,
        ..VodConfig::default()
    };
    let player = VodPlayer::spawn(config, Box::new(sink.clone())).unwrap();
    let events = player.subscribe();
    player
        .set_source("http://vod.local/movies/a.mp4")
        .await
        .unwrap();
    player.play().await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("timed out")
        .unwrap();

    match &received[0] {
        ClientMessage::Start(request) => {
            assert_eq!(request.file, "/movies/a.mp4");
            assert_eq!(request.offset, 0.0);
            assert_eq!(request.speed, 1.0);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        received[1..].to_vec(),
        (1..=5).map(ClientMessage::Ack).collect::<Vec<_>>()
    );

    for _ in 0..200 {
        if sink.state().ready == Some(ReadyState::Ended) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let appended: Vec<u8> = sink.state().appended.iter().map(|p| p[0]).collect();
    assert_eq!(appended, vec![1, 2, 3, 4, 5]);
    assert_eq!(sink.state().ready, Some(ReadyState::Ended));
    assert!(events
        .try_iter()
        .any(|e| e == pmovod::PlayerEvent::EndOfStream));

    player.shutdown().await.unwrap();
}
