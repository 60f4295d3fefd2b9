//! One WebSocket connection, one engine session.
//!
//! Incoming frames are read on the connection task. Each submission runs on
//! its own task so input frames keep flowing while a run waits for them. A
//! single writer task owns the socket's sending half and always drains live
//! engine events before run results, so a result never overtakes the output
//! that preceded it.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use codedash_core::{ClientMessage, EngineEvent, ExecutionEngine, ServerMessage, SessionId};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

pub async fn drive_connection<S, R, E>(engine: Arc<ExecutionEngine>, mut sink: S, mut stream: R)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let session = engine.open_session(event_tx);

    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                Some(event) = event_rx.recv() => ServerMessage::from(event),
                Some(message) = reply_rx.recv() => message,
                else => break,
            };
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    log::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                log::debug!("Client went away, stopping writer");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_text(&engine, session, text.as_str(), &reply_tx),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("WebSocket error on session {}: {}", session, e);
                break;
            }
        }
    }

    engine.close_session(session);
    drop(reply_tx);
    if let Err(e) = writer.await {
        log::warn!("Writer task for session {} failed: {}", session, e);
    }
}

fn handle_text(
    engine: &Arc<ExecutionEngine>,
    session: SessionId,
    text: &str,
    replies: &mpsc::UnboundedSender<ServerMessage>,
) {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Execute { code }) => {
            let engine = Arc::clone(engine);
            let replies = replies.clone();
            tokio::spawn(async move {
                let message = match engine.execute(session, &code).await {
                    Ok(result) => ServerMessage::from(result),
                    Err(e) => ServerMessage::from(&e),
                };
                if replies.send(message).is_err() {
                    log::debug!("Session {} closed before its result was sent", session);
                }
            });
        }
        Ok(ClientMessage::Input { value }) => {
            engine.supply_input(session, value);
        }
        Err(e) => {
            log::warn!("Ignoring message on session {}: {}", session, e);
            if replies.send(ServerMessage::error(e.to_string())).is_err() {
                log::debug!("Session {} closed before its error was sent", session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codedash_core::executors::{CodeRunner, DriverFrame, RunHandle, RunJob};
    use codedash_core::{EngineError, OutputStream};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::convert::Infallible;

    /// Pretends to run `x = input(); print(x)`, echoing whatever it is sent.
    struct EchoRunner;

    struct EchoHandle {
        frames: VecDeque<DriverFrame>,
    }

    #[async_trait]
    impl CodeRunner for EchoRunner {
        async fn launch(&self, _job: &RunJob) -> std::result::Result<Box<dyn RunHandle>, EngineError> {
            Ok(Box::new(EchoHandle {
                frames: VecDeque::from(vec![
                    DriverFrame::Compiled,
                    DriverFrame::InputRequest { prompt: "n? ".into() },
                ]),
            }))
        }
    }

    #[async_trait]
    impl RunHandle for EchoHandle {
        async fn next_frame(&mut self) -> std::result::Result<Option<DriverFrame>, EngineError> {
            Ok(self.frames.pop_front())
        }

        async fn reply(&mut self, value: &str) -> std::result::Result<(), EngineError> {
            self.frames.push_back(DriverFrame::Output {
                stream: OutputStream::Stdout,
                content: format!("{}\n", value),
            });
            self.frames.push_back(DriverFrame::Completed {
                bindings: [("x".to_string(), value.to_string())].into_iter().collect(),
            });
            Ok(())
        }

        async fn kill(&mut self) {}
    }

    struct Client {
        to_server: mpsc::UnboundedSender<Message>,
        from_server: mpsc::UnboundedReceiver<Message>,
    }

    impl Client {
        fn send(&self, value: Value) {
            self.to_server.send(Message::Text(value.to_string().into())).unwrap();
        }

        async fn recv(&mut self) -> Value {
            match self.from_server.recv().await {
                Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    fn connect(engine: Arc<ExecutionEngine>) -> (Client, tokio::task::JoinHandle<()>) {
        let (to_server, server_rx) = mpsc::unbounded_channel::<Message>();
        let (server_tx, from_server) = mpsc::unbounded_channel::<Message>();

        let stream = futures_util::stream::unfold(server_rx, |mut rx| async move {
            rx.recv().await.map(|message| (Ok::<_, Infallible>(message), rx))
        });
        let sink = futures_util::sink::unfold(server_tx, |tx, message: Message| async move {
            tx.send(message).map_err(|_| "closed")?;
            Ok::<_, &'static str>(tx)
        });

        let task = tokio::spawn(drive_connection(engine, Box::pin(sink), Box::pin(stream)));
        (Client { to_server, from_server }, task)
    }

    #[tokio::test]
    async fn interactive_round_trip() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(EchoRunner)));
        let (mut client, task) = connect(engine.clone());

        client.send(json!({"type": "execute_code", "code": "x = input('n? ')\nprint(x)"}));
        assert_eq!(
            client.recv().await,
            json!({"type": "interactive_input_request", "content": "n? "})
        );

        client.send(json!({"type": "input", "value": "5"}));
        assert_eq!(
            client.recv().await,
            json!({"type": "interactive_output", "content": "5\n"})
        );

        let result = client.recv().await;
        assert_eq!(result["type"], "execution_result");
        assert_eq!(result["success"], true);
        assert_eq!(result["status"], "success");
        assert_eq!(result["output"], "5\n");
        assert_eq!(result["interactive"], true);
        assert_eq!(result["variables"], json!({"x": "5"}));
        assert!(result["execution_time"].as_str().unwrap().ends_with('s'));

        drop(client);
        task.await.unwrap();
        assert_eq!(engine.router().session_count(), 0);
    }

    #[tokio::test]
    async fn busy_session_and_bad_messages_get_error_frames() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(EchoRunner)));
        let (mut client, _task) = connect(engine);

        client.send(json!({"code": "x = input()"}));
        assert_eq!(client.recv().await["type"], "interactive_input_request");

        client.send(json!({"code": "1 + 1"}));
        let rejected = client.recv().await;
        assert_eq!(rejected["type"], "error");
        assert!(rejected["error"].as_str().unwrap().contains("already has an execution in progress"));

        client.to_server.send(Message::Text("{not json".into())).unwrap();
        let invalid = client.recv().await;
        assert_eq!(invalid["type"], "error");
        assert!(invalid["error"].as_str().unwrap().starts_with("Invalid JSON message"));
    }

    #[tokio::test]
    async fn bad_message_after_the_writer_is_gone_is_dropped() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(EchoRunner)));
        let (events, _event_rx) = mpsc::unbounded_channel();
        let session = engine.open_session(events);
        let (replies, reply_rx) = mpsc::unbounded_channel();
        drop(reply_rx);

        handle_text(&engine, session, "{not json", &replies);

        assert_eq!(engine.router().session_count(), 1);
        assert!(replies.is_closed());
    }
}
