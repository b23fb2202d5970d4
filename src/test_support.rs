//! Websocket stub and polling helper shared by the async tests. HTTP
//! backends are mocked with `httpmock` in each test module.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFrames {
    Close,
    HoldOpen,
}

pub struct WsStub {
    pub base_url: String,
    pub accepted: Arc<AtomicUsize>,
    pub requested_paths: Arc<Mutex<Vec<String>>>,
}

impl WsStub {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Accepts websocket clients, sends `frames` to each, then closes or keeps
/// the socket open until the client leaves.
pub async fn spawn_ws_stub(frames: Vec<Message>, after: AfterFrames) -> WsStub {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ws stub listener should bind");
    let address = listener.local_addr().expect("ws stub address");
    let accepted = Arc::new(AtomicUsize::new(0));
    let requested_paths = Arc::new(Mutex::new(Vec::new()));
    let frames = Arc::new(frames);

    let accept_counter = Arc::clone(&accepted);
    let path_log = Arc::clone(&requested_paths);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let frames = Arc::clone(&frames);
            let accept_counter = Arc::clone(&accept_counter);
            let path_log = Arc::clone(&path_log);
            tokio::spawn(async move {
                let callback = move |request: &Request,
                                     response: Response|
                      -> Result<Response, ErrorResponse> {
                    path_log.lock().push(request.uri().to_string());
                    Ok(response)
                };
                let Ok(mut socket) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    return;
                };
                accept_counter.fetch_add(1, Ordering::SeqCst);

                for frame in frames.iter() {
                    if socket.send(frame.clone()).await.is_err() {
                        return;
                    }
                }

                match after {
                    AfterFrames::Close => {
                        let _ = socket.close(None).await;
                    }
                    AfterFrames::HoldOpen => {
                        while let Some(message) = socket.next().await {
                            if message.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    WsStub {
        base_url: format!("ws://{address}"),
        accepted,
        requested_paths,
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
