//! In-process stand-ins for doppler and UAA.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use firehose_core::Envelope;

/// Path and `Authorization` header of one upgrade request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub authorization: Option<String>,
}

/// What the fake firehose does after sending its envelopes.
#[derive(Clone)]
pub enum AfterSend {
    HoldOpen,
    Close(CloseFrame<'static>),
    /// Keep the socket alive with pings at this interval, nothing else.
    Ping(Duration),
}

pub struct FakeFirehose {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
}

impl FakeFirehose {
    /// Serve `envelopes` on every accepted connection.
    pub async fn start(envelopes: Vec<Envelope>, after: AfterSend) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let frames: Vec<Vec<u8>> = envelopes.iter().map(Envelope::encode_to_vec).collect();

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen.clone();
                let frames = frames.clone();
                let after = after.clone();

                tokio::spawn(async move {
                    let callback = |req: &WsRequest,
                                    resp: WsResponse|
                     -> Result<WsResponse, ErrorResponse> {
                        seen.lock().unwrap().push(SeenRequest {
                            path: req.uri().path().to_string(),
                            authorization: req
                                .headers()
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string),
                        });
                        Ok(resp)
                    };
                    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                        return;
                    };

                    for frame in frames {
                        if ws.send(Message::Binary(frame)).await.is_err() {
                            return;
                        }
                    }

                    match after {
                        AfterSend::HoldOpen => while let Some(Ok(_)) = ws.next().await {},
                        AfterSend::Close(frame) => {
                            let _ = ws.close(Some(frame)).await;
                            while let Some(Ok(_)) = ws.next().await {}
                        }
                        AfterSend::Ping(every) => loop {
                            tokio::time::sleep(every).await;
                            if ws.send(Message::Ping(b"keepalive".to_vec())).await.is_err() {
                                return;
                            }
                        },
                    }
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Captured token request.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

pub struct FakeUaa {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<TokenRequest>>>,
}

impl FakeUaa {
    /// Answer every request with `status` and `reply`.
    pub async fn start(status: StatusCode, reply: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(None));

        let (h, l) = (hits.clone(), last.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (hits, last) = (h.clone(), l.clone());
                let svc = service_fn(move |req: Request<Incoming>| {
                    let (hits, last) = (hits.clone(), last.clone());
                    async move {
                        let method = req.method().to_string();
                        let path = req.uri().path().to_string();
                        let authorization = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let body = req.into_body().collect().await.unwrap().to_bytes();

                        *last.lock().unwrap() = Some(TokenRequest {
                            method,
                            path,
                            authorization,
                            body: String::from_utf8_lossy(&body).into_owned(),
                        });
                        hits.fetch_add(1, Ordering::SeqCst);

                        let resp = Response::builder()
                            .status(status)
                            .header("content-type", "application/json")
                            .body(Full::new(Bytes::from_static(reply.as_bytes())))
                            .unwrap();
                        Ok::<_, Infallible>(resp)
                    }
                });

                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });

        Self { addr, hits, last }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<TokenRequest> {
        self.last.lock().unwrap().clone()
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
