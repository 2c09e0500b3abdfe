use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use uuid::Uuid;

use crate::dest::{ResultPage, ResultPages};
use crate::error::{MigrateError, Result};
use crate::model::Statement;

/// Serialization announced in front of every request frame.
pub const GRAPHSON_MIME: &str = "application/vnd.gremlin-v2.0+json";

const STATUS_SUCCESS: u16 = 200;
const STATUS_NO_CONTENT: u16 = 204;
const STATUS_PARTIAL_CONTENT: u16 = 206;
const STATUS_AUTHENTICATE: u16 = 407;
const REQUEST_CHARGE: &str = "x-ms-request-charge";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Slot = Arc<Mutex<Option<Socket>>>;

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    #[serde(rename = "requestId")]
    request_id: Uuid,
    op: &'a str,
    processor: &'a str,
    args: Value,
}

fn eval_request(request_id: Uuid, statement: &str) -> RequestMessage<'static> {
    RequestMessage {
        request_id,
        op: "eval",
        processor: "",
        args: json!({
            "gremlin": statement,
            "language": "gremlin-groovy",
            "bindings": {},
        }),
    }
}

fn auth_request(request_id: Uuid, sasl: &str) -> RequestMessage<'static> {
    RequestMessage {
        request_id,
        op: "authentication",
        processor: "",
        args: json!({
            "SASL": sasl,
            "saslMechanism": "PLAIN",
        }),
    }
}

/// Encodes a request as a binary frame: mime length byte, mime, JSON body.
fn request_frame(message: &RequestMessage<'_>) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut frame = Vec::with_capacity(1 + GRAPHSON_MIME.len() + body.len());
    frame.push(GRAPHSON_MIME.len() as u8);
    frame.extend_from_slice(GRAPHSON_MIME.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// SASL PLAIN payload: `\0<username>\0<password>`, base64 encoded.
fn sasl_plain(username: &str, password: &str) -> String {
    let mut raw = Vec::with_capacity(2 + username.len() + password.len());
    raw.push(0);
    raw.extend_from_slice(username.as_bytes());
    raw.push(0);
    raw.extend_from_slice(password.as_bytes());
    BASE64.encode(raw)
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(rename = "requestId", default)]
    request_id: Option<Uuid>,
    status: Status,
    #[serde(default)]
    result: Option<ResponseResult>,
}

#[derive(Debug, Deserialize)]
struct Status {
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseResult {
    #[serde(default)]
    data: Value,
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Page { page: ResultPage, more: bool },
    Authenticate,
    Failed { code: u16, message: String },
}

fn classify(response: Response) -> Outcome {
    let charge = response
        .status
        .attributes
        .get(REQUEST_CHARGE)
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let page = |data: Value| ResultPage {
        items: items(data),
        request_charge: charge,
    };
    match response.status.code {
        STATUS_PARTIAL_CONTENT => Outcome::Page {
            page: page(response.result.unwrap_or_default().data),
            more: true,
        },
        STATUS_SUCCESS | STATUS_NO_CONTENT => Outcome::Page {
            page: page(response.result.unwrap_or_default().data),
            more: false,
        },
        STATUS_AUTHENTICATE => Outcome::Authenticate,
        code => Outcome::Failed {
            code,
            message: response.status.message,
        },
    }
}

/// Unwraps GraphSON `g:List` envelopes and bare arrays into result items.
fn items(data: Value) -> Vec<Value> {
    match data {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) if map.contains_key("@value") => {
            match map.remove("@value").unwrap_or(Value::Null) {
                Value::Array(items) => items,
                other => vec![other],
            }
        }
        other => vec![other],
    }
}

fn decode(message: Message) -> Result<Option<Response>> {
    let bytes = match message {
        Message::Text(text) => text.as_bytes().to_vec(),
        Message::Binary(bytes) => bytes.to_vec(),
        Message::Close(frame) => {
            return Err(MigrateError::Transport(format!(
                "server closed the connection: {frame:?}"
            )))
        }
        _ => return Ok(None),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Gremlin server client speaking GraphSON v2 over WebSockets.
///
/// Keeps one connection slot per worker. A submission takes a slot for as
/// long as its result pages are being read; slots are dialled lazily and
/// emptied when their connection fails.
pub struct GremlinClient {
    url: String,
    sasl: Arc<str>,
    slots: Vec<Slot>,
    next: AtomicUsize,
}

impl GremlinClient {
    /// Client for the graph `collection` of `database` at `url`.
    pub fn new(
        url: &str,
        database: &str,
        collection: &str,
        auth_key: &str,
        connections: usize,
    ) -> Self {
        let username = format!("/dbs/{database}/colls/{collection}");
        Self {
            url: url.to_string(),
            sasl: Arc::from(sasl_plain(&username, auth_key)),
            slots: (0..connections.max(1))
                .map(|_| Arc::new(Mutex::new(None)))
                .collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Number of connection slots.
    pub fn connections(&self) -> usize {
        self.slots.len()
    }

    /// Sends `statement` for evaluation and returns a cursor over its pages.
    pub async fn submit(&self, statement: &Statement) -> Result<Box<dyn ResultPages>> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = Arc::clone(&self.slots[index]).lock_owned().await;
        if slot.is_none() {
            let (socket, _) = connect_async(self.url.as_str())
                .await
                .map_err(|err| MigrateError::Transport(format!("{}: {err}", self.url)))?;
            debug!(slot = index, "dest.gremlin.connected");
            *slot = Some(socket);
        }

        let request_id = Uuid::new_v4();
        let frame = request_frame(&eval_request(request_id, statement.as_str()))?;
        let mut pages = GremlinPages {
            slot,
            request_id,
            statement: statement.clone(),
            sasl: Arc::clone(&self.sasl),
            done: false,
        };
        pages.send(frame).await?;
        Ok(Box::new(pages))
    }
}

struct GremlinPages {
    slot: OwnedMutexGuard<Option<Socket>>,
    request_id: Uuid,
    statement: Statement,
    sasl: Arc<str>,
    done: bool,
}

impl GremlinPages {
    fn socket(&mut self) -> Result<&mut Socket> {
        self.slot
            .as_mut()
            .ok_or_else(|| MigrateError::Transport("connection is closed".into()))
    }

    fn broken(&mut self, err: MigrateError) -> MigrateError {
        *self.slot = None;
        self.done = true;
        err
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        let sent = self.socket()?.send(Message::Binary(frame.into())).await;
        sent.map_err(|err| self.broken(MigrateError::Transport(err.to_string())))
    }

    async fn receive(&mut self) -> Result<Response> {
        loop {
            let next = self.socket()?.next().await;
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(self.broken(MigrateError::Transport(err.to_string()))),
                None => {
                    return Err(
                        self.broken(MigrateError::Transport("connection closed by server".into()))
                    )
                }
            };
            let decoded = decode(message).map_err(|err| self.broken(err))?;
            match decoded {
                Some(response) if response.request_id == Some(self.request_id) => {
                    return Ok(response)
                }
                Some(response) => debug!(
                    request_id = ?response.request_id,
                    "dest.gremlin.stale_response"
                ),
                None => {}
            }
        }
    }
}

#[async_trait]
impl ResultPages for GremlinPages {
    fn has_more_results(&self) -> bool {
        !self.done
    }

    async fn next_page(&mut self) -> Result<ResultPage> {
        loop {
            let response = self.receive().await?;
            match classify(response) {
                Outcome::Page { page, more } => {
                    self.done = !more;
                    return Ok(page);
                }
                Outcome::Authenticate => {
                    let frame = request_frame(&auth_request(self.request_id, &self.sasl))?;
                    self.send(frame).await?;
                }
                Outcome::Failed { code, message } => {
                    self.done = true;
                    return Err(MigrateError::execution(
                        self.statement.as_str(),
                        format!("status {code}: {message}"),
                    ));
                }
            }
        }
    }
}
