//! Per-client session loop.
//!
//! A [`Session`] owns the [`Connection`] it was handed, announces itself
//! with a config message, then processes client messages one at a time,
//! flushing pending outputs after each. It ends when the peer closes, when
//! the application asks it to close, or on a protocol violation.
//!
//! Every outbound message is one JSON object followed by `\n`, which frames
//! messages on line-oriented transports and is ignored by JSON parsers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use percent_encoding::utf8_percent_encode;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::messages::{
    ClientMessage, ConfigMessage, FlushMessage, InputMessage, ResponseBody, ResponseMessage,
    SessionConfig,
};
use super::handle::URL_SAFE;
use super::{Download, FileInfo, SessionHandle, SessionRegistry};
use crate::connection::{Connection, ConnectionError};
use crate::error::GatewayError;

/// Handler for a client method call: takes the call's `args`, returns the
/// response value or an error description.
pub type MessageHandler = Box<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

type EndedCallback = Box<dyn FnOnce() + Send>;

/// One client's session.
pub struct Session {
    id: String,
    conn: Box<dyn Connection>,
    handle: Arc<SessionHandle>,
    registry: Arc<SessionRegistry>,
    debug: bool,
    inputs: HashMap<String, Value>,
    outputs: Map<String, Value>,
    input_messages: Vec<InputMessage>,
    handlers: HashMap<String, MessageHandler>,
    on_ended: Vec<EndedCallback>,
    ended: bool,
}

impl Session {
    /// Creates a session for `conn` under a fresh id and registers it.
    pub async fn start(conn: Box<dyn Connection>, registry: Arc<SessionRegistry>, debug: bool) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let handle = Arc::new(SessionHandle::new(id.clone()));
        registry.insert(Arc::clone(&handle)).await;
        tracing::debug!(session = %id, "session created");

        Self {
            id,
            conn,
            handle,
            registry,
            debug,
            inputs: HashMap::new(),
            outputs: Map::new(),
            input_messages: Vec::new(),
            handlers: HashMap::new(),
            on_ended: Vec::new(),
            ended: false,
        }
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the last value the client sent for input `name`.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Queues an output value for the next flush.
    pub fn set_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    /// Queues a message for client-side input `id`.
    pub fn send_input_message(&mut self, id: impl Into<String>, message: Value) {
        self.input_messages.push(InputMessage {
            id: id.into(),
            message,
        });
    }

    /// Registers the handler for client calls to `method`.
    pub fn on_message<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(method.into(), Box::new(handler));
    }

    /// Registers a callback run once when the session ends.
    pub fn on_ended<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_ended.push(Box::new(callback));
    }

    /// Offers a download at `/session/{id}/download/{key}` and publishes
    /// its relative URL as output `key`.
    pub fn register_download(&mut self, key: impl Into<String>, download: Download) {
        let key = key.into();
        let url = format!(
            "session/{}/download/{}?w=",
            utf8_percent_encode(&self.id, URL_SAFE),
            utf8_percent_encode(&key, URL_SAFE)
        );
        self.handle.add_download(key.clone(), download);
        self.set_output(key, Value::String(url));
    }

    /// Runs the session until it ends, then runs its ended callbacks and
    /// unregisters it.
    ///
    /// # Errors
    ///
    /// A peer disconnect or a requested close is a normal end and returns
    /// `Ok`. Protocol violations and transport failures are returned.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let result = self.serve().await;
        self.end().await;
        match result {
            Err(GatewayError::Connection(ConnectionError::Closed)) => Ok(()),
            other => other,
        }
    }

    async fn serve(&mut self) -> Result<(), GatewayError> {
        let config = ConfigMessage {
            config: SessionConfig {
                worker_id: String::new(),
                session_id: self.id.clone(),
                user: None,
            },
        };
        self.send_json(&config).await?;

        loop {
            let received = tokio::select! {
                received = self.conn.receive() => received,
                () = self.handle.closed() => {
                    tracing::debug!(session = %self.id, "closing on request");
                    return self.conn.close().await.map_err(GatewayError::from);
                }
            };
            let text = received?;
            if self.debug {
                tracing::debug!(session = %self.id, message = %text, "recv");
            }
            if self.process(&text).await? {
                self.flush().await?;
            }
        }
    }

    /// Handles one client message. Returns `false` if it was skipped and
    /// no flush should follow.
    async fn process(&mut self, text: &str) -> Result<bool, GatewayError> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "ignoring invalid JSON message");
                return Ok(false);
            }
        };

        let Some(method) = message.method else {
            return Err(GatewayError::Protocol(
                "message does not contain 'method'".to_string(),
            ));
        };

        match method.as_str() {
            "init" | "update" => self.manage_inputs(message.data.unwrap_or_default())?,
            _ => {
                let Some(tag) = message.tag else {
                    return Err(GatewayError::Protocol(format!(
                        "cannot dispatch message with missing 'tag'; method: {method}"
                    )));
                };
                let Some(args) = message.args else {
                    return Err(GatewayError::Protocol(format!(
                        "cannot dispatch message with missing 'args'; method: {method}"
                    )));
                };
                self.dispatch(&method, tag, &args).await?;
            }
        }
        Ok(true)
    }

    fn manage_inputs(&mut self, data: Map<String, Value>) -> Result<(), GatewayError> {
        for (key, value) in data {
            let mut parts = key.split(':');
            let name = parts.next().unwrap_or_default().to_string();
            let kind = parts.next();
            if parts.next().is_some() {
                return Err(GatewayError::Protocol(format!(
                    "input name+type is not allowed to contain more than one ':' -- {key}"
                )));
            }
            if let Some(kind) = kind {
                tracing::trace!(session = %self.id, input = %name, kind, "typed input");
            }
            self.inputs.insert(name, value);
        }
        Ok(())
    }

    async fn dispatch(&mut self, method: &str, tag: Value, args: &[Value]) -> Result<(), GatewayError> {
        let outcome = match method {
            "uploadInit" => self.upload_init(args),
            "uploadEnd" => self.upload_end(args).await,
            _ => {
                let Some(handler) = self.handlers.get(method) else {
                    tracing::warn!(session = %self.id, method, "unknown method");
                    return Ok(());
                };
                handler(args)
            }
        };
        match outcome {
            Ok(value) => {
                let response = ResponseMessage {
                    response: ResponseBody { tag, value },
                };
                self.send_json(&response).await
            }
            Err(e) => {
                tracing::warn!(session = %self.id, method, error = %e, "method handler failed");
                Ok(())
            }
        }
    }

    /// `uploadInit(files)`: opens an upload job and tells the client where
    /// to POST the files.
    fn upload_init(&self, args: &[Value]) -> Result<Value, String> {
        let Some(list) = args.first() else {
            return Err("uploadInit expects a file list".to_string());
        };
        let files: Vec<FileInfo> =
            serde_json::from_value(list.clone()).map_err(|e| format!("invalid file list: {e}"))?;
        if self.debug {
            tracing::debug!(session = %self.id, files = ?files, "upload init");
        }
        let operation = self.handle.uploads().create(files).map_err(|e| e.to_string())?;
        Ok(json!({
            "jobId": operation.id(),
            "uploadUrl": format!("session/{}/upload/{}?w=", self.id, operation.id()),
        }))
    }

    /// `uploadEnd(job_id, input_id)`: finishes the job and sets the input to
    /// the received file list.
    async fn upload_end(&mut self, args: &[Value]) -> Result<Value, String> {
        let (Some(job_id), Some(input_id)) = (
            args.first().and_then(Value::as_str),
            args.get(1).and_then(Value::as_str),
        ) else {
            return Err("uploadEnd expects a job id and an input id".to_string());
        };
        match self.handle.uploads().finish(job_id).await {
            Some(files) => {
                let value = serde_json::to_value(files).map_err(|e| e.to_string())?;
                self.inputs.insert(input_id.to_string(), value);
            }
            None => tracing::warn!(session = %self.id, job = job_id, "uploadEnd for unknown upload job"),
        }
        Ok(Value::Null)
    }

    async fn flush(&mut self) -> Result<(), GatewayError> {
        let message = FlushMessage {
            errors: Map::new(),
            values: std::mem::take(&mut self.outputs),
            input_messages: std::mem::take(&mut self.input_messages),
        };
        self.send_json(&message).await
    }

    async fn send_json<T: Serialize + Sync>(&mut self, message: &T) -> Result<(), GatewayError> {
        let mut text = serde_json::to_string(message).map_err(|e| GatewayError::Internal(e.to_string()))?;
        if self.debug {
            tracing::debug!(session = %self.id, message = %text, "send");
        }
        text.push('\n');
        self.conn.send(&text).await?;
        Ok(())
    }

    async fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        for callback in self.on_ended.drain(..) {
            callback();
        }
        self.handle.uploads().remove_dir();
        self.registry.remove(&self.id).await;
        tracing::debug!(session = %self.id, "session ended");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("conn", &self.conn)
            .field("inputs", &self.inputs)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// In-memory connection: the test plays the client on the other end.
    #[derive(Debug)]
    struct ChannelConnection {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Connection for ChannelConnection {
        async fn send(&mut self, message: &str) -> Result<(), ConnectionError> {
            self.outbound
                .send(message.to_string())
                .map_err(|_| ConnectionError::Closed)
        }

        async fn receive(&mut self) -> Result<String, ConnectionError> {
            self.inbound.recv().await.ok_or(ConnectionError::Closed)
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            self.inbound.close();
            Ok(())
        }
    }

    struct Client {
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl Client {
        fn send(&self, value: Value) {
            let Ok(()) = self.tx.send(value.to_string()) else {
                panic!("session gone");
            };
        }

        async fn recv(&mut self) -> Value {
            let Some(text) = self.rx.recv().await else {
                panic!("session sent nothing");
            };
            let Ok(value) = serde_json::from_str(&text) else {
                panic!("session sent invalid JSON: {text}");
            };
            value
        }
    }

    async fn session() -> (Session, Client, Arc<SessionRegistry>) {
        let (client_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, client_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new());
        let conn = ChannelConnection { inbound, outbound };
        let session = Session::start(Box::new(conn), Arc::clone(&registry), false).await;
        (
            session,
            Client {
                tx: client_tx,
                rx: client_rx,
            },
            registry,
        )
    }

    #[tokio::test]
    async fn announces_config_then_flushes_after_each_message() {
        let (mut session, mut client, registry) = session().await;
        let id = session.id().to_string();
        assert_eq!(id.len(), 32);
        session.set_output("greeting", json!("hello"));
        let task = tokio::spawn(session.run());

        let config = client.recv().await;
        assert_eq!(config["config"]["sessionId"], json!(id));
        assert!(registry.get(&id).await.is_some());

        client.send(json!({"method": "init", "data": {"name": "ada", "n:number": 3}}));
        let flush = client.recv().await;
        assert_eq!(
            flush,
            json!({"errors": {}, "values": {"greeting": "hello"}, "inputMessages": []})
        );

        client.send(json!({"method": "update", "data": {"name": "bob"}}));
        let flush = client.recv().await;
        assert_eq!(flush["values"], json!({}));

        drop(client);
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(result.is_ok());
        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn invalid_json_is_skipped() {
        let (session, mut client, _registry) = session().await;
        let task = tokio::spawn(session.run());
        let _config = client.recv().await;

        let Ok(()) = client.tx.send("{not json".to_string()) else {
            panic!("session gone");
        };
        client.send(json!({"method": "update", "data": {}}));
        let flush = client.recv().await;
        assert_eq!(flush, json!({"errors": {}, "values": {}, "inputMessages": []}));

        drop(client);
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_method_ends_session_with_protocol_error() {
        let (mut session, mut client, registry) = session().await;
        let ended = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ended);
        session.on_ended(move || flag.store(true, Ordering::SeqCst));
        let id = session.id().to_string();
        let task = tokio::spawn(session.run());
        let _config = client.recv().await;

        client.send(json!({"data": {}}));
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(matches!(result, Err(GatewayError::Protocol(_))));
        assert!(ended.load(Ordering::SeqCst));
        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn input_name_with_two_colons_is_rejected() {
        let (session, mut client, _registry) = session().await;
        let task = tokio::spawn(session.run());
        let _config = client.recv().await;

        client.send(json!({"method": "init", "data": {"a:b:c": 1}}));
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(matches!(result, Err(GatewayError::Protocol(_))));
    }

    #[tokio::test]
    async fn dispatches_registered_methods() {
        let (mut session, mut client, _registry) = session().await;
        session.on_message("sum", |args| {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        });
        let task = tokio::spawn(session.run());
        let _config = client.recv().await;

        client.send(json!({"method": "sum", "tag": "t1", "args": [1, 2, 3]}));
        let response = client.recv().await;
        assert_eq!(response, json!({"response": {"tag": "t1", "value": 6}}));
        let _flush = client.recv().await;

        client.send(json!({"method": "nope", "tag": "t2", "args": []}));
        let flush = client.recv().await;
        assert!(flush.get("values").is_some());

        drop(client);
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn inputs_are_stored_without_type_suffix() {
        let (mut session, _client, _registry) = session().await;
        let mut data = Map::new();
        data.insert("x:weave.number".to_string(), json!(4));
        let Ok(()) = session.manage_inputs(data) else {
            panic!("inputs rejected");
        };
        assert_eq!(session.input("x"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn close_request_ends_session_cleanly() {
        let (session, mut client, registry) = session().await;
        let id = session.id().to_string();
        let task = tokio::spawn(session.run());
        let _config = client.recv().await;

        registry.close_all().await;
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(result.is_ok());
        assert!(registry.is_empty().await);
        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn every_message_ends_with_one_newline() {
        let (session, mut client, _registry) = session().await;
        let task = tokio::spawn(session.run());

        let Some(config) = client.rx.recv().await else {
            panic!("no config message");
        };
        assert!(config.ends_with('\n'));
        assert_eq!(config.matches('\n').count(), 1);

        client.send(json!({"method": "init", "data": {}}));
        let Some(flush) = client.rx.recv().await else {
            panic!("no flush message");
        };
        assert!(flush.ends_with("}\n"));

        drop(client);
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn download_url_is_published_as_output() {
        let (mut session, mut client, registry) = session().await;
        let id = session.id().to_string();
        session.register_download("my report", Download::new("x"));
        let task = tokio::spawn(session.run());
        let _config = client.recv().await;

        client.send(json!({"method": "init", "data": {}}));
        let flush = client.recv().await;
        assert_eq!(
            flush["values"]["my report"],
            json!(format!("session/{id}/download/my%20report?w="))
        );
        let Some(handle) = registry.get(&id).await else {
            panic!("session not registered");
        };
        assert!(handle.download("my report").is_some());

        drop(client);
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn upload_round_trip_sets_input() {
        let (mut session, mut client, registry) = session().await;
        let id = session.id().to_string();

        let files = json!([{"name": "notes.txt", "size": 5, "type": ""}]);
        let Ok(()) = session.dispatch("uploadInit", json!("u1"), &[files]).await else {
            panic!("uploadInit failed");
        };
        let response = client.recv().await;
        assert_eq!(response["response"]["tag"], json!("u1"));
        let Some(job_id) = response["response"]["value"]["jobId"].as_str().map(str::to_string) else {
            panic!("no job id in {response}");
        };
        assert_eq!(
            response["response"]["value"]["uploadUrl"],
            json!(format!("session/{id}/upload/{job_id}?w="))
        );

        let Ok(request) = axum::extract::Request::builder()
            .method("POST")
            .uri(format!("/session/{id}/upload/{job_id}?w="))
            .body(axum::body::Body::from("hello"))
        else {
            panic!("bad request");
        };
        let response = registry.handle_request(request).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let args = [json!(job_id), json!("file")];
        let Ok(()) = session.dispatch("uploadEnd", json!("u2"), &args).await else {
            panic!("uploadEnd failed");
        };
        assert_eq!(client.recv().await, json!({"response": {"tag": "u2", "value": null}}));

        let Some(Value::Array(received)) = session.input("file").cloned() else {
            panic!("input not set");
        };
        let Some(info) = received.first() else {
            panic!("empty file list");
        };
        assert_eq!(info["name"], json!("notes.txt"));
        assert_eq!(info["type"], json!("text/plain"));
        let Some(path) = info["datapath"].as_str() else {
            panic!("no datapath");
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            panic!("uploaded file unreadable");
        };
        assert_eq!(contents, "hello");

        let Some(upload_dir) = session.handle.uploads().dir() else {
            panic!("no upload dir");
        };
        drop(client);
        let Ok(()) = session.run().await else {
            panic!("session failed");
        };
        assert!(!upload_dir.exists());
    }

    #[tokio::test]
    async fn malformed_upload_calls_do_not_end_session() {
        let (session, mut client, _registry) = session().await;
        let task = tokio::spawn(session.run());
        let _config = client.recv().await;

        client.send(json!({"method": "uploadInit", "tag": 1, "args": ["not a list"]}));
        let flush = client.recv().await;
        assert!(flush.get("values").is_some());

        client.send(json!({"method": "uploadEnd", "tag": 2, "args": ["missing-job", "file"]}));
        assert_eq!(client.recv().await, json!({"response": {"tag": 2, "value": null}}));
        let _flush = client.recv().await;

        drop(client);
        let Ok(result) = task.await else {
            panic!("session task panicked");
        };
        assert!(result.is_ok());
    }
}
