
use crate::messages::Request;
use crate::worker::common::{EventHandlers, SubscriptionHandler, SubscriptionTarget};
use crate::worker::ChannelSettings;
use async_executor::Executor;
use futures_lite::io::BufReader;
use futures_lite::{future, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// netstring length for a 4194304 bytes payload.
const NS_MESSAGE_MAX_LEN: usize = 4194313;
const NS_PAYLOAD_MAX_LEN: usize = 4194304;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChannelReceiveMessage {
    #[serde(rename_all = "camelCase")]
    ResponseSuccess {
        id: u32,
        #[allow(dead_code)]
        accepted: bool,
        data: Option<Value>,
    },
    ResponseError {
        id: u32,
        #[allow(dead_code)]
        error: Value,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Notification { target_id: String },
}

/// Error that caused request to the worker to fail.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Channel already closed.
    #[error("Channel already closed")]
    ChannelClosed,
    /// Message is too long.
    #[error("Message is too long")]
    MessageTooLong,
    /// Request timed out.
    #[error("Request timed out")]
    TimedOut,
    /// Received response error.
    #[error("Received response error: {reason}")]
    Response {
        /// Error reason.
        reason: String,
    },
    /// Failed to serialize request.
    #[error("Failed to serialize request: {error}")]
    FailedToSerialize {
        /// Error.
        error: Box<dyn Error + Send + Sync>,
    },
    /// Failed to parse response from worker.
    #[error("Failed to parse response from worker: {error}")]
    FailedToParse {
        /// Error.
        error: Box<dyn Error + Send + Sync>,
    },
    /// Worker did not return any data in response.
    #[error("Worker did not return any data in response")]
    NoData,
}

struct ResponseError {
    reason: String,
}

type Response<T> = Result<Option<T>, ResponseError>;

#[derive(Default)]
struct RequestsContainer {
    next_id: u32,
    handlers: HashMap<u32, async_oneshot::Sender<Response<Value>>>,
}

struct Inner {
    sender: async_channel::Sender<Vec<u8>>,
    requests_container: Arc<Mutex<RequestsContainer>>,
    event_handlers: EventHandlers<Value>,
    settings: ChannelSettings,
    closed: Arc<AtomicBool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.sender.close();
    }
}

/// Request/response conduit to the worker process.
///
/// Messages are JSON documents framed as netstrings (`<length>:<payload>,`). Requests are matched
/// with responses by numeric id, notifications are routed by target entity id and worker log lines
/// are forwarded to the [`log`] crate.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("settings", &self.inner.settings)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl Channel {
    /// Create a channel on top of the worker's output (`reader`) and input (`writer`) streams.
    ///
    /// Reading and writing happen in tasks spawned on `executor`, which therefore has to be
    /// running for requests to make progress.
    pub fn new<R, W>(
        executor: &Executor<'static>,
        reader: R,
        writer: W,
        settings: ChannelSettings,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let requests_container = Arc::<Mutex<RequestsContainer>>::default();
        let event_handlers = EventHandlers::new();
        let closed = Arc::new(AtomicBool::new(false));

        {
            let requests_container = Arc::clone(&requests_container);
            let event_handlers_weak = event_handlers.downgrade();
            let closed = Arc::clone(&closed);

            executor
                .spawn(async move {
                    let result = async {
                        let mut len_bytes = Vec::new();
                        let mut bytes = Vec::new();
                        let mut reader = BufReader::new(reader);

                        loop {
                            len_bytes.clear();
                            let read_bytes = reader.read_until(b':', &mut len_bytes).await?;
                            if read_bytes == 0 || len_bytes.last() != Some(&b':') {
                                // EOF
                                break;
                            }
                            let length = std::str::from_utf8(&len_bytes[..(read_bytes - 1)])
                                .ok()
                                .and_then(|length| length.trim().parse::<usize>().ok())
                                .ok_or_else(|| {
                                    io::Error::new(
                                        io::ErrorKind::InvalidData,
                                        "malformed netstring length",
                                    )
                                })?;

                            if length > NS_PAYLOAD_MAX_LEN {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!(
                                        "received message payload {length} is too long, max \
                                        supported is {NS_PAYLOAD_MAX_LEN}",
                                    ),
                                ));
                            }

                            // +1 because of netstring `,` at the very end
                            bytes.resize(length + 1, 0);
                            reader.read_exact(&mut bytes).await?;
                            if bytes[length] != b',' {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    "netstring is not terminated with a comma",
                                ));
                            }

                            trace!(
                                "received raw message: {}",
                                String::from_utf8_lossy(&bytes[..length]),
                            );

                            let Some(event_handlers) = event_handlers_weak.upgrade() else {
                                break;
                            };

                            handle_message(&bytes[..length], &requests_container, &event_handlers);
                        }

                        io::Result::Ok(())
                    }
                    .await;

                    if let Err(error) = result {
                        error!("reading from worker failed: {}", error);
                    }

                    closed.store(true, Ordering::SeqCst);
                    // Dropping senders fails every pending request with `ChannelClosed`
                    let handlers = std::mem::take(&mut requests_container.lock().handlers);
                    drop(handlers);
                })
                .detach();
        }

        let sender = {
            let (sender, receiver) = async_channel::bounded::<Vec<u8>>(1);
            let closed = Arc::clone(&closed);
            let mut writer = writer;

            executor
                .spawn(async move {
                    let mut bytes = Vec::with_capacity(NS_MESSAGE_MAX_LEN);
                    while let Ok(message) = receiver.recv().await {
                        bytes.clear();
                        bytes.extend_from_slice(message.len().to_string().as_bytes());
                        bytes.push(b':');
                        bytes.extend_from_slice(&message);
                        bytes.push(b',');

                        if let Err(error) = async {
                            writer.write_all(&bytes).await?;
                            writer.flush().await
                        }
                        .await
                        {
                            error!("writing to worker failed: {}", error);
                            closed.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                })
                .detach();

            sender
        };

        let inner = Arc::new(Inner {
            sender,
            requests_container,
            event_handlers,
            settings,
            closed,
        });

        Self { inner }
    }

    /// Whether the connection to the worker is gone.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of requests waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.requests_container.lock().handlers.len()
    }

    pub(crate) async fn request<R>(&self, request: R) -> Result<R::Response, RequestError>
    where
        R: Request,
    {
        let method = request.as_method();
        let message =
            serde_json::to_value(request).map_err(|error| RequestError::FailedToSerialize {
                error: Box::new(error),
            })?;

        match self.request_internal(method, message).await? {
            Some(data) => {
                serde_json::from_value(data).map_err(|error| RequestError::FailedToParse {
                    error: Box::new(error),
                })
            }
            // Works for `()` response, anything else needs data
            None => serde_json::from_value(Value::Null).map_err(|_| RequestError::NoData),
        }
    }

    pub(crate) fn subscribe_to_notifications<F>(
        &self,
        target_id: SubscriptionTarget,
        callback: F,
    ) -> SubscriptionHandler
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner
            .event_handlers
            .add(target_id, Box::new(callback))
    }

    /// Non-generic method to avoid significant duplication in final binary
    async fn request_internal(
        &self,
        method: &'static str,
        message: Value,
    ) -> Result<Option<Value>, RequestError> {
        #[derive(Debug, Serialize)]
        struct RequestMessagePrivate {
            id: u32,
            method: &'static str,
            #[serde(flatten)]
            message: Value,
        }

        if self.closed() {
            return Err(RequestError::ChannelClosed);
        }

        let id;
        let queue_len;
        let (result_sender, result_receiver) = async_oneshot::oneshot();
        let requests_container = &self.inner.requests_container;

        {
            let mut requests_container = requests_container.lock();

            id = requests_container.next_id;
            queue_len = requests_container.handlers.len();

            requests_container.next_id = requests_container.next_id.wrapping_add(1);
            requests_container.handlers.insert(id, result_sender);
        }

        debug!("request() [method:{}, id:{}]", method, id);

        let serialized_message = match serde_json::to_vec(&RequestMessagePrivate {
            id,
            method,
            message,
        }) {
            Ok(serialized_message) => serialized_message,
            Err(error) => {
                requests_container.lock().handlers.remove(&id);
                return Err(RequestError::FailedToSerialize {
                    error: Box::new(error),
                });
            }
        };

        if serialized_message.len() > NS_PAYLOAD_MAX_LEN {
            requests_container.lock().handlers.remove(&id);
            return Err(RequestError::MessageTooLong);
        }

        if self.inner.sender.send(serialized_message).await.is_err() {
            requests_container.lock().handlers.remove(&id);
            return Err(RequestError::ChannelClosed);
        }

        let timeout = self.inner.settings.timeout_for(queue_len);

        let result = future::or(
            async move {
                result_receiver
                    .await
                    .map_err(|_| RequestError::ChannelClosed)
            },
            async move {
                async_io::Timer::after(timeout).await;

                // Late response will find no handler and will be discarded
                requests_container.lock().handlers.remove(&id);

                Err(RequestError::TimedOut)
            },
        )
        .await;

        match result {
            Ok(Ok(data)) => {
                debug!("request succeeded [method:{}, id:{}]", method, id);

                Ok(data)
            }
            Ok(Err(ResponseError { reason })) => {
                debug!("request failed [method:{}, id:{}]: {}", method, id, reason);

                Err(RequestError::Response { reason })
            }
            Err(error) => {
                debug!("request failed [method:{}, id:{}]: {}", method, id, error);

                Err(error)
            }
        }
    }
}

fn handle_message(
    bytes: &[u8],
    requests_container: &Mutex<RequestsContainer>,
    event_handlers: &EventHandlers<Value>,
) {
    match bytes.first() {
        // JSON message
        Some(b'{') => {
            let value = match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => value,
                Err(error) => {
                    error!("received invalid JSON from worker: {}", error);
                    return;
                }
            };

            match ChannelReceiveMessage::deserialize(&value) {
                Ok(ChannelReceiveMessage::ResponseSuccess { id, data, .. }) => {
                    let sender = requests_container.lock().handlers.remove(&id);
                    if let Some(mut sender) = sender {
                        let _ = sender.send(Ok(data));
                    } else {
                        warn!(
                            "received success response does not match any sent request [id:{}]",
                            id,
                        );
                    }
                }
                Ok(ChannelReceiveMessage::ResponseError { id, reason, .. }) => {
                    let sender = requests_container.lock().handlers.remove(&id);
                    if let Some(mut sender) = sender {
                        let _ = sender.send(Err(ResponseError { reason }));
                    } else {
                        warn!(
                            "received error response does not match any sent request [id:{}]",
                            id,
                        );
                    }
                }
                Ok(ChannelReceiveMessage::Notification { target_id }) => {
                    match Uuid::parse_str(&target_id) {
                        Ok(uuid) => {
                            let target = SubscriptionTarget::Uuid(uuid);
                            if !event_handlers.call_callbacks_with_value(&target, value) {
                                debug!("notification for unknown target [targetId:{}]", target_id);
                            }
                        }
                        Err(_) => {
                            warn!("notification with invalid target id [targetId:{}]", target_id);
                        }
                    }
                }
                Err(error) => {
                    warn!("unexpected message from worker: {}", error);
                }
            }
        }
        // Debug log
        Some(b'D') => debug!("[worker] {}", String::from_utf8_lossy(&bytes[1..])),
        // Warn log
        Some(b'W') => warn!("[worker] {}", String::from_utf8_lossy(&bytes[1..])),
        // Error log
        Some(b'E') => error!("[worker] {}", String::from_utf8_lossy(&bytes[1..])),
        // Dump log
        Some(b'X') => trace!("[worker] {}", String::from_utf8_lossy(&bytes[1..])),
        // Unknown
        _ => {
            warn!(
                "unexpected data from worker: {}",
                String::from_utf8_lossy(bytes),
            );
        }
    }
}
