use async_executor::Executor;
use async_io::{Async, Timer};
use futures_lite::io::{BufReader, ReadHalf, WriteHalf};
use futures_lite::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use parking_lot::Mutex;
use relayctl::data_structures::{TransportProtocol, TransportTuple};
use relayctl::pipe_transport::{PipeTransport, PipeTransportData};
use relayctl::router::registry::ProducerRegistry;
use relayctl::router::RouterId;
use relayctl::transport::{TransportCreateParams, TransportId};
use relayctl::worker::{Channel, ChannelSettings};
use serde_json::{json, Value};
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the fake worker does with a request.
pub enum Reply {
    Accept(Value),
    Reject(&'static str),
    /// Never answer, the request will time out.
    Ignore,
}

type Responder = Box<dyn Fn(&Value) -> Reply + Send + Sync>;

/// Worker side of a channel, records every request and answers according to a responder.
pub struct FakeWorker {
    requests: Arc<Mutex<Vec<Value>>>,
    outgoing: async_channel::Sender<Value>,
}

impl FakeWorker {
    pub fn requests_with_method(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request["method"] == method)
            .cloned()
            .collect()
    }

    pub async fn send(&self, message: Value) {
        self.outgoing
            .send(message)
            .await
            .expect("Fake worker writer is gone");
    }

    pub async fn notify(&self, target_id: impl ToString, event: &str) {
        self.send(json!({
            "targetId": target_id.to_string(),
            "event": event,
        }))
        .await;
    }
}

/// Answers like a healthy worker would.
pub fn default_reply(request: &Value) -> Reply {
    match request["method"].as_str().unwrap_or_default() {
        "transport.produce" => {
            let encodings = request["data"]["rtpParameters"]["encodings"]
                .as_array()
                .map_or(0, Vec::len);
            Reply::Accept(json!({
                "type": if encodings > 1 { "simulcast" } else { "simple" },
            }))
        }
        "transport.consume" => Reply::Accept(json!({
            "paused": false,
            "producerPaused": false,
        })),
        "transport.connect" => Reply::Accept(json!({
            "tuple": {
                "localIp": "127.0.0.1",
                "localPort": 40000,
                "remoteIp": request["data"]["ip"],
                "remotePort": request["data"]["port"],
                "protocol": "udp",
            },
        })),
        _ => Reply::Accept(Value::Null),
    }
}

pub struct Context {
    pub executor: Arc<Executor<'static>>,
    pub worker: FakeWorker,
    pub channel: Channel,
    pub router_id: RouterId,
    pub producer_registry: ProducerRegistry,
}

impl Context {
    pub fn new() -> Self {
        Self::with_responder(default_reply)
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        Self::with_settings(responder, ChannelSettings::default())
    }

    pub fn with_settings<F>(responder: F, settings: ChannelSettings) -> Self
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        {
            let mut builder = env_logger::builder();
            if env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
                builder.filter_level(log::LevelFilter::Off);
            }
            let _ = builder.is_test(true).try_init();
        }

        let executor = Arc::new(Executor::new());
        let (ours, theirs) = Async::<UnixStream>::pair().expect("Failed to create socket pair");
        let (reader, writer) = futures_lite::io::split(ours);
        let channel = Channel::new(&executor, reader, writer, settings);

        let (worker_reader, worker_writer) = futures_lite::io::split(theirs);
        let worker = spawn_worker(&executor, worker_reader, worker_writer, Box::new(responder));

        Self {
            executor,
            worker,
            channel,
            router_id: RouterId::new(),
            producer_registry: ProducerRegistry::new(),
        }
    }

    pub fn pipe_transport(&self) -> PipeTransport {
        PipeTransport::new(
            PipeTransportData::new(TransportTuple::LocalOnly {
                local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                local_port: 40000,
                protocol: TransportProtocol::Udp,
            }),
            TransportCreateParams::new(
                self.router_id,
                TransportId::new(),
                Arc::clone(&self.executor),
                self.channel.clone(),
                self.producer_registry.clone(),
            ),
        )
    }
}

fn spawn_worker(
    executor: &Executor<'static>,
    reader: ReadHalf<Async<UnixStream>>,
    mut writer: WriteHalf<Async<UnixStream>>,
    responder: Responder,
) -> FakeWorker {
    let requests = Arc::<Mutex<Vec<Value>>>::default();
    let (outgoing, outgoing_receiver) = async_channel::unbounded::<Value>();

    executor
        .spawn(async move {
            while let Ok(message) = outgoing_receiver.recv().await {
                let payload = serde_json::to_vec(&message).unwrap();
                let mut bytes = format!("{}:", payload.len()).into_bytes();
                bytes.extend_from_slice(&payload);
                bytes.push(b',');
                if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
                    break;
                }
            }
        })
        .detach();

    {
        let requests = Arc::clone(&requests);
        let outgoing = outgoing.clone();

        executor
            .spawn(async move {
                let mut reader = BufReader::new(reader);
                let mut length = Vec::new();

                loop {
                    length.clear();
                    match reader.read_until(b':', &mut length).await {
                        Ok(read) if read > 1 => {}
                        _ => break,
                    }
                    length.pop();
                    let Some(length) = std::str::from_utf8(&length)
                        .ok()
                        .and_then(|length| length.parse::<usize>().ok())
                    else {
                        break;
                    };
                    let mut payload = vec![0u8; length + 1];
                    if reader.read_exact(&mut payload).await.is_err() {
                        break;
                    }
                    payload.pop();

                    let request: Value = serde_json::from_slice(&payload).unwrap();
                    requests.lock().push(request.clone());

                    let response = match responder(&request) {
                        Reply::Accept(data) => json!({
                            "id": request["id"],
                            "accepted": true,
                            "data": data,
                        }),
                        Reply::Reject(reason) => json!({
                            "id": request["id"],
                            "error": "Error",
                            "reason": reason,
                        }),
                        Reply::Ignore => continue,
                    };

                    if outgoing.send(response).await.is_err() {
                        break;
                    }
                }
            })
            .detach();
    }

    FakeWorker { requests, outgoing }
}

/// Wait until `condition` holds, panics if it doesn't within a few seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not reached in time");
        Timer::after(Duration::from_millis(5)).await;
    }
}
