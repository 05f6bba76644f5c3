use crate::fake_worker::{wait_until, Context};
use crate::video_producer_options;
use async_io::Timer;
use futures_lite::future;
use relayctl::consumer::{Consumer, ConsumerOptions};
use relayctl::pipe_transport::{PipeTransport, PipeTransportRemoteParameters};
use relayctl::producer::Producer;
use relayctl::router::lifecycle::EntityState;
use relayctl::transport::{Transport, TransportGeneric};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

async fn init(ctx: &Context) -> (PipeTransport, Producer, Consumer) {
    let transport = ctx.pipe_transport();
    let producer = transport
        .produce(video_producer_options())
        .await
        .expect("Failed to produce");
    let consumer = transport
        .consume(ConsumerOptions::new(producer.id()))
        .await
        .expect("Failed to consume");

    (transport, producer, consumer)
}

/// Full request/response exchange, everything the worker sent before has been processed after it.
async fn round_trip(transport: &PipeTransport) {
    transport
        .connect(PipeTransportRemoteParameters::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            40001,
        ))
        .await
        .expect("Failed to connect");
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn increment(counter: &Arc<AtomicUsize>) -> impl Fn() + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn producer_pause_and_resume_notifications() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let (_transport, _producer, consumer) = init(&ctx).await;

        let pause_count = counter();
        let resume_count = counter();
        let producer_pause_count = counter();
        let producer_resume_count = counter();
        consumer.on_pause(increment(&pause_count)).detach();
        consumer.on_resume(increment(&resume_count)).detach();
        consumer
            .on_producer_pause(increment(&producer_pause_count))
            .detach();
        consumer
            .on_producer_resume(increment(&producer_resume_count))
            .detach();

        ctx.worker.notify(consumer.id(), "producerpause").await;
        wait_until(|| consumer.producer_paused()).await;

        assert!(!consumer.paused());
        assert_eq!(producer_pause_count.load(Ordering::SeqCst), 1);
        assert_eq!(pause_count.load(Ordering::SeqCst), 1);

        ctx.worker.notify(consumer.id(), "producerresume").await;
        wait_until(|| !consumer.producer_paused()).await;

        assert_eq!(producer_resume_count.load(Ordering::SeqCst), 1);
        assert_eq!(resume_count.load(Ordering::SeqCst), 1);
    }));
}

#[test]
fn producer_resume_keeps_locally_paused_consumer_paused() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let (_transport, _producer, consumer) = init(&ctx).await;

        consumer.pause().await.expect("Failed to pause");

        let pause_count = counter();
        let resume_count = counter();
        consumer.on_pause(increment(&pause_count)).detach();
        consumer.on_resume(increment(&resume_count)).detach();

        ctx.worker.notify(consumer.id(), "producerpause").await;
        wait_until(|| consumer.producer_paused()).await;
        ctx.worker.notify(consumer.id(), "producerresume").await;
        wait_until(|| !consumer.producer_paused()).await;

        assert!(consumer.paused());
        assert_eq!(pause_count.load(Ordering::SeqCst), 0);
        assert_eq!(resume_count.load(Ordering::SeqCst), 0);
    }));
}

#[test]
fn pause_and_resume() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let (_transport, producer, consumer) = init(&ctx).await;

        let pause_count = counter();
        let resume_count = counter();
        consumer.on_pause(increment(&pause_count)).detach();
        consumer.on_resume(increment(&resume_count)).detach();

        consumer.pause().await.expect("Failed to pause");
        assert!(consumer.paused());
        assert_eq!(pause_count.load(Ordering::SeqCst), 1);

        consumer.resume().await.expect("Failed to resume");
        assert!(!consumer.paused());
        assert_eq!(resume_count.load(Ordering::SeqCst), 1);

        let requests = ctx.worker.requests_with_method("consumer.pause");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"],
            json!({
                "routerId": ctx.router_id.to_string(),
                "transportId": consumer.transport().id().to_string(),
                "producerId": producer.id().to_string(),
                "consumerId": consumer.id().to_string(),
            })
        );
        assert_eq!(ctx.worker.requests_with_method("consumer.resume").len(), 1);
    }));
}

#[test]
fn producer_close_notification() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let (transport, _producer, consumer) = init(&ctx).await;

        let producer_close_count = counter();
        let transport_close_count = counter();
        let close_count = counter();
        consumer
            .on_producer_close(increment(&producer_close_count))
            .detach();
        consumer
            .on_transport_close(increment(&transport_close_count))
            .detach();
        consumer.on_close(increment(&close_count)).detach();

        ctx.worker.notify(consumer.id(), "producerclose").await;
        wait_until(|| consumer.closed()).await;

        assert_eq!(consumer.state(), EntityState::Closed);
        assert_eq!(producer_close_count.load(Ordering::SeqCst), 1);
        assert_eq!(transport_close_count.load(Ordering::SeqCst), 0);
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
        assert!(transport.consumer_ids().is_empty());

        // Local close after the fact does nothing
        consumer.close();
        assert_eq!(close_count.load(Ordering::SeqCst), 1);

        // Worker already closed it, nothing to ask for
        round_trip(&transport).await;
        assert!(ctx.worker.requests_with_method("consumer.close").is_empty());

        // Late notifications are ignored
        ctx.worker.notify(consumer.id(), "producerpause").await;
        round_trip(&transport).await;
        assert!(!consumer.producer_paused());
    }));
}

#[test]
fn close_then_producer_close_notification() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let (transport, _producer, consumer) = init(&ctx).await;

        let producer_close_count = counter();
        let close_count = counter();
        consumer
            .on_producer_close(increment(&producer_close_count))
            .detach();
        consumer.on_close(increment(&close_count)).detach();

        consumer.close();
        assert!(consumer.closed());
        assert!(transport.consumer_ids().is_empty());

        ctx.worker.notify(consumer.id(), "producerclose").await;
        round_trip(&transport).await;

        assert_eq!(producer_close_count.load(Ordering::SeqCst), 0);
        assert_eq!(close_count.load(Ordering::SeqCst), 1);

        wait_until(|| !ctx.worker.requests_with_method("consumer.close").is_empty()).await;
        let requests = ctx.worker.requests_with_method("consumer.close");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"]["consumerId"],
            json!(consumer.id().to_string())
        );

        let called = counter();
        consumer.on_close(increment(&called)).detach();
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }));
}

#[test]
fn drop_closes() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let (transport, _producer, consumer) = init(&ctx).await;
        let consumer_id = consumer.id();
        let weak_consumer = consumer.downgrade();

        drop(consumer);

        assert!(weak_consumer.upgrade().is_none());
        assert!(transport.consumer_ids().is_empty());
        assert!(transport.consumer(&consumer_id).is_none());

        wait_until(|| !ctx.worker.requests_with_method("consumer.close").is_empty()).await;
        let requests = ctx.worker.requests_with_method("consumer.close");
        assert_eq!(
            requests[0]["internal"]["consumerId"],
            json!(consumer_id.to_string())
        );
    }));
}

#[test]
fn concurrent_pause_and_producer_notifications() {
    let ctx = Context::new();

    // Extra threads so that the channel reader and the pause/resume tasks run in parallel
    let (stop_sender, stop_receiver) = async_channel::bounded::<()>(1);
    let threads = (0..3)
        .map(|_| {
            let executor = Arc::clone(&ctx.executor);
            let stop_receiver = stop_receiver.clone();

            thread::spawn(move || {
                let _ = future::block_on(executor.run(stop_receiver.recv()));
            })
        })
        .collect::<Vec<_>>();

    future::block_on(future::or(
        ctx.executor.run(async {
            let (transport, _producer, consumer) = init(&ctx).await;

            let pause_count = counter();
            let resume_count = counter();
            consumer.on_pause(increment(&pause_count)).detach();
            consumer.on_resume(increment(&resume_count)).detach();

            let tasks = (0..4)
                .map(|_| {
                    let consumer = consumer.clone();

                    ctx.executor.spawn(async move {
                        for _ in 0..50 {
                            consumer.pause().await.expect("Failed to pause");
                            consumer.resume().await.expect("Failed to resume");
                        }
                    })
                })
                .collect::<Vec<_>>();

            for i in 0..200 {
                let event = if i % 2 == 0 {
                    "producerpause"
                } else {
                    "producerresume"
                };
                ctx.worker.notify(consumer.id(), event).await;
            }

            for task in tasks {
                task.await;
            }
            round_trip(&transport).await;

            assert!(!consumer.paused());
            assert!(!consumer.producer_paused());
            // Started and ended resumed, so every pause event got its resume
            assert_eq!(
                pause_count.load(Ordering::SeqCst),
                resume_count.load(Ordering::SeqCst)
            );
        }),
        async {
            Timer::after(Duration::from_secs(30)).await;
            panic!("Pause bookkeeping got stuck");
        },
    ));

    drop(stop_sender);
    for thread in threads {
        thread.join().expect("Executor thread panicked");
    }
}
