use crate::fake_worker::{default_reply, wait_until, Context, Reply};
use crate::video_producer_options;
use futures_lite::future;
use relayctl::consumer::ConsumerOptions;
use relayctl::producer::{Producer, ProducerId, ProducerType};
use relayctl::rtp_parameters::{MediaKind, RtpCodecParameters, RtpCodecParametersParameters};
use relayctl::transport::{ConsumeError, ProduceError, Transport};
use relayctl::worker::RequestError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn produce_succeeds() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();

        let new_producers_count = Arc::new(AtomicUsize::new(0));
        transport
            .on_new_producer(Arc::new({
                let new_producers_count = Arc::clone(&new_producers_count);
                move |_producer: &Producer| {
                    new_producers_count.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .detach();

        let mut options = video_producer_options();
        options.key_frame_request_delay = 1000;
        options.app_data = json!({ "camera": "front" });
        let producer = transport.produce(options).await.expect("Failed to produce");

        assert_eq!(new_producers_count.load(Ordering::SeqCst), 1);
        assert_eq!(producer.kind(), MediaKind::Video);
        assert_eq!(producer.r#type(), ProducerType::Simulcast);
        assert!(!producer.paused());
        assert!(!producer.closed());
        assert_eq!(producer.app_data().get("camera"), Some(&json!("front")));
        assert_eq!(producer.rtp_parameters().mid.as_deref(), Some("VIDEO"));
        assert_eq!(producer.consumable_rtp_parameters().mid, None);
        assert_eq!(producer.transport().id(), transport.id());

        assert_eq!(transport.producer_ids(), vec![producer.id()]);
        assert_eq!(ctx.producer_registry.ids(), vec![producer.id()]);
        assert_eq!(
            transport.producer(&producer.id()).map(|producer| producer.id()),
            Some(producer.id()),
        );

        let requests = ctx.worker.requests_with_method("transport.produce");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"]["producerId"],
            json!(producer.id().to_string())
        );
        assert_eq!(requests[0]["data"]["kind"], json!("video"));
        assert_eq!(requests[0]["data"]["keyFrameRequestDelay"], json!(1000));
        assert_eq!(requests[0]["data"]["paused"], json!(false));
        assert_eq!(
            requests[0]["data"]["rtpMapping"],
            json!({ "codecs": [], "encodings": [] })
        );
    }));
}

#[test]
fn produce_with_explicit_id() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();
        let producer_id = ProducerId::new();

        let mut options = video_producer_options();
        options.id = Some(producer_id);
        let producer = transport
            .produce(options.clone())
            .await
            .expect("Failed to produce");
        assert_eq!(producer.id(), producer_id);

        // Same id on another transport of the same router
        let other_transport = ctx.pipe_transport();
        match other_transport.produce(options).await {
            Err(ProduceError::AlreadyExists(id)) => {
                assert_eq!(id, producer_id);
            }
            other => panic!("Unexpected result: {other:?}"),
        }

        assert_eq!(ctx.worker.requests_with_method("transport.produce").len(), 1);
        assert!(other_transport.producer_ids().is_empty());
    }));
}

#[test]
fn concurrent_produce_with_same_id() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();
        let other_transport = ctx.pipe_transport();
        let producer_id = ProducerId::new();

        let mut options = video_producer_options();
        options.id = Some(producer_id);

        let results = future::zip(
            transport.produce(options.clone()),
            other_transport.produce(options),
        )
        .await;
        let (producer, error, losing_transport) = match results {
            (Ok(producer), Err(error)) => (producer, error, &other_transport),
            (Err(error), Ok(producer)) => (producer, error, &transport),
            other => panic!("Unexpected results: {other:?}"),
        };

        match error {
            ProduceError::AlreadyExists(id) => {
                assert_eq!(id, producer_id);
            }
            other => panic!("Unexpected error: {other:?}"),
        }
        assert_eq!(ctx.worker.requests_with_method("transport.produce").len(), 1);
        assert!(losing_transport.producer_ids().is_empty());

        // Router still resolves the id to the live producer
        assert_eq!(
            ctx.producer_registry
                .producer(&producer_id)
                .map(|producer| producer.id()),
            Some(producer_id),
        );
        let consumer = losing_transport
            .consume(ConsumerOptions::new(producer_id))
            .await
            .expect("Failed to consume");
        assert_eq!(consumer.producer_id(), producer_id);

        producer.close();
        assert!(ctx.producer_registry.is_empty());
    }));
}

#[test]
fn rejected_produce_releases_id() {
    let rejected = Arc::new(AtomicBool::new(false));
    let ctx = Context::with_responder({
        let rejected = Arc::clone(&rejected);
        move |request: &Value| {
            if request["method"] == "transport.produce" && !rejected.swap(true, Ordering::SeqCst) {
                Reply::Reject("not yet")
            } else {
                default_reply(request)
            }
        }
    });

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();
        let producer_id = ProducerId::new();

        let mut options = video_producer_options();
        options.id = Some(producer_id);

        assert!(matches!(
            transport.produce(options.clone()).await,
            Err(ProduceError::Request(RequestError::Response { .. })),
        ));
        assert!(ctx.producer_registry.is_empty());
        assert!(transport.producer_ids().is_empty());

        let producer = transport.produce(options).await.expect("Failed to produce");
        assert_eq!(producer.id(), producer_id);
        assert_eq!(ctx.producer_registry.ids(), vec![producer_id]);
    }));
}

#[test]
fn produce_with_invalid_parameters() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();

        let mut options = video_producer_options();
        if let RtpCodecParameters::Video { parameters, .. } = &mut options.rtp_parameters.codecs[1]
        {
            *parameters = RtpCodecParametersParameters::from([("apt", "101".into())]);
        }
        assert!(matches!(
            transport.produce(options).await,
            Err(ProduceError::FailedRtpParametersValidation(_)),
        ));

        let mut options = video_producer_options();
        options.app_data = json!(true);
        assert!(matches!(
            transport.produce(options).await,
            Err(ProduceError::InvalidAppData(_)),
        ));

        assert!(ctx.worker.requests_with_method("transport.produce").is_empty());
        assert!(transport.producer_ids().is_empty());
        assert!(ctx.producer_registry.is_empty());
    }));
}

#[test]
fn pause_and_resume() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();
        let producer = transport
            .produce(video_producer_options())
            .await
            .expect("Failed to produce");

        let pause_count = Arc::new(AtomicUsize::new(0));
        let resume_count = Arc::new(AtomicUsize::new(0));
        producer
            .on_pause({
                let pause_count = Arc::clone(&pause_count);
                move || {
                    pause_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();
        producer
            .on_resume({
                let resume_count = Arc::clone(&resume_count);
                move || {
                    resume_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        producer.pause().await.expect("Failed to pause");
        assert!(producer.paused());
        producer.pause().await.expect("Failed to pause");
        assert_eq!(pause_count.load(Ordering::SeqCst), 1);

        producer.resume().await.expect("Failed to resume");
        assert!(!producer.paused());
        assert_eq!(resume_count.load(Ordering::SeqCst), 1);

        let requests = ctx.worker.requests_with_method("producer.pause");
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0]["internal"]["producerId"],
            json!(producer.id().to_string())
        );
        assert_eq!(ctx.worker.requests_with_method("producer.resume").len(), 1);
    }));
}

#[test]
fn pause_rejected_keeps_state() {
    let ctx = Context::with_responder(|request| {
        if request["method"] == "producer.pause" {
            Reply::Reject("not now")
        } else {
            default_reply(request)
        }
    });

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();
        let producer = transport
            .produce(video_producer_options())
            .await
            .expect("Failed to produce");

        assert!(matches!(
            producer.pause().await,
            Err(RequestError::Response { .. }),
        ));
        assert!(!producer.paused());
    }));
}

#[test]
fn close_unregisters() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();
        let producer = transport
            .produce(video_producer_options())
            .await
            .expect("Failed to produce");
        let producer_id = producer.id();
        let consumer = transport
            .consume(ConsumerOptions::new(producer_id))
            .await
            .expect("Failed to consume");
        assert_eq!(
            consumer.producer().map(|producer| producer.id()),
            Some(producer_id),
        );

        let close_count = Arc::new(AtomicUsize::new(0));
        producer
            .on_close({
                let close_count = Arc::clone(&close_count);
                move || {
                    close_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        producer.close();
        producer.close();

        assert!(producer.closed());
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
        assert!(transport.producer_ids().is_empty());
        assert!(ctx.producer_registry.is_empty());
        assert!(consumer.producer().is_none());

        match transport.consume(ConsumerOptions::new(producer_id)).await {
            Err(ConsumeError::ProducerNotFound(id)) => {
                assert_eq!(id, producer_id);
            }
            other => panic!("Unexpected result: {other:?}"),
        }

        wait_until(|| !ctx.worker.requests_with_method("producer.close").is_empty()).await;
        let requests = ctx.worker.requests_with_method("producer.close");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"]["producerId"],
            json!(producer_id.to_string())
        );
    }));
}

#[test]
fn drop_closes() {
    let ctx = Context::new();

    future::block_on(ctx.executor.run(async {
        let transport = ctx.pipe_transport();
        let producer = transport
            .produce(video_producer_options())
            .await
            .expect("Failed to produce");
        let weak_producer = producer.downgrade();

        drop(producer);

        assert!(weak_producer.upgrade().is_none());
        assert!(transport.producer_ids().is_empty());
        assert!(ctx.producer_registry.is_empty());
        wait_until(|| !ctx.worker.requests_with_method("producer.close").is_empty()).await;
    }));
}
