use std::sync::Arc;

use rstore::write_with_retry;
use rstore::Backend;
use rstore::BackoffPolicy;
use rstore::ReadRequest;
use rstore::WriteRequest;
use tokio::sync::Barrier;
use tonic::Code;
use tonic::Request;

use crate::commons::*;

#[tokio::test]
async fn test_write_then_read_through_service() {
    let ts = TestServer::start();
    let service = ts.server.service();

    let written = service
        .write(Request::new(WriteRequest {
            resource: service_resource("svc").with_data("v1"),
        }))
        .await
        .unwrap()
        .into_inner()
        .resource;
    assert_eq!(written.version, "1");

    let read = service
        .read(Request::new(ReadRequest {
            id: written.id.clone(),
        }))
        .await
        .unwrap()
        .into_inner()
        .resource;
    assert_eq!(read, written);

    // stale expected version
    let mut stale = written.clone().with_data("v2");
    stale.version = "0".into();
    let status = service
        .write(Request::new(WriteRequest { resource: stale }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);

    ts.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_single_winner() {
    let ts = TestServer::start();
    let backend = ts.server.backend().clone();
    let base = backend.write_cas(service_resource("hot"), "").unwrap();

    let barrier = Arc::new(Barrier::new(16));
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let backend = backend.clone();
            let barrier = barrier.clone();
            let next = base.clone().with_data(format!("writer {i}"));
            let expected = base.version.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                backend.write_cas(next, &expected).is_ok()
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    ts.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_helper_serializes_updates() {
    let ts = TestServer::start();
    let backend = ts.server.backend().clone();
    backend.write_cas(service_resource("counter").with_data("0"), "").unwrap();

    let policy = BackoffPolicy {
        max_retries: 100,
        base_delay_ms: 1,
        max_delay_ms: 5,
        timeout_ms: 1000,
    };
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                write_with_retry(
                    backend.as_ref(),
                    &service_resource("counter").id,
                    |current| async move {
                        let current = current.expect("counter exists");
                        let n: u64 = String::from_utf8_lossy(&current.data).parse().unwrap_or(0);
                        Ok(current.with_data((n + 1).to_string()))
                    },
                    policy,
                )
                .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = backend.read(&service_resource("counter").id).unwrap().unwrap();
    assert_eq!(&stored.data[..], b"8");

    ts.stop().await;
}
