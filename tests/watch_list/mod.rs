use rstore::Backend;
use rstore::Operation;
use rstore::Resource;
use rstore::ResourceId;
use rstore::ResourceType;
use rstore::Tenancy;
use rstore::WatchListRequest;
use rstore::WriteRequest;
use tonic::Code;
use tonic::Request;

use crate::commons::*;

#[tokio::test]
async fn test_watch_list_type_not_found() {
    let ts = TestServer::start();

    let err = ts
        .server
        .service()
        .watch_list(Request::new(WatchListRequest {
            resource_type: ResourceType::new("mesh", "v1", "service-unknown"),
            tenancy: Tenancy::new("default", "default", ""),
            name_prefix: String::new(),
        }))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "resource type mesh/v1/service-unknown not registered");

    ts.stop().await;
}

#[tokio::test]
async fn test_watch_list_upsert() {
    let ts = TestServer::start();
    let backend = ts.server.backend();

    // create r1 before anyone watches
    let mut r1 = service_resource("someName");
    r1.version = "1".into();
    let r1 = backend.write_cas(r1, "").unwrap();

    let stream = ts
        .server
        .service()
        .watch_list(Request::new(watch_all(mesh_service())))
        .await
        .unwrap()
        .into_inner();
    let mut rsp_ch = handle_resource_stream(stream);

    let rsp = must_get_resource(&mut rsp_ch).await;
    assert_eq!(rsp.operation, Operation::Upsert);
    assert_eq!(rsp.resource, r1);

    // mutate and write v2
    let mut r2 = r1.clone();
    r2.version = "2".into();
    let r2 = backend.write_cas(r2, &r1.version).unwrap();

    let rsp = must_get_resource(&mut rsp_ch).await;
    assert_eq!(rsp.operation, Operation::Upsert);
    assert_eq!(rsp.resource, r2);

    // update again with the stale version: conflict and no event
    let err = ts
        .server
        .service()
        .write(Request::new(WriteRequest { resource: r1.clone() }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Aborted);
    must_stay_quiet(&mut rsp_ch).await;

    ts.stop().await;
}

#[tokio::test]
async fn test_watch_list_loop() {
    let ts = TestServer::start();
    let backend = ts.server.backend();

    let stream = ts
        .server
        .service()
        .watch_list(Request::new(watch_all(mesh_service())))
        .await
        .unwrap()
        .into_inner();
    let mut rsp_ch = handle_resource_stream(stream);

    let mut written = Vec::new();
    for i in 0..10 {
        let r = service_resource(&format!("someName {i}"));
        written.push(backend.write_cas(r, "").unwrap());
    }

    for want in written {
        let rsp = must_get_resource(&mut rsp_ch).await;
        assert_eq!(rsp.operation, Operation::Upsert);
        assert_eq!(rsp.resource, want);
    }

    ts.stop().await;
}

#[tokio::test]
async fn test_watch_list_delete() {
    let ts = TestServer::start();
    let backend = ts.server.backend();

    let stream = ts
        .server
        .service()
        .watch_list(Request::new(watch_all(mesh_service())))
        .await
        .unwrap()
        .into_inner();
    let mut rsp_ch = handle_resource_stream(stream);

    let r1 = backend.write_cas(service_resource("doomed"), "").unwrap();
    backend.delete_cas(&r1.id, &r1.version).unwrap();

    assert_eq!(must_get_resource(&mut rsp_ch).await.operation, Operation::Upsert);
    let rsp = must_get_resource(&mut rsp_ch).await;
    assert_eq!(rsp.operation, Operation::Delete);
    assert_eq!(rsp.resource, r1);

    ts.stop().await;
}

#[tokio::test]
async fn test_watch_list_name_prefix_and_tenancy() {
    let ts = TestServer::start();
    let backend = ts.server.backend();

    let stream = ts
        .server
        .service()
        .watch_list(Request::new(WatchListRequest {
            name_prefix: "web".into(),
            ..watch_all(mesh_service())
        }))
        .await
        .unwrap()
        .into_inner();
    let mut rsp_ch = handle_resource_stream(stream);

    backend.write_cas(service_resource("api-1"), "").unwrap();
    backend
        .write_cas(
            Resource::new(ResourceId::new(
                "web-remote",
                mesh_service(),
                Tenancy::new("default", "default", "peer-a"),
            )),
            "",
        )
        .unwrap();
    let web = backend.write_cas(service_resource("web-1"), "").unwrap();

    let rsp = must_get_resource(&mut rsp_ch).await;
    assert_eq!(rsp.resource, web);
    must_stay_quiet(&mut rsp_ch).await;

    ts.stop().await;
}

#[tokio::test]
async fn test_watch_list_ends_on_shutdown() {
    let ts = TestServer::start();

    let stream = ts
        .server
        .service()
        .watch_list(Request::new(watch_all(mesh_service())))
        .await
        .unwrap()
        .into_inner();
    let mut rsp_ch = handle_resource_stream(stream);

    ts.stop().await;
    must_end(&mut rsp_ch).await;
}
