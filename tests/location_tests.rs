use mechanic_dispatch::error::Error;
use mechanic_dispatch::geo::Coordinates;
use mechanic_dispatch::location::{PositionFix, PositionSink};
use mechanic_dispatch::Dispatch;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GIZA: Coordinates = Coordinates { lat: 30.0131, lng: 31.2089 };

async fn mount_profile_update(server: &MockServer) {
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/mechanics"))
        .and(query_param("id", "eq.m-1"))
        .and(body_partial_json(json!({ "lat": 30.0131, "lng": 31.2089 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "m-1" }])))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn fixes_follow_the_mechanic_onto_the_active_job() {
    let server = MockServer::start().await;
    mount_profile_update(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/requests"))
        .and(query_param("mechanic_id", "eq.m-1"))
        .and(query_param("status", "in.(accepted,arrived)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 7,
            "customer_id": "c-1",
            "mechanic_id": "m-1",
            "status": "accepted",
            "created_at": "2024-05-01T10:00:00"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/requests"))
        .and(query_param("id", "eq.7"))
        .and(query_param("mechanic_id", "eq.m-1"))
        .and(body_partial_json(json!({ "mechanic_lat": 30.0131, "mechanic_lng": 31.2089 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 7,
            "customer_id": "c-1",
            "mechanic_id": "m-1",
            "mechanic_lat": 30.0131,
            "mechanic_lng": 31.2089,
            "status": "accepted",
            "created_at": "2024-05-01T10:00:00"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let dispatch = Dispatch::new(&server.uri(), "anon-key").unwrap();
    dispatch
        .location_sink("m-1")
        .publish(&PositionFix::new(GIZA))
        .await
        .unwrap();
}

#[tokio::test]
async fn idle_mechanics_only_update_their_profile() {
    let server = MockServer::start().await;
    mount_profile_update(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let dispatch = Dispatch::new(&server.uri(), "anon-key").unwrap();
    dispatch
        .location_sink("m-1")
        .publish(&PositionFix::new(GIZA))
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_mechanic_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/mechanics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let dispatch = Dispatch::new(&server.uri(), "anon-key").unwrap();
    let err = dispatch
        .location_sink("ghost")
        .publish(&PositionFix::new(GIZA))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
