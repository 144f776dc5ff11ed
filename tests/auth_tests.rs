use mechanic_dispatch::auth::Role;
use mechanic_dispatch::{error::Error, Dispatch};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_body(user_id: &str, role: &str) -> Value {
    json!({
        "access_token": "access-1",
        "refresh_token": "refresh-1",
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {
            "id": user_id,
            "email": "sam@example.com",
            "user_metadata": { "role": role }
        }
    })
}

fn setup(server: &MockServer) -> Dispatch {
    Dispatch::new(&server.uri(), "anon-key").unwrap()
}

#[tokio::test]
async fn sign_up_stores_role_in_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(header("apikey", "anon-key"))
        .and(body_partial_json(json!({ "data": { "role": "mechanic" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("m-1", "mechanic")))
        .expect(1)
        .mount(&server)
        .await;

    let dispatch = setup(&server);
    let response = dispatch
        .auth()
        .sign_up("sam@example.com", "secret123", Role::Mechanic)
        .await
        .unwrap();

    assert_eq!(response.user.account_role(), Some(Role::Mechanic));
    let session = response.session.unwrap();
    assert!(session.expires_at.is_some());
    assert!(!session.is_expired());
    assert_eq!(dispatch.session().user_id().as_deref(), Some("m-1"));
    assert_eq!(dispatch.auth().current_role(), Some(Role::Mechanic));
}

#[tokio::test]
async fn sign_up_with_confirmation_returns_bare_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c-1",
            "email": "cat@example.com",
            "user_metadata": { "role": "customer" }
        })))
        .mount(&server)
        .await;

    let dispatch = setup(&server);
    let response = dispatch
        .auth()
        .sign_up("cat@example.com", "secret123", Role::Customer)
        .await
        .unwrap();

    assert!(response.session.is_none());
    assert_eq!(response.user.id, "c-1");
    assert!(dispatch.auth().get_session().is_none());
}

#[tokio::test]
async fn signed_in_session_authorizes_table_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("c-1", "customer")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/customers"))
        .and(header("Authorization", "Bearer access-1"))
        .and(header("apikey", "anon-key"))
        .and(query_param("id", "eq.c-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "c-1", "name": "Cat", "phone": "555" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dispatch = setup(&server);
    dispatch
        .auth()
        .sign_in("cat@example.com", "secret123")
        .await
        .unwrap();

    let customer = dispatch.profiles().customer("c-1").await.unwrap();
    assert_eq!(customer.name.as_deref(), Some("Cat"));
}

#[tokio::test]
async fn bad_credentials_are_not_a_dead_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400,
            "error_code": "invalid_credentials",
            "msg": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let dispatch = setup(&server);
    let err = dispatch
        .auth()
        .sign_in("cat@example.com", "wrong")
        .await
        .unwrap_err();

    match &err {
        Error::Api(api) => assert_eq!(api.code.as_deref(), Some("invalid_credentials")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.is_auth_failure());
}

#[tokio::test]
async fn rejected_refresh_token_clears_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("c-1", "customer")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": "refresh_token_not_found",
            "msg": "Invalid Refresh Token: Refresh Token Not Found"
        })))
        .mount(&server)
        .await;

    let dispatch = setup(&server);
    dispatch.auth().sign_in("cat@example.com", "pw").await.unwrap();

    let err = dispatch.auth().refresh_session().await.unwrap_err();
    assert!(err.is_auth_failure());
    assert!(dispatch.auth().get_session().is_none());
}

#[tokio::test]
async fn sign_out_succeeds_when_server_already_forgot_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("c-1", "customer")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error_code": "session_not_found",
            "msg": "Session from session_id claim in JWT does not exist"
        })))
        .mount(&server)
        .await;

    let dispatch = setup(&server);
    dispatch.auth().sign_in("cat@example.com", "pw").await.unwrap();
    dispatch.auth().sign_out().await.unwrap();
    assert!(dispatch.session().access_token().is_none());
}

#[tokio::test]
async fn sign_out_without_session_is_an_auth_error() {
    let server = MockServer::start().await;
    let dispatch = setup(&server);
    assert!(matches!(
        dispatch.auth().sign_out().await,
        Err(Error::Auth(_))
    ));
}
