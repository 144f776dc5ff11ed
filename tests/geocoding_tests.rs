use mechanic_dispatch::error::Error;
use mechanic_dispatch::geo::Coordinates;
use mechanic_dispatch::geocoding::{LocationClass, ReverseGeocoder};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GIZA: Coordinates = Coordinates { lat: 30.0131, lng: 31.2089 };
const CAIRO: Coordinates = Coordinates { lat: 30.0444, lng: 31.2357 };

fn geocoder(server: &MockServer, debounce: Duration) -> ReverseGeocoder {
    ReverseGeocoder::new(reqwest::Client::new(), &server.uri(), "dispatch-tests/1.0", debounce)
}

async fn mount_address(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("format", "jsonv2"))
        .and(header("User-Agent", "dispatch-tests/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "display_name": "Pyramids Road, Giza, Egypt",
            "address": {
                "road": "Pyramids Road",
                "city": "Giza",
                "country": "Egypt",
                "postcode": 12511
            }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn lookups_inside_the_window_reuse_the_cached_address() {
    let server = MockServer::start().await;
    mount_address(&server, 1).await;

    let geocoder = geocoder(&server, Duration::from_secs(60));
    let first = geocoder.lookup(LocationClass::Customer, GIZA).await.unwrap();
    let second = geocoder.lookup(LocationClass::Customer, CAIRO).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.part("city"), Some("Giza"));
    assert_eq!(first.part("postcode"), Some("12511"));
    assert_eq!(first.short_label(), "Pyramids Road, Giza");
}

#[tokio::test]
async fn each_location_class_has_its_own_window() {
    let server = MockServer::start().await;
    mount_address(&server, 2).await;

    let geocoder = geocoder(&server, Duration::from_secs(60));
    geocoder.lookup(LocationClass::Customer, GIZA).await.unwrap();
    geocoder.lookup(LocationClass::Mechanic, CAIRO).await.unwrap();
    geocoder.lookup(LocationClass::Mechanic, CAIRO).await.unwrap();
}

#[tokio::test]
async fn lookups_after_the_window_go_to_the_network() {
    let server = MockServer::start().await;
    mount_address(&server, 2).await;

    let geocoder = geocoder(&server, Duration::ZERO);
    geocoder.lookup(LocationClass::Mechanic, GIZA).await.unwrap();
    geocoder.lookup(LocationClass::Mechanic, GIZA).await.unwrap();
}

#[tokio::test]
async fn empty_results_are_geocoding_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "Unable to geocode" })))
        .expect(2)
        .mount(&server)
        .await;

    let geocoder = geocoder(&server, Duration::from_secs(60));
    let err = geocoder.lookup(LocationClass::Customer, GIZA).await.unwrap_err();
    assert!(matches!(err, Error::Geocoding(msg) if msg == "Unable to geocode"));

    // Failures are not cached.
    assert!(geocoder.lookup(LocationClass::Customer, GIZA).await.is_err());
}

#[tokio::test]
async fn server_errors_surface_as_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .mount(&server)
        .await;

    let geocoder = geocoder(&server, Duration::from_secs(5));
    let err = geocoder.reverse(GIZA).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn a_slow_lookup_does_not_hold_up_the_other_class() {
    let server = MockServer::start().await;
    let body = json!({ "display_name": "Somewhere, Egypt", "address": { "country": "Egypt" } });
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("lat", GIZA.lat.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body.clone())
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("lat", CAIRO.lat.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let geocoder = geocoder(&server, Duration::from_secs(60));
    let customer = geocoder.lookup(LocationClass::Customer, GIZA);
    let mechanic = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = std::time::Instant::now();
        geocoder.lookup(LocationClass::Mechanic, CAIRO).await.unwrap();
        started.elapsed()
    };
    let (customer, mechanic_took) = tokio::join!(customer, mechanic);

    customer.unwrap();
    assert!(mechanic_took < Duration::from_millis(500), "{:?}", mechanic_took);
}
