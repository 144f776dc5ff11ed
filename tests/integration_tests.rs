//! End-to-end run against a real project. Needs `SUPABASE_URL` and
//! `SUPABASE_ANON_KEY` (a `.env` file works) plus the `customers`,
//! `mechanics` and `requests` tables with email confirmation disabled.
//!
//! `cargo test --test integration_tests -- --ignored`

use dotenv::dotenv;
use mechanic_dispatch::auth::Role;
use mechanic_dispatch::geo::Coordinates;
use mechanic_dispatch::profiles::{Customer, Mechanic};
use mechanic_dispatch::request::{NewRequest, RequestStatus};
use mechanic_dispatch::Dispatch;
use uuid::Uuid;

const CAIRO: Coordinates = Coordinates { lat: 30.0444, lng: 31.2357 };
const GIZA: Coordinates = Coordinates { lat: 30.0131, lng: 31.2089 };

fn client() -> Dispatch {
    dotenv().ok();
    Dispatch::from_env().expect("SUPABASE_URL and SUPABASE_ANON_KEY must be set")
}

#[tokio::test]
#[ignore]
async fn request_lifecycle_against_live_backend() {
    let customer_app = client();
    let mechanic_app = client();
    let run = Uuid::new_v4().simple().to_string();

    let customer = customer_app
        .auth()
        .sign_up(&format!("customer-{}@example.com", run), "test_password123", Role::Customer)
        .await
        .unwrap();
    let customer_id = customer.user.id.clone();
    customer_app
        .profiles()
        .save_customer(&Customer {
            id: customer_id.clone(),
            name: Some("Live Customer".into()),
            phone: None,
            email: customer.user.email.clone(),
        })
        .await
        .unwrap();

    let mechanic = mechanic_app
        .auth()
        .sign_up(&format!("mechanic-{}@example.com", run), "test_password123", Role::Mechanic)
        .await
        .unwrap();
    let mechanic_id = mechanic.user.id.clone();
    mechanic_app
        .profiles()
        .save_mechanic(&Mechanic {
            id: mechanic_id.clone(),
            name: Some("Live Mechanic".into()),
            phone: None,
            email: mechanic.user.email.clone(),
            specialty: None,
            lat: Some(GIZA.lat),
            lng: Some(GIZA.lng),
            location_updated_at: None,
        })
        .await
        .unwrap();

    let created = customer_app
        .requests()
        .create(NewRequest {
            customer_id: customer_id.clone(),
            mechanic_id: None,
            car_type: Some("Sedan".into()),
            description: "Battery will not hold a charge".into(),
            location: CAIRO,
        })
        .await
        .unwrap();
    assert_eq!(created.status, RequestStatus::Pending);

    let requests = mechanic_app.requests();
    let accepted = requests
        .accept(&created.id, &mechanic_id, Some(GIZA))
        .await
        .unwrap();
    assert_eq!(accepted.mechanic_id.as_deref(), Some(mechanic_id.as_str()));
    assert!(accepted.distance_label().is_some());

    requests.mark_arrived(&created.id, &mechanic_id).await.unwrap();
    let done = requests.complete(&created.id, &mechanic_id).await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);

    let history = customer_app.requests().for_customer(&customer_id).await.unwrap();
    assert!(history.iter().any(|r| r.id == created.id));

    customer_app.auth().sign_out().await.unwrap();
    mechanic_app.auth().sign_out().await.unwrap();
}
