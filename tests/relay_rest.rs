//! RestStore against a live relay on an ephemeral port: the full
//! HTTP + SSE path a real multi-device band runs over.

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use bandcue::cue::CueTimer;
use bandcue::local::LocalStore;
use bandcue::model::CueDraft;
use bandcue::relay;
use bandcue::session::SessionManager;
use bandcue::store::{MemoryStore, RemoteStore, RestStore};
use bandcue::CueErr;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay(secret: &str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = relay::router(MemoryStore::default(), secret.to_string());
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rest_roundtrip_and_watch() {
    let base = start_relay("s3cret").await;
    let store = RestStore::new(base, "s3cret");

    assert!(store.read("sessions/NOPE").await.unwrap().is_null());

    store
        .write("sessions/A/cue", json!({"text": "go", "timestamp": 1}))
        .await
        .unwrap();
    assert_eq!(store.read("sessions/A/cue").await.unwrap()["text"], "go");

    let mut rx = store.subscribe("sessions/A/cue").await.unwrap();
    timeout(WAIT, rx.changed()).await.unwrap().unwrap();
    assert_eq!(rx.borrow_and_update()["text"], "go");

    store
        .write("sessions/A/cue", json!({"text": "stop", "timestamp": 2}))
        .await
        .unwrap();
    timeout(WAIT, rx.changed()).await.unwrap().unwrap();
    assert_eq!(rx.borrow_and_update()["text"], "stop");

    let key = store
        .append("sessions/A/leadActions", json!({"type": "SCROLL", "timestamp": 3}))
        .await
        .unwrap();
    let log = store.read("sessions/A/leadActions").await.unwrap();
    assert_eq!(log[key.as_str()]["type"], "SCROLL");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_secret_is_rejected() {
    let base = start_relay("right").await;
    let store = RestStore::new(base, "wrong");

    assert!(matches!(
        store.read("sessions/A").await.unwrap_err(),
        CueErr::Store(_)
    ));
    assert!(matches!(
        store.write("sessions/A", json!(1)).await.unwrap_err(),
        CueErr::Store(_)
    ));
    assert!(matches!(
        store.subscribe("sessions/A").await.unwrap_err(),
        CueErr::Store(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cue_flows_lead_to_band_over_the_relay() {
    let base = start_relay("s3cret").await;

    let lead = SessionManager::new(
        RestStore::new(base.clone(), "s3cret"),
        LocalStore::open("sqlite::memory:").await.unwrap(),
        CueTimer::default(),
    );
    let band = SessionManager::new(
        RestStore::new(base, "s3cret"),
        LocalStore::open("sqlite::memory:").await.unwrap(),
        CueTimer::default(),
    );

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);

    let mut visible = band.cue_timer().watch();
    let mut draft = CueDraft::text("Finalul Rărit");
    draft.duration = Some(60_000); // long enough not to expire mid-test
    lead.send_cue(draft).await.unwrap();

    let text = timeout(WAIT, async {
        loop {
            visible.changed().await.unwrap();
            if let Some(cue) = visible.borrow_and_update().clone() {
                break cue.text;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(text, "Finalul Rărit");

    lead.end_session().await.unwrap();
    let mut session_rx = band.watch_session();
    timeout(WAIT, async {
        loop {
            if session_rx.borrow_and_update().as_ref().is_some_and(|s| !s.active) {
                break;
            }
            session_rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}
