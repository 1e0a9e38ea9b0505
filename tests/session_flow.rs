//! Cross-device flows over one shared in-process store: what the lead
//! writes, every follower's state machine observes.

use bandcue::cue::CueTimer;
use bandcue::local::LocalStore;
use bandcue::model::{CueDraft, LeadAction, LeadActionKind, Role};
use bandcue::session::SessionManager;
use bandcue::store::{MemoryStore, RemoteStore};
use tokio::time::{advance, Duration};

async fn device(store: &MemoryStore) -> SessionManager<MemoryStore> {
    let local = LocalStore::open("sqlite::memory:").await.unwrap();
    SessionManager::new(store.clone(), local, CueTimer::default())
}

/// Lets listener tasks drain their channels without advancing the clock.
async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn second_device_joins_by_code() {
    let store = MemoryStore::default();
    let lead = device(&store).await;
    let band = device(&store).await;

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);
    assert_eq!(band.role().await, Some(Role::Band));

    let raw = store.read(&format!("sessions/{code}")).await.unwrap();
    assert_eq!(raw["memberCount"], 2);

    settle().await;
    // the lead's own mirror catches up through its subscription
    assert_eq!(lead.current_session().unwrap().member_count, 2);
    assert_eq!(lead.current_session().unwrap().members.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cue_reaches_follower_and_expires() {
    let store = MemoryStore::default();
    let lead = device(&store).await;
    let band = device(&store).await;

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);

    let mut draft = CueDraft::text("X2 Ref");
    draft.duration = Some(6000);
    lead.send_cue(draft).await.unwrap();
    settle().await;

    assert_eq!(band.cue_timer().current().unwrap().text, "X2 Ref");

    advance(Duration::from_millis(5999)).await;
    settle().await;
    assert_eq!(band.cue_timer().current().unwrap().text, "X2 Ref");

    advance(Duration::from_millis(2)).await;
    settle().await;
    assert!(band.cue_timer().current().is_none());
}

#[tokio::test(start_paused = true)]
async fn newer_cue_preempts_the_pending_one() {
    let store = MemoryStore::default();
    let lead = device(&store).await;
    let band = device(&store).await;

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);

    let mut a = CueDraft::text("A");
    a.duration = Some(6000);
    lead.send_cue(a).await.unwrap();
    settle().await;

    advance(Duration::from_millis(5000)).await;
    settle().await;

    let mut b = CueDraft::text("B");
    b.duration = Some(6000);
    lead.send_cue(b).await.unwrap();
    settle().await;

    // past A's original deadline, B is still up
    advance(Duration::from_millis(2000)).await;
    settle().await;
    assert_eq!(band.cue_timer().current().unwrap().text, "B");

    advance(Duration::from_millis(4001)).await;
    settle().await;
    assert!(band.cue_timer().current().is_none());
}

#[tokio::test(start_paused = true)]
async fn empty_cue_clears_the_follower_display() {
    let store = MemoryStore::default();
    let lead = device(&store).await;
    let band = device(&store).await;

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);

    let mut cue = CueDraft::text("Pauză Instrumental");
    cue.duration = Some(15000);
    lead.send_cue(cue).await.unwrap();
    settle().await;
    assert!(band.cue_timer().current().is_some());

    lead.send_cue(CueDraft::text("")).await.unwrap();
    settle().await;
    assert!(band.cue_timer().current().is_none());

    // no stray expiry pending
    advance(Duration::from_secs(120)).await;
    settle().await;
    assert!(band.cue_timer().current().is_none());
}

#[tokio::test(start_paused = true)]
async fn end_session_is_observed_by_the_band() {
    let store = MemoryStore::default();
    let lead = device(&store).await;
    let band = device(&store).await;

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);
    assert!(band.current_session().unwrap().active);

    lead.end_session().await.unwrap();
    settle().await;

    // the band's next session snapshot carries the flip; the UI redirects on it
    let session = band.current_session().unwrap();
    assert!(!session.active);
    assert!(session.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn latest_lead_action_wins() {
    let store = MemoryStore::default();
    let lead = device(&store).await;
    let band = device(&store).await;

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);

    let mut scroll = LeadAction::new(LeadActionKind::Scroll);
    scroll.y = Some(120.0);
    lead.send_lead_action(scroll).await.unwrap();
    settle().await;

    let mut page = LeadAction::new(LeadActionKind::PageChange);
    page.page = Some(3);
    lead.send_lead_action(page).await.unwrap();
    settle().await;

    let action = band.watch_lead_action().borrow().clone().unwrap();
    assert_eq!(action.kind, LeadActionKind::PageChange);
    assert_eq!(action.page, Some(3));
}

#[tokio::test(start_paused = true)]
async fn follower_leaving_then_lead_leaving_ends_the_session() {
    let store = MemoryStore::default();
    let lead = device(&store).await;
    let band = device(&store).await;

    let code = lead.create_session().await.unwrap();
    assert!(band.join_session(&code).await);

    band.leave_session().await.unwrap();
    let raw = store.read(&format!("sessions/{code}")).await.unwrap();
    assert_eq!(raw["active"], true);
    assert_eq!(raw["memberCount"], 1);

    lead.leave_session().await.unwrap();
    let raw = store.read(&format!("sessions/{code}")).await.unwrap();
    assert_eq!(raw["active"], false);
    assert_eq!(raw["memberCount"], 0);
    assert!(raw["endedAt"].is_i64());
}
