//! The session state machine: one instance per device, owning the device's
//! role, the in-memory mirror of the current session, and the listener tasks
//! that keep that mirror in sync with the remote store.
//!
//! Transitions: `Idle -> Lead(id)` via [`SessionManager::create_session`],
//! `Idle -> Band(id)` via [`SessionManager::join_session`], back to `Idle`
//! via [`SessionManager::leave_session`] or [`SessionManager::logout`].
//! Reactive outputs are `watch` channels; the presentation layer subscribes
//! and re-renders, it never mutates.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::cue::CueTimer;
use crate::error::{CueErr, CueResult};
use crate::local::{LocalStore, ROLE_KEY, SESSION_ID_KEY, USER_ID_KEY};
use crate::model::{
    default_session_tiles, new_session_code, now_ms, Cue, CueDraft, LeadAction, Role, Session,
    SessionMember, SessionSettings, TileConfig, TilePatch,
};
use crate::store::{RemoteStore, StoreWatch};

const CODE_RETRIES: usize = 4;

fn session_path(id: &str) -> String {
    format!("sessions/{id}")
}

pub struct SessionManager<S: RemoteStore> {
    shared: Arc<Shared<S>>,
}

impl<S: RemoteStore> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<S> {
    store: S,
    local: LocalStore,
    timer: CueTimer,
    state: RwLock<Inner>,
    session_tx: watch::Sender<Option<Session>>,
    members_tx: watch::Sender<HashMap<String, SessionMember>>,
    lead_action_tx: watch::Sender<Option<LeadAction>>,
    connected_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct Inner {
    user_id: Option<String>,
    role: Option<Role>,
    session_id: Option<String>,
    listeners: Vec<JoinHandle<()>>,
}

impl<S: RemoteStore> SessionManager<S> {
    pub fn new(store: S, local: LocalStore, timer: CueTimer) -> Self {
        let (session_tx, _) = watch::channel(None);
        let (members_tx, _) = watch::channel(HashMap::new());
        let (lead_action_tx, _) = watch::channel(None);
        let (connected_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                store,
                local,
                timer,
                state: RwLock::new(Inner::default()),
                session_tx,
                members_tx,
                lead_action_tx,
                connected_tx,
            }),
        }
    }

    /* ---------------- reactive outputs ---------------- */

    pub fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.shared.session_tx.subscribe()
    }

    pub fn watch_members(&self) -> watch::Receiver<HashMap<String, SessionMember>> {
        self.shared.members_tx.subscribe()
    }

    pub fn watch_lead_action(&self) -> watch::Receiver<Option<LeadAction>> {
        self.shared.lead_action_tx.subscribe()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.shared.connected_tx.subscribe()
    }

    /// The presentation timer holding the follower's visible cue.
    pub fn cue_timer(&self) -> &CueTimer {
        &self.shared.timer
    }

    pub fn current_session(&self) -> Option<Session> {
        self.shared.session_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected_tx.borrow()
    }

    pub async fn role(&self) -> Option<Role> {
        self.shared.state.read().await.role
    }

    pub async fn session_id(&self) -> Option<String> {
        self.shared.state.read().await.session_id.clone()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.shared.state.read().await.user_id.clone()
    }

    /* ---------------- lifecycle ---------------- */

    /// Creates a session and becomes its lead. Returns the join code.
    pub async fn create_session(&self) -> CueResult<String> {
        let user_id = self.ensure_user_id().await?;
        let id = self.fresh_session_code().await?;
        let now = now_ms();

        let mut members = HashMap::new();
        members.insert(
            user_id.clone(),
            SessionMember {
                role: Role::Lead,
                joined_at: now,
                last_seen: None,
            },
        );
        let session = Session {
            id: id.clone(),
            role_lead: user_id,
            active: true,
            created_at: now,
            ended_at: None,
            member_count: 1,
            members,
            cue: None,
            session_settings: Some(SessionSettings {
                tiles: default_session_tiles(),
            }),
        };

        let record = serde_json::to_value(&session)?;
        self.shared
            .store
            .write(&session_path(&id), record)
            .await
            .map_err(|e| CueErr::SessionCreateFailed(e.to_string()))?;

        self.enter(Role::Lead, &id, session).await?;
        tracing::info!(session = %id, "session created");
        Ok(id)
    }

    /// Joins an existing session as a band member. False when the code is
    /// unknown, the session has ended, or the store could not be reached;
    /// in every false case the device stays `Idle`.
    pub async fn join_session(&self, id: &str) -> bool {
        match self.try_join(id).await {
            Ok(()) => true,
            Err(CueErr::SessionNotFound(_)) => {
                tracing::info!(session = %id, "join refused: unknown code");
                false
            }
            Err(CueErr::SessionInactive(_)) => {
                tracing::info!(session = %id, "join refused: session has ended");
                false
            }
            Err(e) => {
                tracing::warn!(session = %id, "join failed: {e}");
                self.shared.connected_tx.send_replace(false);
                false
            }
        }
    }

    async fn try_join(&self, id: &str) -> CueResult<()> {
        let user_id = self.ensure_user_id().await?;

        let raw = self.shared.store.read(&session_path(id)).await?;
        if raw.is_null() {
            return Err(CueErr::SessionNotFound(id.into()));
        }
        let session: Session = serde_json::from_value(raw)?;
        if !session.active {
            return Err(CueErr::SessionInactive(id.into()));
        }

        // register ourselves; rejoining just overwrites the old entry
        let now = now_ms();
        let member = SessionMember {
            role: Role::Band,
            joined_at: now,
            last_seen: Some(now),
        };
        self.shared
            .store
            .write(
                &format!("sessions/{id}/members/{user_id}"),
                serde_json::to_value(&member)?,
            )
            .await?;
        // separate write; the counter can drift under concurrent joins
        self.shared
            .store
            .write(
                &format!("sessions/{id}/memberCount"),
                Value::from(session.member_count + 1),
            )
            .await?;

        let raw = self.shared.store.read(&session_path(id)).await?;
        if raw.is_null() {
            return Err(CueErr::SessionNotFound(id.into()));
        }
        let mut session: Session = serde_json::from_value(raw)?;
        session.id = id.to_string();

        self.enter(Role::Band, id, session).await?;
        tracing::info!(session = %id, "joined session");
        Ok(())
    }

    /// Broadcasts a cue. No-op without a current session; the timestamp is
    /// stamped here, and the last write to the cue path wins.
    pub async fn send_cue(&self, draft: CueDraft) -> CueResult<()> {
        let Some(id) = self.session_id().await else {
            return Ok(());
        };
        let cue = draft.into_cue(now_ms());
        self.shared
            .store
            .write(&format!("sessions/{id}/cue"), serde_json::to_value(&cue)?)
            .await?;
        tracing::debug!(session = %id, text = %cue.text, "cue sent");
        Ok(())
    }

    /// Appends to the session's lead-action log. No-op without a session.
    pub async fn send_lead_action(&self, action: LeadAction) -> CueResult<()> {
        let Some(id) = self.session_id().await else {
            return Ok(());
        };
        let mut action = action;
        action.timestamp = now_ms();
        self.shared
            .store
            .append(
                &format!("sessions/{id}/leadActions"),
                serde_json::to_value(&action)?,
            )
            .await?;
        Ok(())
    }

    /// Refreshes this device's `lastSeen` stamp on its member entry.
    /// No-op without a session.
    pub async fn touch_last_seen(&self) -> CueResult<()> {
        let (user_id, session_id) = {
            let st = self.shared.state.read().await;
            (st.user_id.clone(), st.session_id.clone())
        };
        let (Some(user_id), Some(id)) = (user_id, session_id) else {
            return Ok(());
        };
        self.shared
            .store
            .write(
                &format!("sessions/{id}/members/{user_id}/lastSeen"),
                Value::from(now_ms()),
            )
            .await
    }

    /// Removes this device from the session and returns to `Idle`. The last
    /// member out also marks the session ended; a lead leaving earlier does
    /// not. Remote failures are logged, the local transition always happens.
    pub async fn leave_session(&self) -> CueResult<()> {
        let (user_id, session_id) = {
            let st = self.shared.state.read().await;
            (st.user_id.clone(), st.session_id.clone())
        };
        if let (Some(user_id), Some(id)) = (user_id, session_id) {
            if let Err(e) = self.depart_remote(&id, &user_id).await {
                tracing::warn!(session = %id, "leave bookkeeping failed: {e}");
            } else {
                tracing::info!(session = %id, "left session");
            }
        }
        self.reset_local(true).await
    }

    async fn depart_remote(&self, id: &str, user_id: &str) -> CueResult<()> {
        self.shared
            .store
            .write(&format!("sessions/{id}/members/{user_id}"), Value::Null)
            .await?;

        let raw = self.shared.store.read(&session_path(id)).await?;
        if raw.is_null() {
            return Ok(());
        }
        let session: Session = serde_json::from_value(raw)?;
        let remaining = session.member_count.saturating_sub(1);
        self.shared
            .store
            .write(&format!("sessions/{id}/memberCount"), Value::from(remaining))
            .await?;
        if remaining == 0 {
            self.shared
                .store
                .write(&format!("sessions/{id}/active"), Value::Bool(false))
                .await?;
            self.shared
                .store
                .write(&format!("sessions/{id}/endedAt"), Value::from(now_ms()))
                .await?;
        }
        Ok(())
    }

    /// Lead-only: ends the session for everyone. Other devices notice the
    /// `active` flip through their own session subscription.
    pub async fn end_session(&self) -> CueResult<()> {
        let (role, session_id) = {
            let st = self.shared.state.read().await;
            (st.role, st.session_id.clone())
        };
        let (Some(Role::Lead), Some(id)) = (role, session_id) else {
            return Ok(());
        };
        self.shared
            .store
            .write(&format!("sessions/{id}/active"), Value::Bool(false))
            .await?;
        self.shared
            .store
            .write(&format!("sessions/{id}/endedAt"), Value::from(now_ms()))
            .await?;
        tracing::info!(session = %id, "session ended");
        Ok(())
    }

    /// Drops the persisted identity and every bit of in-memory state. Never
    /// touches the remote store.
    pub async fn logout(&self) -> CueResult<()> {
        self.reset_local(true).await?;
        self.shared.local.remove(USER_ID_KEY).await?;
        self.shared.state.write().await.user_id = None;
        Ok(())
    }

    /// Locally dismiss the visible cue.
    pub fn clear_cue(&self) {
        self.shared.timer.clear();
    }

    /// Startup path: re-enter the session persisted from a previous run.
    /// False when any resumption key is missing or the fetch fails.
    pub async fn resume(&self) -> CueResult<bool> {
        let user_id = self.shared.local.get(USER_ID_KEY).await?;
        let session_id = self.shared.local.get(SESSION_ID_KEY).await?;
        let role = self
            .shared
            .local
            .get(ROLE_KEY)
            .await?
            .and_then(|r| Role::parse(&r));
        let (Some(user_id), Some(id), Some(role)) = (user_id, session_id, role) else {
            return Ok(false);
        };

        self.shared.state.write().await.user_id = Some(user_id);
        match self.shared.store.read(&session_path(&id)).await {
            Ok(raw) if !raw.is_null() => {
                let mut session: Session = serde_json::from_value(raw)?;
                session.id = id.clone();
                self.enter(role, &id, session).await?;
                tracing::info!(session = %id, role = role.as_str(), "session resumed");
                Ok(true)
            }
            Ok(_) => {
                self.shared.connected_tx.send_replace(false);
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(session = %id, "resume fetch failed: {e}");
                self.shared.connected_tx.send_replace(false);
                Ok(false)
            }
        }
    }

    /* ---------------- session-scoped tiles ---------------- */

    pub async fn add_session_tile(&self, tile: TileConfig) -> CueResult<String> {
        let mut tile = tile;
        tile.id = crate::model::new_tile_id();
        let id = tile.id.clone();
        self.mutate_session_tiles(move |tiles| tiles.push(tile)).await?;
        Ok(id)
    }

    pub async fn update_session_tile(&self, id: &str, patch: TilePatch) -> CueResult<()> {
        self.mutate_session_tiles(|tiles| {
            if let Some(tile) = tiles.iter_mut().find(|t| t.id == id) {
                patch.apply(tile);
            }
        })
        .await
    }

    pub async fn remove_session_tile(&self, id: &str) -> CueResult<()> {
        self.mutate_session_tiles(|tiles| tiles.retain(|t| t.id != id))
            .await
    }

    /// Active tiles of the current session's shared grid, in order.
    pub fn session_active_tiles(&self) -> Vec<TileConfig> {
        self.shared
            .session_tx
            .borrow()
            .as_ref()
            .and_then(|s| s.session_settings.as_ref())
            .map(|ss| ss.tiles.iter().filter(|t| t.is_active).cloned().collect())
            .unwrap_or_default()
    }

    async fn mutate_session_tiles(
        &self,
        mutate: impl FnOnce(&mut Vec<TileConfig>),
    ) -> CueResult<()> {
        let Some(mut session) = self.shared.session_tx.borrow().clone() else {
            return Ok(());
        };
        let mut settings = session.session_settings.take().unwrap_or_default();
        mutate(&mut settings.tiles);
        session.session_settings = Some(settings.clone());
        let id = session.id.clone();

        // local snapshot first, then the shared record
        self.shared.session_tx.send_replace(Some(session));
        self.shared
            .store
            .write(
                &format!("sessions/{id}/sessionSettings"),
                serde_json::to_value(&settings)?,
            )
            .await
    }

    /* ---------------- internals ---------------- */

    async fn ensure_user_id(&self) -> CueResult<String> {
        if let Some(id) = self.shared.state.read().await.user_id.clone() {
            return Ok(id);
        }
        let id = self.shared.local.ensure_device_id().await?;
        self.shared.state.write().await.user_id = Some(id.clone());
        Ok(id)
    }

    async fn fresh_session_code(&self) -> CueResult<String> {
        for _ in 0..CODE_RETRIES {
            let code = new_session_code();
            let taken = self
                .shared
                .store
                .read(&session_path(&code))
                .await
                .map_err(|e| CueErr::SessionCreateFailed(e.to_string()))?;
            if taken.is_null() {
                return Ok(code);
            }
            tracing::warn!(code = %code, "session code collision, retrying");
        }
        Err(CueErr::SessionCreateFailed(
            "could not allocate an unused session code".into(),
        ))
    }

    async fn enter(&self, role: Role, id: &str, session: Session) -> CueResult<()> {
        self.shared.local.set(SESSION_ID_KEY, id).await?;
        self.shared.local.set(ROLE_KEY, role.as_str()).await?;
        {
            let mut st = self.shared.state.write().await;
            st.role = Some(role);
            st.session_id = Some(id.to_string());
        }
        self.shared.members_tx.send_replace(session.members.clone());
        self.shared.session_tx.send_replace(Some(session));
        self.shared.connected_tx.send_replace(true);
        self.spawn_listeners(role, id).await;
        Ok(())
    }

    /// Tears down listeners first, then clears local state, so a late
    /// callback cannot resurrect a session the device has left.
    async fn reset_local(&self, clear_keys: bool) -> CueResult<()> {
        let listeners = {
            let mut st = self.shared.state.write().await;
            std::mem::take(&mut st.listeners)
        };
        for handle in listeners {
            handle.abort();
        }
        {
            let mut st = self.shared.state.write().await;
            st.role = None;
            st.session_id = None;
        }
        self.shared.session_tx.send_replace(None);
        self.shared.members_tx.send_replace(HashMap::new());
        self.shared.lead_action_tx.send_replace(None);
        self.shared.connected_tx.send_replace(false);
        self.shared.timer.clear();
        if clear_keys {
            self.shared.local.remove(SESSION_ID_KEY).await?;
            self.shared.local.remove(ROLE_KEY).await?;
        }
        Ok(())
    }

    /// One listener set per (role, session); replaced wholesale on any
    /// transition.
    async fn spawn_listeners(&self, role: Role, id: &str) {
        let mut listeners = Vec::new();

        match self.shared.store.subscribe(&session_path(id)).await {
            Ok(rx) => listeners.push(self.spawn_session_listener(id.to_string(), rx)),
            Err(e) => tracing::warn!(session = %id, "session subscribe failed: {e}"),
        }
        match self
            .shared
            .store
            .subscribe(&format!("sessions/{id}/members"))
            .await
        {
            Ok(rx) => listeners.push(self.spawn_members_listener(rx)),
            Err(e) => tracing::warn!(session = %id, "members subscribe failed: {e}"),
        }
        if role == Role::Band {
            match self
                .shared
                .store
                .subscribe(&format!("sessions/{id}/cue"))
                .await
            {
                Ok(rx) => listeners.push(self.spawn_cue_listener(rx)),
                Err(e) => tracing::warn!(session = %id, "cue subscribe failed: {e}"),
            }
            match self
                .shared
                .store
                .subscribe(&format!("sessions/{id}/leadActions"))
                .await
            {
                Ok(rx) => listeners.push(self.spawn_lead_action_listener(rx)),
                Err(e) => tracing::warn!(session = %id, "leadActions subscribe failed: {e}"),
            }
        }

        let mut st = self.shared.state.write().await;
        for old in st.listeners.drain(..) {
            old.abort();
        }
        st.listeners = listeners;
    }

    fn spawn_session_listener(&self, id: String, mut rx: StoreWatch) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                let value = rx.borrow_and_update().clone();
                if !value.is_null() {
                    match serde_json::from_value::<Session>(value) {
                        Ok(mut session) => {
                            session.id = id.clone();
                            if !session.active {
                                tracing::info!(session = %id, "session marked inactive");
                            }
                            shared.session_tx.send_replace(Some(session));
                        }
                        Err(e) => tracing::warn!("unreadable session record: {e}"),
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_members_listener(&self, mut rx: StoreWatch) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                let value = rx.borrow_and_update().clone();
                let members: HashMap<String, SessionMember> = if value.is_null() {
                    HashMap::new()
                } else {
                    serde_json::from_value(value).unwrap_or_else(|e| {
                        tracing::warn!("unreadable members map: {e}");
                        HashMap::new()
                    })
                };
                shared.members_tx.send_replace(members);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_cue_listener(&self, mut rx: StoreWatch) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                let value = rx.borrow_and_update().clone();
                if !value.is_null() {
                    match serde_json::from_value::<Cue>(value) {
                        Ok(cue) => shared.timer.on_cue(cue),
                        Err(e) => tracing::warn!("unreadable cue: {e}"),
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_lead_action_listener(&self, mut rx: StoreWatch) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                let value = rx.borrow_and_update().clone();
                if let Some(log) = value.as_object() {
                    // append keys sort in insertion order; the last one wins
                    let latest = log
                        .values()
                        .next_back()
                        .and_then(|v| serde_json::from_value::<LeadAction>(v.clone()).ok());
                    if let Some(action) = latest {
                        shared.lead_action_tx.send_replace(Some(action));
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
