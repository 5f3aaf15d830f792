//! Page Session, Application, and Session Manager (spec.md §4.7, §4.9):
//! per-page isolated render state, the `Application` container that owns a
//! set of pages plus its own `TokenService`, and a TTL-indexed session
//! registry independent of page lifetime.
//!
//! Grounded on the teacher's builder-configured, lock-guarded-map shape
//! (`shipwright-liveview-hotreload::build_cache`'s `Arc<Mutex<HashMap<...>>>`),
//! adapted from a single flat cache to the two-level Application/Page
//! ownership spec.md §5 describes, and from `std::sync::Mutex` to
//! `parking_lot::Mutex` for the uncontended-lock fast path the teacher's own
//! `enhanced_watcher.rs`/`error_recovery.rs` reach for `tokio::sync::RwLock`
//! to get in their async contexts — this crate is synchronous end to end, so
//! `parking_lot` is the matching choice here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngCore;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::data::{FuncMap, Scope};
use crate::error::{Error, Result};
use crate::strategy;
use crate::template_set::TemplateSet;
use crate::tree::{self, TreeNode};
use crate::wire::{self, UpdateEnvelope};
use crate::token::{TokenService, TokenServiceConfig};

struct PageState {
    last_data: Option<Value>,
    last_tree_per_fragment: HashMap<String, TreeNode>,
    closed: bool,
}

/// Per-page isolated state: exclusively owned by its `Application`, the
/// last-rendered tree per top-level fragment, a cache token shared with the
/// client, and the data snapshot `render`/`render_fragments` diff against
/// (spec.md §3, §4.7).
pub struct Page {
    id: String,
    app_id: String,
    template_set: Arc<TemplateSet>,
    funcs: FuncMap,
    cache_token: String,
    state: Mutex<PageState>,
}

impl Page {
    fn new(id: String, app_id: String, template_set: Arc<TemplateSet>, funcs: FuncMap) -> Self {
        Page {
            id,
            app_id,
            template_set,
            funcs,
            cache_token: Uuid::new_v4().to_string(),
            state: Mutex::new(PageState {
                last_data: None,
                last_tree_per_fragment: HashMap::new(),
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Opaque, stable per-page identifier the client keys its static
    /// skeleton cache by (spec.md §3, §6).
    pub fn cache_token(&self) -> &str {
        &self.cache_token
    }

    /// First-time render: produces the full HTML and seeds
    /// `last_tree_per_fragment`/`last_data` for later diffing.
    #[tracing::instrument(skip(self, data), fields(page_id = %self.id))]
    pub fn render(&self, data: Value) -> Result<String> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PageClosed);
        }
        let root_tree = self.render_root(&data)?;
        let html = root_tree.flatten();
        state.last_tree_per_fragment = self.slot_map(&root_tree);
        state.last_data = Some(data);
        Ok(html)
    }

    /// Render a new data snapshot, diff every top-level fragment against the
    /// last committed tree, and return the envelopes for fragments whose
    /// diff is non-empty. All-or-nothing: on any error, or on cancellation,
    /// no state is committed and the caller's last successful tree remains
    /// current (spec.md §4.7, §5, §7).
    #[tracing::instrument(skip(self, new_data, cancel), fields(page_id = %self.id))]
    pub fn render_fragments(
        &self,
        new_data: Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<UpdateEnvelope>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PageClosed);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let root_tree = self.render_root(&new_data)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let new_slots = self.slot_map(&root_tree);
        let mut envelopes = Vec::new();
        for id in self.template_set.root_top_level_ids() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let key = id.as_str();
            let capability = self.template_set.capability_of(key);
            let root_conditional = self.template_set.is_root_conditional(key);
            let old_tree = state.last_tree_per_fragment.get(key);
            let new_tree = new_slots.get(key);
            let decision =
                strategy::select_action(capability, root_conditional, old_tree, new_tree);
            if let Some(envelope) = wire::envelope_for(id, decision) {
                envelopes.push(envelope);
            }
        }

        state.last_tree_per_fragment = new_slots;
        state.last_data = Some(new_data);
        Ok(envelopes)
    }

    /// Drop this page's state. Subsequent operations fail with
    /// [`Error::PageClosed`] (spec.md §4.7).
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.last_data = None;
        state.last_tree_per_fragment.clear();
    }

    fn render_root(&self, data: &Value) -> Result<TreeNode> {
        let body = self
            .template_set
            .registry()
            .get(self.template_set.root_name())
            .ok_or_else(|| Error::TemplateExecution {
                fragment: self.template_set.root_name().to_string(),
                message: "root template missing from registry".into(),
            })?;
        let mut scope = Scope::root(data.clone());
        tree::render_nodes(body, &mut scope, &self.funcs, self.template_set.registry())
    }

    /// Zip the root tree's top-level dynamic slots against the template
    /// set's top-level fragment IDs (in the same left-to-right order both
    /// were produced in — see `fragment::ExtractionResult::top_level_ids`).
    fn slot_map(&self, root_tree: &TreeNode) -> HashMap<String, TreeNode> {
        let TreeNode::Composite { slots, .. } = root_tree else {
            return HashMap::new();
        };
        self.template_set
            .root_top_level_ids()
            .iter()
            .zip(slots.iter())
            .map(|(id, slot)| (id.as_str().to_string(), slot.clone()))
            .collect()
    }
}

/// Container owning a set of pages and one `TokenService` instance.
/// Lifetime: process-scoped (spec.md §3). Every `Application` is
/// self-contained — there is no process-wide singleton (spec.md §9).
pub struct Application {
    id: String,
    pages: Mutex<HashMap<String, Arc<Page>>>,
    token_service: TokenService,
}

impl Application {
    pub fn new(id: impl Into<String>, token_config: TokenServiceConfig) -> Self {
        Application {
            id: id.into(),
            pages: Mutex::new(HashMap::new()),
            token_service: TokenService::new(token_config),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token_service(&self) -> &TokenService {
        &self.token_service
    }

    /// Create a new page bound to `template_set`, and a page token that
    /// authorizes it. Map mutation is guarded by the application's single
    /// lock; the returned `Page` is then accessed through its own lock
    /// (spec.md §5 — "no API on the core takes two page locks simultaneously").
    #[tracing::instrument(skip(self, template_set, funcs), fields(app_id = %self.id))]
    pub fn create_page(
        &self,
        template_set: Arc<TemplateSet>,
        funcs: FuncMap,
    ) -> Result<(Arc<Page>, String)> {
        let page_id = Uuid::new_v4().to_string();
        let page = Arc::new(Page::new(
            page_id.clone(),
            self.id.clone(),
            template_set,
            funcs,
        ));
        self.pages.lock().insert(page_id.clone(), page.clone());
        let token = self.token_service.generate_token(&self.id, &page_id)?;
        Ok((page, token))
    }

    /// Look up a page by ID. The map lock is held only for the lookup
    /// itself; all subsequent operations on the returned `Page` go through
    /// its own lock.
    pub fn get_page(&self, page_id: &str) -> Option<Arc<Page>> {
        self.pages.lock().get(page_id).cloned()
    }

    pub fn close_page(&self, page_id: &str) -> Result<()> {
        let page = self
            .pages
            .lock()
            .remove(page_id)
            .ok_or(Error::PageNotFound)?;
        page.close();
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

/// One entry in the [`SessionManager`]'s TTL-indexed registry (spec.md
/// §4.9). Independent of `Page`'s own lifetime — a session can outlive or
/// be swept before the page it references.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub app_id: String,
    pub page_id: String,
    pub cache_token: String,
    pub created_at: Instant,
    pub last_access: Instant,
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub ttl: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        SessionManagerConfig {
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl SessionManagerConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// TTL-indexed session registry (spec.md §4.9). Guarded by a single lock
/// around the mapping, independent of any `Application`'s page map.
pub struct SessionManager {
    config: SessionManagerConfig,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        SessionManager {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_session(&self, app_id: &str, page_id: &str, cache_token: &str) -> Session {
        let now = Instant::now();
        let session = Session {
            id: random_session_id(),
            app_id: app_id.to_string(),
            page_id: page_id.to_string(),
            cache_token: cache_token.to_string(),
            created_at: now,
            last_access: now,
        };
        self.sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Look up a session by ID, refreshing `last_access` on a hit.
    /// Returns `None` if the session doesn't exist or has aged past its TTL
    /// — an expired session is deleted on this read, not merely ignored.
    pub fn get_session(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let expired = sessions
            .get(id)
            .map(|s| s.last_access.elapsed() > self.config.ttl)
            .unwrap_or(false);
        if expired {
            sessions.remove(id);
            return None;
        }
        let session = sessions.get_mut(id)?;
        session.last_access = Instant::now();
        Some(session.clone())
    }

    /// Same as [`get_session`](Self::get_session), but for callers that
    /// want a typed error instead of `None` when the session is missing or
    /// has expired (spec.md §7: `Error::SessionExpired`).
    pub fn get_session_checked(&self, id: &str) -> Result<Session> {
        self.get_session(id).ok_or(Error::SessionExpired)
    }

    /// Periodic sweep: drop every session whose TTL has elapsed. Callers
    /// schedule this themselves — the core starts no background tasks
    /// (spec.md §5).
    pub fn cleanup_expired_sessions(&self) {
        let ttl = self.config.ttl;
        self.sessions
            .lock()
            .retain(|_, s| s.last_access.elapsed() <= ttl);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

fn random_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template_set::TemplateSet;
    use serde_json::json;

    fn app() -> Application {
        Application::new("app-1", TokenServiceConfig::default())
    }

    #[test]
    fn first_render_produces_full_html_and_seeds_tree() {
        let set = Arc::new(TemplateSet::parse("root", "<p>Hello {{.Name}}!</p>").unwrap());
        let (page, _token) = app().create_page(set, FuncMap::new()).unwrap();
        let html = page.render(json!({"Name": "World"})).unwrap();
        assert_eq!(html, "<p>Hello World!</p>");
    }

    #[test]
    fn render_fragments_emits_scenario_s1() {
        let set = Arc::new(TemplateSet::parse("root", "<p>Hello {{.Name}}!</p>").unwrap());
        let (page, _token) = app().create_page(set, FuncMap::new()).unwrap();
        page.render(json!({"Name": "World"})).unwrap();
        let cancel = CancellationToken::new();
        let envelopes = page
            .render_fragments(json!({"Name": "Universe"}), &cancel)
            .unwrap();
        assert_eq!(envelopes.len(), 1);
        let data = envelopes[0].data.as_ref().unwrap();
        assert_eq!(data["0"], json!("Universe"));
    }

    #[test]
    fn identical_data_emits_no_envelopes() {
        let set = Arc::new(TemplateSet::parse("root", "<p>{{.Content}}</p>").unwrap());
        let (page, _token) = app().create_page(set, FuncMap::new()).unwrap();
        page.render(json!({"Content": "<b>"})).unwrap();
        let cancel = CancellationToken::new();
        let envelopes = page
            .render_fragments(json!({"Content": "<b>"}), &cancel)
            .unwrap();
        assert!(envelopes.is_empty());
    }

    #[test]
    fn closed_page_rejects_further_operations() {
        let set = Arc::new(TemplateSet::parse("root", "<p>{{.X}}</p>").unwrap());
        let (page, _token) = app().create_page(set, FuncMap::new()).unwrap();
        page.render(json!({"X": "y"})).unwrap();
        page.close();
        assert!(matches!(
            page.render(json!({"X": "z"})).unwrap_err(),
            Error::PageClosed
        ));
    }

    #[test]
    fn cancelled_render_fragments_commits_nothing() {
        let set = Arc::new(TemplateSet::parse("root", "<p>{{.X}}</p>").unwrap());
        let (page, _token) = app().create_page(set, FuncMap::new()).unwrap();
        page.render(json!({"X": "y"})).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = page
            .render_fragments(json!({"X": "z"}), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        // The stale snapshot is still what a fresh diff compares against.
        let fresh = CancellationToken::new();
        let envelopes = page.render_fragments(json!({"X": "z"}), &fresh).unwrap();
        assert_eq!(envelopes.len(), 1);
    }

    #[test]
    fn application_owns_independent_pages() {
        let application = app();
        let set = Arc::new(TemplateSet::parse("root", "<p>{{.X}}</p>").unwrap());
        let (page_a, _) = application.create_page(set.clone(), FuncMap::new()).unwrap();
        let (page_b, _) = application.create_page(set, FuncMap::new()).unwrap();
        assert_ne!(page_a.id(), page_b.id());
        assert_eq!(application.page_count(), 2);
        application.close_page(page_a.id()).unwrap();
        assert_eq!(application.page_count(), 1);
    }

    #[test]
    fn session_manager_expires_sessions_by_ttl() {
        let manager = SessionManager::new(SessionManagerConfig::default().with_ttl(Duration::from_millis(10)));
        let session = manager.create_session("app-1", "page-1", "cache-1");
        std::thread::sleep(Duration::from_millis(20));
        assert!(manager.get_session(&session.id).is_none());
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn session_manager_refreshes_last_access_on_get() {
        let manager = SessionManager::new(SessionManagerConfig::default());
        let session = manager.create_session("app-1", "page-1", "cache-1");
        let fetched = manager.get_session(&session.id).unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[test]
    fn get_session_checked_errors_on_expiry() {
        let manager =
            SessionManager::new(SessionManagerConfig::default().with_ttl(Duration::from_millis(10)));
        let session = manager.create_session("app-1", "page-1", "cache-1");
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            manager.get_session_checked(&session.id).unwrap_err(),
            Error::SessionExpired
        ));
    }

    #[test]
    fn get_session_checked_succeeds_for_live_session() {
        let manager = SessionManager::new(SessionManagerConfig::default());
        let session = manager.create_session("app-1", "page-1", "cache-1");
        assert_eq!(manager.get_session_checked(&session.id).unwrap().id, session.id);
    }
}
