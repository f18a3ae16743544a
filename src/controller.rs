//! Runs the session state machine against the real world.
//!
//! The controller owns the one [`Session`], feeds it events, and executes the
//! [`Command`]s it returns: lookups go to the [`ContentClient`], profile
//! changes go to the [`Storage`]. The session lock is only held while an
//! event is applied, never across a lookup, so reads and resets stay
//! responsive while a search is in flight.
//!
//! Each lookup runs on its own task. Dropping the caller of
//! [`SessionController::dispatch`] does not cancel it; the session always
//! leaves `Loading` once the lookup finishes.
//!
//! Applying an event and writing its profile changes happen under one write
//! lock, so the store sees changes in the order the session made them.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::content::ContentClient;
use crate::credentials::CredentialGate;
use crate::error::{LookupError, StorageError};
use crate::model::Classification;
use crate::persistence;
use crate::session::{Command, Event, PersistedSlice, Resolution, Session, SessionSnapshot};
use crate::storage::Storage;

/// Source of the current calendar day.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// The local calendar day of the host.
pub fn local_clock() -> Clock {
    Arc::new(|| Local::now().date_naive())
}

/// Shared handle to the running session.
#[derive(Clone)]
pub struct SessionController {
    session: Arc<Mutex<Session>>,
    /// Held across apply plus persist.
    writes: Arc<Mutex<()>>,
    content: ContentClient,
    storage: Storage,
    gate: Arc<dyn CredentialGate>,
    clock: Clock,
}

impl SessionController {
    /// Load the stored profile as of today and start an idle session.
    pub async fn start(
        content: ContentClient,
        storage: Storage,
        gate: Arc<dyn CredentialGate>,
        clock: Clock,
    ) -> Result<Self, StorageError> {
        let profile = persistence::load_profile(&storage, clock()).await?;
        info!(
            favorites = profile.favorites.len(),
            history = profile.search_history.len(),
            streak = profile.streak,
            "Session profile loaded"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(Session::new(profile))),
            writes: Arc::new(Mutex::new(())),
            content,
            storage,
            gate,
            clock,
        })
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let today = self.today();
        self.session.lock().await.snapshot(today)
    }

    /// Apply `event`, run every command it leads to, and return the
    /// resulting state.
    ///
    /// A search returns once its lookup has completed (or been discarded).
    pub async fn dispatch(&self, event: Event) -> SessionSnapshot {
        for (ticket, query) in self.commit(event).await {
            let controller = self.clone();
            let lookup =
                tokio::spawn(async move { controller.complete_lookup(ticket, query).await });
            if let Err(e) = lookup.await {
                error!(ticket, error = %e, "Lookup task did not finish");
            }
        }

        self.snapshot().await
    }

    /// Apply `event` and persist its changes in order. Returns the lookups
    /// still to run as `(ticket, query)`.
    async fn commit(&self, event: Event) -> Vec<(u64, String)> {
        let _writes = self.writes.lock().await;
        let commands = {
            let today = self.today();
            self.session.lock().await.apply(event, today)
        };

        let mut lookups = Vec::new();
        for command in commands {
            match command {
                Command::Persist(slice) => self.persist(&slice).await,
                Command::Lookup { ticket, query } => lookups.push((ticket, query)),
            }
        }
        lookups
    }

    async fn complete_lookup(&self, ticket: u64, query: String) {
        let outcome = self.lookup(&query).await;
        // The day is read when the result lands, not when the search began.
        let follow_up = self.commit(Event::LookupCompleted { ticket, outcome }).await;
        if !follow_up.is_empty() {
            debug!(ticket, "Completion requested further lookups; ignoring");
        }
    }

    async fn lookup(&self, query: &str) -> Result<Resolution, LookupError> {
        if !self.gate.has_selected_key().await {
            info!("No API key selected; asking host to select one");
            self.gate.open_select_key().await;
        }

        match self.content.describe_species(query).await {
            Ok(Classification::NotAnimal { suggestions }) => {
                Ok(Resolution::NotAnimal { suggestions })
            }
            Ok(Classification::Animal(dossier)) => {
                let images = self.content.render_species_images(&dossier).await;
                Ok(Resolution::Animal { dossier, images })
            }
            Err(e) => {
                warn!(query, kind = e.kind(), error = %e, "Species lookup failed");
                Err(e)
            }
        }
    }

    async fn persist(&self, slice: &PersistedSlice) {
        if let Err(e) = persistence::persist(&self.storage, slice).await {
            // The in-memory profile stays authoritative for this session.
            error!(error = %e, key = slice_name(slice), "Failed to persist profile change");
        }
    }
}

fn slice_name(slice: &PersistedSlice) -> &'static str {
    match slice {
        PersistedSlice::Favorites(_) => persistence::FAVORITES_KEY,
        PersistedSlice::SearchHistory(_) => persistence::HISTORY_KEY,
        PersistedSlice::Streak(_) => persistence::STREAK_KEY,
        PersistedSlice::LastSearchDate(_) => persistence::LAST_DATE_KEY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::task::JoinSet;
    use tokio_test::assert_ok;

    use crate::content::testing::{
        ScriptedBackend, dossier_reply, failure, image_reply, not_animal_reply,
    };
    use crate::content::{
        DEFAULT_FALLBACK_IMAGE_MODEL, DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL, ModelConfig,
    };
    use crate::credentials::KeyRing;
    use crate::data_sources::gemini::{
        GenerateContentRequest, GenerateContentResponse, GenerativeBackend,
    };
    use crate::error::GeminiError;
    use crate::model::{STOCK_PLACEHOLDER_URL, fixtures};
    use crate::session::View;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn search(query: &str) -> Event {
        Event::SearchRequested {
            query: query.to_string(),
        }
    }

    /// Gate that records prompts and never selects anything.
    #[derive(Default)]
    struct CountingGate {
        prompts: AtomicUsize,
    }

    #[async_trait]
    impl CredentialGate for CountingGate {
        async fn has_selected_key(&self) -> bool {
            false
        }

        async fn open_select_key(&self) {
            self.prompts.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Holds the describe-species call until released.
    struct StallingBackend {
        inner: ScriptedBackend,
        release: Notify,
    }

    #[async_trait]
    impl GenerativeBackend for StallingBackend {
        async fn generate_content(
            &self,
            model: &str,
            request: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, GeminiError> {
            if model == DEFAULT_TEXT_MODEL {
                self.release.notified().await;
            }
            self.inner.generate_content(model, request).await
        }
    }

    fn fixed_clock(day: NaiveDate) -> Clock {
        Arc::new(move || day)
    }

    /// A clock the test can move forward while a lookup is in flight.
    fn movable_clock(day: NaiveDate) -> (Clock, Arc<StdMutex<NaiveDate>>) {
        let current = Arc::new(StdMutex::new(day));
        let handle = current.clone();
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (clock, current)
    }

    fn stalling(inner: ScriptedBackend) -> Arc<StallingBackend> {
        Arc::new(StallingBackend {
            inner,
            release: Notify::new(),
        })
    }

    async fn start_on(
        storage: Storage,
        backend: Arc<dyn GenerativeBackend>,
        gate: Arc<dyn CredentialGate>,
        clock: Clock,
    ) -> SessionController {
        let content = ContentClient::new(backend, ModelConfig::default());
        assert_ok!(SessionController::start(content, storage, gate, clock).await)
    }

    async fn controller_with(
        backend: Arc<dyn GenerativeBackend>,
        gate: Arc<dyn CredentialGate>,
        clock: Clock,
    ) -> (SessionController, Storage) {
        let storage = assert_ok!(Storage::new("sqlite::memory:").await);
        let controller = start_on(storage.clone(), backend, gate, clock).await;
        (controller, storage)
    }

    async fn controller(backend: Arc<ScriptedBackend>) -> (SessionController, Storage) {
        controller_with(
            backend,
            Arc::new(KeyRing::with_key("test-key")),
            fixed_clock(today()),
        )
        .await
    }

    async fn wait_while_loading(controller: &SessionController) {
        while matches!(controller.snapshot().await.view, View::Loading { .. }) {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_until_loading(controller: &SessionController) {
        while !matches!(controller.snapshot().await.view, View::Loading { .. }) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_axolotl_search_commits_and_persists() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()))
            .push(DEFAULT_IMAGE_MODEL, image_reply("cHJvZmlsZQ=="))
            .push(DEFAULT_IMAGE_MODEL, image_reply("cG9ydHJhaXQ="));
        let (controller, storage) = controller(backend.clone()).await;

        let snapshot = controller.dispatch(search("axolotl")).await;

        let View::Success(discovery) = &snapshot.view else {
            panic!("expected success, got {:?}", snapshot.view);
        };
        assert_eq!(discovery.dossier.common_name, "Axolotl");
        assert_eq!(discovery.images.len(), 2);
        assert!(discovery.images.first().starts_with("data:image/png;base64,"));
        assert_eq!(snapshot.profile.streak, 1);
        assert_eq!(snapshot.profile.search_history, vec!["Axolotl"]);
        assert_eq!(backend.calls_to(DEFAULT_FALLBACK_IMAGE_MODEL), 0);

        let reloaded = assert_ok!(persistence::load_profile(&storage, today()).await);
        assert_eq!(reloaded, snapshot.profile);
    }

    #[tokio::test]
    async fn test_not_an_animal_skips_images() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(
            DEFAULT_TEXT_MODEL,
            not_animal_reply(&["Axolotl", "Pangolin", "Quokka"]),
        );
        let (controller, storage) = controller(backend.clone()).await;

        let snapshot = controller.dispatch(search("Rock")).await;

        assert!(matches!(snapshot.view, View::NotAnimal { ref suggestions, .. } if suggestions.len() == 3));
        assert_eq!(backend.calls_to(DEFAULT_IMAGE_MODEL), 0);
        assert_eq!(backend.calls_to(DEFAULT_FALLBACK_IMAGE_MODEL), 0);
        assert_eq!(snapshot.profile.streak, 0);
        assert!(assert_ok!(storage.get(persistence::HISTORY_KEY).await).is_none());
    }

    #[tokio::test]
    async fn test_failed_lookup_commits_nothing() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(DEFAULT_TEXT_MODEL, failure());
        let (controller, storage) = controller(backend.clone()).await;

        let snapshot = controller.dispatch(search("Axolotl")).await;

        assert!(matches!(snapshot.view, View::Failed { .. }));
        assert_eq!(snapshot.profile.streak, 0);
        assert!(assert_ok!(storage.get(persistence::STREAK_KEY).await).is_none());
        assert_eq!(backend.calls_to(DEFAULT_IMAGE_MODEL), 0);
    }

    #[tokio::test]
    async fn test_images_degrade_to_placeholder() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()));
        let (controller, _storage) = controller(backend.clone()).await;

        let snapshot = controller.dispatch(search("Axolotl")).await;

        let View::Success(discovery) = &snapshot.view else {
            panic!("expected success, got {:?}", snapshot.view);
        };
        assert_eq!(discovery.images.as_slice(), &[STOCK_PLACEHOLDER_URL.to_string()]);
        assert_eq!(backend.calls_to(DEFAULT_FALLBACK_IMAGE_MODEL), 2);
    }

    #[tokio::test]
    async fn test_missing_key_prompts_host_once_per_lookup() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(DEFAULT_TEXT_MODEL, failure());
        let gate = Arc::new(CountingGate::default());
        let (controller, _storage) =
            controller_with(backend, gate.clone(), fixed_clock(today())).await;

        controller.dispatch(search("Axolotl")).await;
        assert_eq!(gate.prompts.load(Ordering::SeqCst), 1);

        // Empty queries never reach the gate.
        controller.dispatch(search("  ")).await;
        assert_eq!(gate.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_favorite_toggle_is_persisted() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()));
        let (controller, storage) = controller(backend).await;

        controller.dispatch(search("Axolotl")).await;
        let snapshot = controller.dispatch(Event::ToggleFavorite).await;
        assert!(snapshot.is_favorite);

        let reloaded = assert_ok!(persistence::load_profile(&storage, today()).await);
        assert_eq!(reloaded.favorites.len(), 1);
        assert_eq!(reloaded.favorites[0].image, STOCK_PLACEHOLDER_URL);
    }

    #[tokio::test]
    async fn test_reset_during_lookup_discards_result() {
        let inner = ScriptedBackend::new();
        inner.push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()));
        let backend = stalling(inner);
        let (controller, storage) = controller_with(
            backend.clone(),
            Arc::new(KeyRing::with_key("k")),
            fixed_clock(today()),
        )
        .await;

        let in_flight = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.dispatch(search("Axolotl")).await })
        };
        wait_until_loading(&controller).await;

        // A second search while loading is ignored; reset is not.
        let ignored = controller.dispatch(search("Quokka")).await;
        assert!(matches!(ignored.view, View::Loading { ref query, .. } if query == "Axolotl"));
        let reset = controller.dispatch(Event::Reset).await;
        assert_eq!(reset.view, View::Idle);

        backend.release.notify_one();
        let finished = assert_ok!(in_flight.await);

        assert_eq!(finished.view, View::Idle);
        assert_eq!(finished.profile.streak, 0);
        assert!(assert_ok!(storage.get(persistence::HISTORY_KEY).await).is_none());
    }

    #[tokio::test]
    async fn test_dropped_search_still_completes() {
        let inner = ScriptedBackend::new();
        inner
            .push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()))
            .push(DEFAULT_TEXT_MODEL, not_animal_reply(&["Quokka"]));
        let backend = stalling(inner);
        let (controller, storage) = controller_with(
            backend.clone(),
            Arc::new(KeyRing::with_key("k")),
            fixed_clock(today()),
        )
        .await;

        let caller = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.dispatch(search("Axolotl")).await })
        };
        wait_until_loading(&controller).await;

        // The caller goes away, as when a client disconnects mid-request.
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        backend.release.notify_one();
        wait_while_loading(&controller).await;

        let snapshot = controller.snapshot().await;
        assert!(matches!(snapshot.view, View::Success(_)));
        assert_eq!(snapshot.profile.streak, 1);
        assert_eq!(
            assert_ok!(storage.get(persistence::HISTORY_KEY).await).as_deref(),
            Some("[\"Axolotl\"]")
        );

        // The session accepts new searches again.
        backend.release.notify_one();
        let next = controller.dispatch(search("Rock")).await;
        assert!(matches!(next.view, View::NotAnimal { ref query, .. } if query == "Rock"));
    }

    #[tokio::test]
    async fn test_lookup_commits_on_the_day_it_finishes() {
        let inner = ScriptedBackend::new();
        inner
            .push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()))
            .push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()));
        let backend = stalling(inner);
        let (clock, current_day) = movable_clock(today());
        let (controller, storage) =
            controller_with(backend.clone(), Arc::new(KeyRing::with_key("k")), clock).await;

        backend.release.notify_one();
        let first = controller.dispatch(search("Axolotl")).await;
        assert_eq!(first.profile.streak, 1);

        let in_flight = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.dispatch(search("Axolotl")).await })
        };
        wait_until_loading(&controller).await;

        // Midnight passes while the lookup runs.
        let tomorrow = today().succ_opt().unwrap();
        *current_day.lock().unwrap() = tomorrow;
        backend.release.notify_one();
        let finished = assert_ok!(in_flight.await);

        assert_eq!(finished.profile.last_search_date, Some(tomorrow));
        assert_eq!(finished.profile.streak, 2);
        let reloaded = assert_ok!(persistence::load_profile(&storage, tomorrow).await);
        assert_eq!(reloaded.last_search_date, Some(tomorrow));
        assert_eq!(reloaded.streak, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_leave_store_matching_session() {
        let path = std::env::temp_dir().join(format!(
            "faunasphere-toggles-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let storage = assert_ok!(Storage::new(&url).await);

        let backend = Arc::new(ScriptedBackend::new());
        backend.push(DEFAULT_TEXT_MODEL, dossier_reply(&fixtures::axolotl()));
        let controller = start_on(
            storage.clone(),
            backend,
            Arc::new(KeyRing::with_key("k")),
            fixed_clock(today()),
        )
        .await;
        controller.dispatch(search("Axolotl")).await;

        let mut toggles = JoinSet::new();
        for _ in 0..25 {
            let controller = controller.clone();
            toggles.spawn(async move { controller.dispatch(Event::ToggleFavorite).await });
        }
        while let Some(done) = toggles.join_next().await {
            assert_ok!(done);
        }

        let in_memory = controller.snapshot().await.profile.favorites;
        assert_eq!(in_memory.len(), 1);
        let stored = assert_ok!(persistence::load_profile(&storage, today()).await);
        assert_eq!(stored.favorites, in_memory);

        let _ = std::fs::remove_file(&path);
    }
}
