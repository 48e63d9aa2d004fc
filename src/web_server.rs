use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    serve, Form, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path as FsPath, PathBuf},
    sync::{Arc, PoisonError},
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tower_http::{services::ServeFile, trace::TraceLayer};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::constants;
use crate::language::Language;
use crate::session::{Entry, Notice, SendOutcome, SessionController, SessionState, Transcript};

/// One live session and when a request last looked it up.
struct SessionSlot {
    state: Mutex<SessionState>,
    last_seen: std::sync::Mutex<Instant>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::new()),
            last_seen: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

type SessionHandle = Arc<SessionSlot>;

/// Shared application state. Each session sits behind its own lock so one
/// session's model call never blocks another.
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    controller: SessionController,
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
    session_ttl: Duration,
    background_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(
        templates_dir: impl Into<PathBuf>,
        background_path: impl Into<PathBuf>,
        controller: SessionController,
    ) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(templates_dir.into())),
            controller,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_ttl: Duration::from_secs(constants::DEFAULT_SESSION_TTL_SECS),
            background_path: Arc::new(background_path.into()),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    async fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(SessionSlot::new()));
        info!(%id, "Session created");
        id
    }

    async fn session(&self, id: Uuid) -> Result<SessionHandle, WebError> {
        let slot = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(WebError::UnknownSession(id))?;
        slot.touch();
        Ok(slot)
    }

    /// Drops sessions idle for longer than the TTL. A session mid-action is kept.
    pub async fn evict_idle_sessions(&self) -> usize {
        let ttl = self.session_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.idle_for() < ttl || slot.state.try_lock().is_err());
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, live = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Periodically evicts idle sessions until the returned task is aborted.
pub fn spawn_session_sweeper(state: AppState) -> JoinHandle<()> {
    let every = (state.session_ttl / 4).clamp(Duration::from_millis(10), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            state.evict_idle_sessions().await;
        }
    })
}

#[derive(Debug)]
enum WebError {
    UnknownSession(Uuid),
    Render(minijinja::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::UnknownSession(id) => {
                debug!(%id, "Request for unknown session");
                (StatusCode::NOT_FOUND, Html("Session not found".to_string())).into_response()
            }
            WebError::Render(e) => {
                error!("Failed to get or render template: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Html(format!("Internal Server Error: {}", e)),
                )
                    .into_response()
            }
        }
    }
}

fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

#[derive(Debug, Deserialize)]
struct SendForm {
    #[serde(default)]
    prompt: String,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LanguageForm {
    language: String,
    /// Whatever was typed in the composer when the dropdown changed.
    #[serde(default)]
    prompt: String,
}

/// JSON view of one session.
#[derive(Debug, Serialize)]
struct SessionView<'a> {
    id: Uuid,
    language: Language,
    pending_clear: bool,
    input_value: &'a str,
    transcript: &'a Transcript,
    notice: Option<&'a Notice>,
}

#[derive(Debug, Serialize)]
struct CreatedSession {
    id: Uuid,
}

fn session_url(id: Uuid) -> String {
    format!("/session/{}", id)
}

async fn index_handler(State(state): State<AppState>) -> Redirect {
    let id = state.create_session().await;
    Redirect::to(&session_url(id))
}

async fn create_session_api(State(state): State<AppState>) -> impl IntoResponse {
    let id = state.create_session().await;
    (StatusCode::CREATED, Json(CreatedSession { id }))
}

fn render_page(
    templates: &AutoReloader,
    id: Uuid,
    session: &SessionState,
    has_background: bool,
) -> Result<String, minijinja::Error> {
    let env = templates.acquire_env()?;
    let tmpl = env.get_template("index.html")?;
    let entries: Vec<Entry<'_>> = session.entries();
    let languages: Vec<&str> = Language::ALL.iter().map(|l| l.label()).collect();
    tmpl.render(minijinja::context! {
        title => constants::PAGE_TITLE,
        session_url => session_url(id),
        languages => languages,
        language => session.language().label(),
        entries => entries,
        input_value => session.input_value(),
        has_background => has_background,
    })
}

async fn session_page(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, WebError> {
    let handle = state.session(id).await?;
    let mut session = handle.state.lock().await;
    let has_background = background_available(&state.background_path);
    let page = render_page(&state.templates, id, &session, has_background).map_err(WebError::Render)?;
    // The page just rendered an empty input, so a pending clear is done.
    session.acknowledge_clear();
    Ok(Html(page))
}

async fn send_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<SendForm>,
) -> Result<Redirect, WebError> {
    let handle = state.session(id).await?;
    let mut session = handle.state.lock().await;
    if let Some(choice) = form.language.as_deref() {
        if let Err(e) = session.select_language(choice) {
            debug!(%id, "Ignoring language selection: {}", e);
        }
    }
    let language = session.language();
    match state.controller.send(&mut session, &form.prompt, language).await {
        SendOutcome::Replied => info!(%id, "Reply appended"),
        SendOutcome::Ignored => debug!(%id, "Empty prompt ignored"),
        SendOutcome::Failed(kind) => info!(%id, ?kind, "Send failed, notice shown"),
    }
    Ok(Redirect::to(&session_url(id)))
}

async fn reset_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Redirect, WebError> {
    let handle = state.session(id).await?;
    handle.state.lock().await.reset();
    Ok(Redirect::to(&session_url(id)))
}

async fn language_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<LanguageForm>,
) -> Result<Redirect, WebError> {
    let handle = state.session(id).await?;
    let mut session = handle.state.lock().await;
    session.keep_draft(&form.prompt);
    match session.select_language(&form.language) {
        Ok(language) => info!(%id, %language, "Language selected"),
        Err(e) => debug!(%id, "Ignoring language selection: {}", e),
    }
    Ok(Redirect::to(&session_url(id)))
}

async fn session_api(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, WebError> {
    let handle = state.session(id).await?;
    let session = handle.state.lock().await;
    let view = SessionView {
        id,
        language: session.language(),
        pending_clear: session.pending_clear(),
        input_value: session.input_value(),
        transcript: session.transcript(),
        notice: session.notice(),
    };
    Ok(Json(view).into_response())
}

/// Builds the application router. Split out so tests can drive it in-process.
pub fn build_router(state: AppState) -> Router {
    let background = ServeFile::new(state.background_path.as_path());
    Router::new()
        .route("/", get(index_handler))
        .route("/session/:id", get(session_page))
        .route("/session/:id/send", post(send_handler))
        .route("/session/:id/reset", post(reset_handler))
        .route("/session/:id/language", post(language_handler))
        .route("/api/sessions", post(create_session_api))
        .route("/api/session/:id", get(session_api))
        .route_service("/background.png", background)
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    info!(ttl = ?state.session_ttl, "Starting idle session sweeper");
    let sweeper = spawn_session_sweeper(state.clone());
    let app = build_router(state);
    info!("Web server listening on http://{}", addr);

    let served = serve(listener, app.into_make_service()).await;
    sweeper.abort();
    served.context("Web server failed")?;

    Ok(())
}

/// Whether a background image should be applied for this path.
pub fn background_available(path: &FsPath) -> bool {
    path.is_file()
}
