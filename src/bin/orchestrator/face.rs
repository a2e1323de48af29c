use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use securefill::coordinator::{PromptUi, RunState};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::Activation;

/// Events streamed to the page via SSE.
#[derive(Clone, Debug)]
pub enum FillEvent {
    Status { state: RunState, message: String },
    PromptRequested,
    Closed,
}

impl FillEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            FillEvent::Status { state, message } => Event::default().event("status").data(
                serde_json::json!({"state": state, "message": message}).to_string(),
            ),
            FillEvent::PromptRequested => Event::default().event("prompt_requested").data("{}"),
            FillEvent::Closed => Event::default().event("closed").data("{}"),
        }
    }
}

/// Browser-page stand-in for the prompt window.
pub struct WebUi {
    event_tx: broadcast::Sender<FillEvent>,
    pending: Mutex<Option<oneshot::Sender<Option<String>>>>,
}

impl WebUi {
    fn new() -> Self {
        let (event_tx, _) = broadcast::channel::<FillEvent>(64);
        Self {
            event_tx,
            pending: Mutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<oneshot::Sender<Option<String>>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand `answer` to a run waiting for a prompt. Returns it back if no
    /// run is waiting.
    fn answer(&self, answer: Option<String>) -> Result<(), Option<String>> {
        match self.pending().take() {
            Some(tx) => tx.send(answer),
            None => Err(answer),
        }
    }
}

#[async_trait]
impl PromptUi for WebUi {
    async fn request_prompt(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        *self.pending() = Some(tx);
        let _ = self.event_tx.send(FillEvent::PromptRequested);
        rx.await.unwrap_or(None)
    }

    fn show_status(&self, state: &RunState, message: &str) {
        let _ = self.event_tx.send(FillEvent::Status {
            state: state.clone(),
            message: message.to_string(),
        });
    }

    fn close(&self) {
        self.pending().take();
        let _ = self.event_tx.send(FillEvent::Closed);
    }
}

#[derive(Clone)]
struct AppState {
    ui: Arc<WebUi>,
    activation_tx: mpsc::Sender<Activation>,
}

#[derive(Deserialize)]
struct PromptPayload {
    #[serde(default)]
    prompt: String,
}

/// Start the web UI on the first free port from `first_port`.
pub async fn start_server(
    first_port: u16,
    activation_tx: mpsc::Sender<Activation>,
) -> Result<Arc<WebUi>> {
    let ui = Arc::new(WebUi::new());
    let state = AppState {
        ui: Arc::clone(&ui),
        activation_tx,
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/prompt", post(prompt_handler))
        .route("/cancel", post(cancel_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for port in first_port..first_port.saturating_add(10) {
        if let Ok(l) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            bound = Some((l, port));
            break;
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind the web UI to any port {}-{}",
            first_port,
            first_port.saturating_add(9)
        )
    })?;

    tracing::info!("web UI running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "web UI server stopped");
        }
    });

    Ok(ui)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn prompt_handler(
    State(state): State<AppState>,
    Json(payload): Json<PromptPayload>,
) -> &'static str {
    tracing::debug!(prompt = %payload.prompt, "POST /prompt");
    if let Err(Some(prompt)) = state.ui.answer(Some(payload.prompt)) {
        let _ = state
            .activation_tx
            .send(Activation {
                prompt: Some(prompt),
            })
            .await;
    }
    "ok"
}

async fn cancel_handler(State(state): State<AppState>) -> &'static str {
    let _ = state.ui.answer(None);
    "ok"
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.ui.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<FillEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>SecureFill Assistant</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 24px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  header .dot.busy { background: #f59e0b; }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 640px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 16px;
    overflow: hidden;
  }
  #ask { font-size: 15px; font-weight: 600; color: #a5b4fc; min-height: 20px; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 8px; }
  .entry { padding: 10px 14px; border-radius: 8px; font-size: 14px; line-height: 1.5; }
  .entry.user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.status { background: #111118; border-left: 3px solid #3b82f6; }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.done { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .input-area { display: flex; flex-direction: column; gap: 8px; }
  #prompt {
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 15px;
    min-height: 80px;
    resize: vertical;
    outline: none;
  }
  #prompt:focus { border-color: #6366f1; }
  #prompt:disabled { opacity: 0.5; }
  .buttons { display: flex; gap: 8px; }
  button {
    flex: 1;
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 24px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
  }
  button.secondary { background: #27272a; flex: 0 0 auto; }
  button:disabled { background: #333; cursor: not-allowed; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>SecureFill Assistant</h1>
  </header>
  <div class="main">
    <div id="ask"></div>
    <div class="input-area">
      <textarea id="prompt" placeholder="e.g. Use my work details. Leave empty to use your primary data."></textarea>
      <div class="buttons">
        <button id="fill" onclick="fill()">Fill Form</button>
        <button id="cancel" class="secondary" onclick="cancel()">Cancel</button>
      </div>
    </div>
    <div id="log"></div>
  </div>
<script>
  const log = document.getElementById('log');
  const promptBox = document.getElementById('prompt');
  const fillBtn = document.getElementById('fill');
  const ask = document.getElementById('ask');
  const dot = document.getElementById('status-dot');

  function esc(s) { return String(s).replace(/</g, '&lt;'); }

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.prepend(div);
  }

  function setBusy(b) {
    promptBox.disabled = b;
    fillBtn.disabled = b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) promptBox.focus();
  }

  async function fill() {
    const text = promptBox.value.trim();
    promptBox.value = '';
    ask.textContent = '';
    addEntry('user', '<strong>You:</strong> ' + (text ? esc(text) : '<em>use primary data</em>'));
    setBusy(true);
    await fetch('/prompt', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({prompt: text}),
    });
  }

  async function cancel() {
    ask.textContent = '';
    await fetch('/cancel', {method: 'POST'});
  }

  promptBox.addEventListener('keydown', e => {
    if (e.key === 'Enter' && (e.ctrlKey || e.metaKey)) fill();
  });

  const es = new EventSource('/events');

  es.addEventListener('prompt_requested', () => {
    ask.textContent = 'What would you like to do?';
    setBusy(false);
    window.focus();
  });

  es.addEventListener('status', e => {
    const d = JSON.parse(e.data);
    const state = d.state.state;
    if (state === 'idle' || state === 'awaiting_prompt') return;
    if (state === 'error') {
      addEntry('error', '<strong>Failed:</strong> ' + esc(d.message));
    } else if (state === 'done') {
      addEntry('done', esc(d.message));
    } else {
      setBusy(true);
      addEntry('status', esc(d.message));
    }
  });

  es.addEventListener('closed', () => {
    ask.textContent = '';
    setBusy(false);
  });

  addEntry('done', 'Ready. Press Ctrl+Shift+F on a form, or type an instruction here.');
</script>
</body>
</html>
"##;
