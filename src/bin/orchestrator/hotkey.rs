use anyhow::Result;
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::mpsc;

use crate::Activation;

/// Listen for Ctrl+Shift+F on a dedicated thread and turn each press into an
/// activation without a prompt.
pub fn spawn_listener(tx: mpsc::Sender<Activation>) {
    let spawned = std::thread::Builder::new()
        .name("hotkey".into())
        .spawn(move || {
            if let Err(e) = listen(tx) {
                tracing::warn!(error = %e, "global hotkey unavailable, use the web UI instead");
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not start the hotkey thread");
    }
}

fn listen(tx: mpsc::Sender<Activation>) -> Result<()> {
    // the manager unregisters on drop, so it lives as long as the loop
    let manager = GlobalHotKeyManager::new()?;
    let hotkey = HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::KeyF);
    manager.register(hotkey)?;
    tracing::info!("registered global hotkey Ctrl+Shift+F");

    let events = GlobalHotKeyEvent::receiver();
    while let Ok(event) = events.recv() {
        if event.id != hotkey.id() || event.state != HotKeyState::Pressed {
            continue;
        }
        tracing::info!("hotkey pressed");
        if tx.blocking_send(Activation { prompt: None }).is_err() {
            break;
        }
    }
    Ok(())
}
