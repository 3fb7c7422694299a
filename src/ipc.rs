//! Compositor IPC client (spec.md 6): a sway-compatible i3-ipc client over
//! a Unix-domain socket. Seeds the window context with one `GET_TREE`
//! query at startup, then follows a long-lived `SUBSCRIBE ["window"]`
//! stream, updating the shared snapshot on every `focus` change.
//!
//! Hand-rolled framing rather than a crate, since nothing else in the
//! dependency stack needs a sway client and the wire format (a 14-byte
//! header plus a JSON payload) is small enough that pulling in a
//! full-blown i3ipc crate would be the heavier choice (see SPEC_FULL.md
//! 4.B).

use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::window_context::{Window, WindowContextHandle};

const MAGIC: &[u8; 6] = b"i3-ipc";
const HEADER_LEN: usize = 14;

const MESSAGE_TYPE_SUBSCRIBE: u32 = 2;
const MESSAGE_TYPE_GET_TREE: u32 = 4;

/// Discovers the sway IPC socket path: `$SWAYSOCK` if set, else the first
/// `/run/user/<uid>/sway-ipc.<uid>.*.sock` glob match.
pub fn discover_socket(uid: u32) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SWAYSOCK") {
        return Ok(PathBuf::from(path));
    }

    let dir = PathBuf::from(format!("/run/user/{uid}"));
    let prefix = format!("sway-ipc.{uid}.");
    let entry = std::fs::read_dir(&dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".sock"))
        })
        .ok_or_else(|| anyhow!("no sway-ipc socket found under {}", dir.display()))?;
    Ok(entry.path())
}

/// Reads `/proc/self/status` for the process's real uid; used as the
/// default target for socket discovery when `-u/--uid` is not given.
pub fn current_uid() -> Result<u32> {
    let status = std::fs::read_to_string("/proc/self/status").context("reading /proc/self/status")?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            let uid = rest
                .split_whitespace()
                .next()
                .ok_or_else(|| anyhow!("malformed Uid line in /proc/self/status"))?;
            return uid.parse().context("parsing uid");
        }
    }
    Err(anyhow!("no Uid line in /proc/self/status"))
}

struct SwayClient {
    stream: UnixStream,
}

impl SwayClient {
    async fn connect(path: &std::path::Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("connecting to sway socket {}", path.display()))?;
        Ok(SwayClient { stream })
    }

    async fn send(&mut self, message_type: u32, payload: &[u8]) -> Result<()> {
        let mut header = Vec::with_capacity(HEADER_LEN + payload.len());
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        header.extend_from_slice(&message_type.to_le_bytes());
        header.extend_from_slice(payload);
        self.stream
            .write_all(&header)
            .await
            .context("writing sway IPC request")
    }

    async fn recv(&mut self) -> Result<(u32, Value)> {
        let mut header = [0u8; HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .context("reading sway IPC header")?;
        if &header[0..6] != MAGIC {
            return Err(anyhow!("bad sway IPC magic"));
        }
        let len = u32::from_le_bytes(header[6..10].try_into().unwrap()) as usize;
        let message_type = u32::from_le_bytes(header[10..14].try_into().unwrap());

        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("reading sway IPC payload")?;
        let value: Value = serde_json::from_slice(&payload).context("parsing sway IPC payload")?;
        Ok((message_type, value))
    }

    async fn get_tree(&mut self) -> Result<Value> {
        self.send(MESSAGE_TYPE_GET_TREE, b"").await?;
        let (_, value) = self.recv().await?;
        Ok(value)
    }

    async fn subscribe_window(&mut self) -> Result<()> {
        self.send(MESSAGE_TYPE_SUBSCRIBE, br#"["window"]"#).await?;
        let (_, ack) = self.recv().await?;
        if ack.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(anyhow!("sway rejected window subscription: {ack}"));
        }
        Ok(())
    }
}

/// Walks a `GET_TREE` response looking for the focused container, used to
/// seed the window context before the first focus event arrives.
fn find_focused(node: &Value) -> Option<&Value> {
    if node.get("focused").and_then(Value::as_bool) == Some(true) {
        return Some(node);
    }
    for key in ["nodes", "floating_nodes"] {
        if let Some(children) = node.get(key).and_then(Value::as_array) {
            for child in children {
                if let Some(found) = find_focused(child) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// Extracts `(class, title)` from a container node: `app_id` for native
/// Wayland clients, `window_properties.class` for XWayland, falling back
/// to empty strings (spec.md 4.B).
fn window_from_container(container: &Value) -> Window {
    let class = container
        .get("app_id")
        .and_then(Value::as_str)
        .or_else(|| {
            container
                .get("window_properties")
                .and_then(|props| props.get("class"))
                .and_then(Value::as_str)
        })
        .unwrap_or_default();
    let title = container.get("name").and_then(Value::as_str).unwrap_or_default();
    Window::new(class, title)
}

/// Connects to the compositor, seeds `window` from one `GET_TREE` query,
/// then follows the `SUBSCRIBE ["window"]` stream until the connection
/// drops or a `shutdown` change is seen. Errors are logged and treated as
/// non-fatal for the process: per spec.md 7, the window context simply
/// stays at its last known value and restarting the subscription is out
/// of core scope.
pub async fn run(window: WindowContextHandle, uid: Option<u32>) {
    let uid = match uid {
        Some(uid) => uid,
        None => match current_uid() {
            Ok(uid) => uid,
            Err(e) => {
                warn!("ipc: could not determine uid: {e}");
                return;
            }
        },
    };

    let socket_path = match discover_socket(uid) {
        Ok(path) => path,
        Err(e) => {
            debug!("ipc: no compositor socket found, window context stays empty: {e}");
            return;
        }
    };

    if let Err(e) = run_inner(&socket_path, window).await {
        warn!("ipc: subscription ended: {e}");
    }
}

async fn run_inner(socket_path: &std::path::Path, window: WindowContextHandle) -> Result<()> {
    let mut seed_client = SwayClient::connect(socket_path).await?;
    match seed_client.get_tree().await {
        Ok(tree) => {
            if let Some(focused) = find_focused(&tree) {
                window.update(window_from_container(focused));
            }
        }
        Err(e) => debug!("ipc: initial GET_TREE failed: {e}"),
    }

    let mut sub_client = SwayClient::connect(socket_path).await?;
    sub_client.subscribe_window().await?;
    info!("ipc: subscribed to window focus events on {}", socket_path.display());

    loop {
        let (_, event) = match sub_client.recv().await {
            Ok(event) => event,
            Err(e) if is_eof(&e) => {
                debug!("ipc: connection closed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match event.get("change").and_then(Value::as_str) {
            Some("focus") => {
                if let Some(container) = event.get("container") {
                    window.update(window_from_container(container));
                }
            }
            Some("shutdown") => {
                debug!("ipc: compositor reported shutdown");
                return Ok(());
            }
            _ => {}
        }
    }
}

fn is_eof(e: &anyhow::Error) -> bool {
    e.downcast_ref::<io::Error>()
        .is_some_and(|io_err| io_err.kind() == io::ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_focused_walks_nested_nodes() {
        let tree = serde_json::json!({
            "nodes": [
                { "focused": false, "app_id": "other" },
                {
                    "nodes": [
                        { "focused": true, "app_id": "alacritty", "name": "zsh" }
                    ]
                }
            ]
        });
        let focused = find_focused(&tree).unwrap();
        let window = window_from_container(focused);
        assert_eq!(window.class, "alacritty");
        assert_eq!(window.title, "zsh");
    }

    #[test]
    fn window_from_container_falls_back_to_xwayland_class() {
        let container = serde_json::json!({
            "window_properties": { "class": "firefox" },
            "name": "Example Domain"
        });
        let window = window_from_container(&container);
        assert_eq!(window.class, "firefox");
        assert_eq!(window.title, "Example Domain");
    }

    #[test]
    fn window_from_container_defaults_to_empty() {
        let container = serde_json::json!({});
        let window = window_from_container(&container);
        assert!(window.is_empty());
    }
}
