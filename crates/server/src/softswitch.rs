//! Softswitch event-socket backend (§4.6, §6 "Softswitch event format").
//!
//! A long-lived TCP connection delivers ASCII events: header lines of the
//! form `Key: Value`, terminated by a blank line — the same shape
//! FreeSWITCH's event socket uses. We only parse the headers §6 names;
//! anything else is carried in `metadata` untouched.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::error::ServerError;
use crate::inbound::{accept_incoming_call, hangup_by_external_id, IncomingCall};
use crate::state::AppState;

/// One parsed `Key: Value` block.
#[derive(Debug, Default)]
struct SoftswitchEvent {
    headers: HashMap<String, String>,
}

impl SoftswitchEvent {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Reads one event (header lines until a blank line) from `reader`.
/// Returns `Ok(None)` at a clean EOF between events.
async fn read_event<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<SoftswitchEvent>, ServerError> {
    let mut event = SoftswitchEvent::default();
    let mut saw_any_line = false;
    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ServerError::SoftswitchEvent(e.to_string()))?;
        if bytes_read == 0 {
            return if saw_any_line { Ok(Some(event)) } else { Ok(None) };
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if saw_any_line {
                return Ok(Some(event));
            }
            continue;
        }
        saw_any_line = true;
        match line.split_once(':') {
            Some((key, value)) => {
                event.headers.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                return Err(ServerError::SoftswitchEvent(format!("malformed header line: {line}")));
            }
        }
    }
}

/// Dispatches one parsed event against `state`, mirroring it into the
/// normalised `IncomingCall`/hangup paths every backend shares.
async fn dispatch_event(state: &AppState, event: SoftswitchEvent) -> Result<(), ServerError> {
    let name = event.get("Event-Name").unwrap_or("UNKNOWN").to_string();
    let external_id = event
        .get("Unique-ID")
        .or_else(|| event.get("Event-UUID"))
        .unwrap_or_default()
        .to_string();

    match name.as_str() {
        "CHANNEL_CREATE" | "CHANNEL_PARK" => {
            let caller = event.get("Caller-Caller-ID-Number").unwrap_or_default().to_string();
            let callee = event.get("Caller-Destination-Number").unwrap_or_default().to_string();
            let mut metadata = HashMap::new();
            if let Some(name) = event.get("Caller-Caller-ID-Name") {
                metadata.insert("caller_name".to_string(), serde_json::Value::String(name.to_string()));
            }
            let handler = accept_incoming_call(
                state,
                IncomingCall { caller, callee, external_id: external_id.clone(), metadata },
            )?;
            handler.answer().await?;
            Ok(())
        }
        "CHANNEL_HANGUP" | "CHANNEL_HANGUP_COMPLETE" => hangup_by_external_id(state, &external_id).await,
        "CHANNEL_STATE" => {
            if let Some(call_state) = event.get("Channel-State") {
                info!(external_id = %external_id, channel_state = %call_state, "channel state event");
            }
            Ok(())
        }
        other => {
            warn!(event_name = %other, "unhandled softswitch event");
            Ok(())
        }
    }
}

/// Accepts connections on `listener`, each handled by its own task so one
/// slow/stuck event socket never blocks another.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = state.clone();
                info!(%peer, "softswitch connection accepted");
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(socket, &state).await {
                        warn!(%peer, error = %err, "softswitch connection ended with an error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "failed to accept softswitch connection");
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, state: &AppState) -> Result<(), ServerError> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    while let Some(event) = read_event(&mut reader).await? {
        if let Err(err) = dispatch_event(state, event).await {
            warn!(error = %err, "failed to dispatch softswitch event");
        }
    }
    write_half.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader as TokioBufReader;

    #[tokio::test]
    async fn parses_headers_until_blank_line() {
        let raw = "Event-Name: CHANNEL_CREATE\r\nUnique-ID: abc-123\r\n\r\n";
        let mut reader = TokioBufReader::new(Cursor::new(raw.as_bytes()));
        let event = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(event.get("Event-Name"), Some("CHANNEL_CREATE"));
        assert_eq!(event.get("Unique-ID"), Some("abc-123"));
    }

    #[tokio::test]
    async fn malformed_header_line_is_an_error() {
        let raw = "not-a-header-line\r\n\r\n";
        let mut reader = TokioBufReader::new(Cursor::new(raw.as_bytes()));
        assert!(read_event(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn clean_eof_between_events_yields_none() {
        let mut reader = TokioBufReader::new(Cursor::new(&b""[..]));
        assert!(read_event(&mut reader).await.unwrap().is_none());
    }
}
