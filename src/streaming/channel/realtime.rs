//! Hosted push channel: a Phoenix-protocol websocket per subscription.
//!
//! # Protocol
//! * connect to `/realtime/v1/websocket?apikey=..&vsn=1.0.0`
//! * `phx_join` on the channel topic with a `postgres_changes` filter and the
//!   session's access token, then wait for the matching `phx_reply`
//! * heartbeat on the `phoenix` topic every `heartbeat`
//! * every `postgres_changes` frame becomes a [`ChannelEvent::Change`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::auth::AuthProvider;
use crate::records::{EntityKind, RemoteRow};
use crate::streaming::types::{ChangeNotification, ChangeOp};

use super::api::{
    ChannelError, ChannelEvent, ChannelSpec, PushChannelProvider, Subscription, TaskHandle,
};

const JOIN_REF: &str = "1";

// =====================================================================
// Frames
// =====================================================================

/// Decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Reply {
        reference: Option<String>,
        ok: bool,
        detail: String,
    },
    Change(ChangeNotification),
    /// Channel-level failure (`phx_error`, `phx_close`, system error).
    ChannelError(String),
    Other,
}

pub fn join_frame(spec: &ChannelSpec, access_token: &str) -> String {
    json!({
        "topic": spec.topic(),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": spec.kind.table(),
                    "filter": spec.filter(),
                }],
            },
            "access_token": access_token,
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    })
    .to_string()
}

pub fn heartbeat_frame(reference: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
    .to_string()
}

/// Parses a text frame. `None` if it is not JSON at all.
pub fn decode_frame(text: &str) -> Option<Frame> {
    let v: Value = serde_json::from_str(text).ok()?;
    let event = v.get("event").and_then(Value::as_str).unwrap_or_default();
    let payload = v.get("payload").cloned().unwrap_or(Value::Null);

    let frame = match event {
        "phx_reply" => Frame::Reply {
            reference: v.get("ref").and_then(Value::as_str).map(str::to_string),
            ok: payload.get("status").and_then(Value::as_str) == Some("ok"),
            detail: payload
                .get("response")
                .map(Value::to_string)
                .unwrap_or_default(),
        },
        "postgres_changes" => decode_change(&payload).map_or(Frame::Other, Frame::Change),
        "phx_error" => Frame::ChannelError("channel error".into()),
        "phx_close" => Frame::ChannelError("channel closed by server".into()),
        "system" if payload.get("status").and_then(Value::as_str) == Some("error") => {
            Frame::ChannelError(
                payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("system error")
                    .to_string(),
            )
        }
        _ => Frame::Other,
    };
    Some(frame)
}

fn decode_change(payload: &Value) -> Option<ChangeNotification> {
    let data = payload.get("data")?;
    let op = ChangeOp::parse(data.get("type")?.as_str()?)?;
    let kind = EntityKind::from_table(data.get("table")?.as_str()?)?;

    let source = match op {
        ChangeOp::Delete => "old_record",
        _ => "record",
    };
    let row: RemoteRow = data.get(source)?.as_object()?.clone();

    Some(ChangeNotification {
        op,
        kind,
        payload: row,
    })
}

/// `https://host` -> `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
pub fn realtime_url(base_url: &str, anon_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}

fn is_token_problem(detail: &str) -> bool {
    let d = detail.to_ascii_lowercase();
    d.contains("token") || d.contains("jwt")
}

// =====================================================================
// Provider
// =====================================================================

pub struct RealtimeChannelProvider {
    url: String,
    auth: Arc<dyn AuthProvider>,
    heartbeat: Duration,
    join_timeout: Duration,
}

impl RealtimeChannelProvider {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        auth: Arc<dyn AuthProvider>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            url: realtime_url(base_url, anon_key),
            auth,
            heartbeat,
            join_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl PushChannelProvider for RealtimeChannelProvider {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, ChannelError> {
        let session = match self.auth.session().await {
            Some(s) if !s.is_expired(ChronoDuration::zero()) => s,
            _ => return Err(ChannelError::SessionExpired),
        };

        let (ws, _) = timeout(self.join_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ChannelError::Transport("connect timed out".into()))?
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(join_frame(&spec, &session.access_token)))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        // wait for our join reply; anything else before it is ignored
        let joined = timeout(self.join_timeout, async {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => return Err(ChannelError::Closed),
                    Ok(_) => continue,
                    Err(e) => return Err(ChannelError::Transport(e.to_string())),
                };
                match decode_frame(&text) {
                    Some(Frame::Reply { reference, ok, detail })
                        if reference.as_deref() == Some(JOIN_REF) =>
                    {
                        if ok {
                            return Ok(());
                        }
                        if is_token_problem(&detail) {
                            return Err(ChannelError::SessionExpired);
                        }
                        return Err(ChannelError::Rejected(detail));
                    }
                    Some(Frame::ChannelError(reason)) => return Err(ChannelError::Rejected(reason)),
                    _ => {}
                }
            }
            Err(ChannelError::Closed)
        })
        .await
        .map_err(|_| ChannelError::Transport("join timed out".into()))?;
        joined?;

        log::info!("[REALTIME] joined {}", spec.topic());

        let (tx, rx) = mpsc::unbounded_channel();
        let heartbeat = self.heartbeat;
        let kind = spec.kind;
        let topic = spec.topic();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
            let mut hb_ref: u64 = 1;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        hb_ref += 1;
                        if let Err(e) = write.send(Message::Text(heartbeat_frame(hb_ref))).await {
                            let _ = tx.send(ChannelEvent::Error(format!("heartbeat failed: {e}")));
                            break;
                        }
                        log::trace!("[REALTIME] heartbeat {} on {}", hb_ref, topic);
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                                Some(Frame::Change(change)) if change.kind == kind => {
                                    log::trace!("[REALTIME] {:?} on {}", change.op, topic);
                                    if tx.send(ChannelEvent::Change(change)).is_err() {
                                        break;
                                    }
                                }
                                Some(Frame::ChannelError(reason)) => {
                                    let _ = tx.send(ChannelEvent::Error(reason));
                                    break;
                                }
                                _ => {}
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = tx.send(ChannelEvent::Error("socket closed".into()));
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                let _ = tx.send(ChannelEvent::Error(e.to_string()));
                                break;
                            }
                        }
                    }
                }
            }
            log::debug!("[REALTIME] loop for {} exited", topic);
        });

        Ok(Subscription::new(spec, rx, Box::new(TaskHandle::new(task))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_carries_filter_and_token() {
        let spec = ChannelSpec::new(EntityKind::Transaction, "u1");
        let v: Value = serde_json::from_str(&join_frame(&spec, "tok")).unwrap();

        assert_eq!(v["event"], "phx_join");
        assert_eq!(v["topic"], "realtime:public:transactions:user_id=eq.u1");
        assert_eq!(v["payload"]["access_token"], "tok");
        let pc = &v["payload"]["config"]["postgres_changes"][0];
        assert_eq!(pc["table"], "transactions");
        assert_eq!(pc["filter"], "user_id=eq.u1");
        assert_eq!(pc["event"], "*");
    }

    #[test]
    fn decodes_insert_and_delete() {
        let insert = r#"{"event":"postgres_changes","topic":"t","ref":null,"payload":{"data":{
            "type":"INSERT","table":"savings_history","schema":"public",
            "record":{"id":"h1","user_id":"u1","amount":5}}}}"#;
        match decode_frame(insert) {
            Some(Frame::Change(c)) => {
                assert_eq!(c.op, ChangeOp::Insert);
                assert_eq!(c.kind, EntityKind::SavingsHistoryEntry);
                assert_eq!(c.payload["id"], "h1");
            }
            other => panic!("unexpected {other:?}"),
        }

        let delete = r#"{"event":"postgres_changes","payload":{"data":{
            "type":"DELETE","table":"transactions","record":null,
            "old_record":{"id":"t9"}}}}"#;
        match decode_frame(delete) {
            Some(Frame::Change(c)) => {
                assert_eq!(c.op, ChangeOp::Delete);
                assert_eq!(c.payload["id"], "t9");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_replies_and_errors() {
        let ok = r#"{"event":"phx_reply","ref":"1","payload":{"status":"ok","response":{}}}"#;
        assert!(matches!(
            decode_frame(ok),
            Some(Frame::Reply { ok: true, reference: Some(r), .. }) if r == "1"
        ));

        let bad = r#"{"event":"phx_reply","ref":"1","payload":{"status":"error","response":{"reason":"invalid JWT"}}}"#;
        match decode_frame(bad) {
            Some(Frame::Reply { ok: false, detail, .. }) => assert!(is_token_problem(&detail)),
            other => panic!("unexpected {other:?}"),
        }

        let sys = r#"{"event":"system","payload":{"status":"error","message":"quota"}}"#;
        assert_eq!(decode_frame(sys), Some(Frame::ChannelError("quota".into())));
        assert_eq!(decode_frame(r#"{"event":"presence_state"}"#), Some(Frame::Other));
        assert_eq!(decode_frame("garbage"), None);
    }

    #[test]
    fn unknown_tables_are_ignored() {
        let frame = r#"{"event":"postgres_changes","payload":{"data":{
            "type":"UPDATE","table":"profiles","record":{"id":"p"}}}}"#;
        assert_eq!(decode_frame(frame), Some(Frame::Other));
    }

    #[test]
    fn websocket_url_from_base() {
        assert_eq!(
            realtime_url("https://x.example.co/", "k"),
            "wss://x.example.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
        assert_eq!(
            realtime_url("http://localhost:54321", "k"),
            "ws://localhost:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }
}
