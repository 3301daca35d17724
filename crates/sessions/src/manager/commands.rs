//! Operator commands: send, reset, disconnect, delete and raw calls.

use std::sync::Arc;

use serde_json::Value;

use lh_domain::error::{Error, Result};
use lh_protocol::content::OutboundContent;

use super::LifecycleManager;
use crate::model::{SendReceipt, SessionStatus};
use crate::transport::{OutboundMessage, RawOperation, TransportHandle};

impl LifecycleManager {
    fn connected_handle(&self, id: &str) -> Result<Arc<dyn TransportHandle>> {
        let sessions = self.inner.sessions.lock();
        let slot = sessions
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_owned()))?;
        if slot.info.status != SessionStatus::Connected {
            return Err(Error::NotConnected(id.to_owned()));
        }
        Ok(slot.handle.clone())
    }

    /// Send a message through a connected session.  Media goes through
    /// the pipeline first; pipeline errors are returned unchanged.
    pub async fn send(&self, id: &str, to: &str, content: OutboundContent) -> Result<SendReceipt> {
        let handle = self.connected_handle(id)?;

        let message = match content {
            OutboundContent::Text { text } => OutboundMessage::Text { text },
            OutboundContent::Media(payload) => {
                let input = payload
                    .to_media_input()
                    .map_err(|e| Error::MediaFormat(format!("media data is not valid base64: {e}")))?;
                let media = self.inner.media.transform(input).await?;
                OutboundMessage::Media {
                    media,
                    caption: payload.caption,
                }
            }
        };
        let (mimetype, ptt) = match &message {
            OutboundMessage::Text { .. } => (None, false),
            OutboundMessage::Media { media, .. } => (Some(media.mimetype.clone()), media.ptt),
        };

        let result = handle.send_message(to, message).await?;
        let message_id = result
            .pointer("/key/id")
            .or_else(|| result.get("id"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        tracing::debug!(session_id = %id, to = %to, ?mimetype, ptt, "message sent");
        Ok(SendReceipt {
            message_id,
            mimetype,
            ptt,
            result,
        })
    }

    /// Close the transport without logging out and forget the session.
    /// The caller is expected to start it again.
    pub async fn reset(&self, id: &str) -> bool {
        self.inner.cancel_timer(id);
        self.inner.retries.lock().remove(id);
        if let Some(info) = self.inner.release_slot(id).await {
            tracing::info!(session_id = %id, "session reset");
            self.inner.publish_status(
                id,
                &info.owner_id,
                SessionStatus::Disconnected,
                Some("reset".into()),
            );
        }
        true
    }

    /// Log out on the remote side and erase stored credentials.
    ///
    /// Returns `false` if the logout or the erase failed; teardown of the
    /// in-memory state happens regardless.
    pub async fn disconnect(&self, id: &str) -> bool {
        let handle = self.inner.sessions.lock().get(id).map(|s| s.handle.clone());
        let mut ok = true;
        if let Some(handle) = handle {
            if let Err(e) = handle.logout().await {
                tracing::warn!(session_id = %id, error = %e, "logout failed");
                ok = false;
            }
        }

        let info = self.inner.release_slot(id).await;

        if let Err(e) = self.inner.store.erase_credentials(id).await {
            tracing::warn!(session_id = %id, error = %e, "failed to erase credentials");
            ok = false;
        }

        // After the erase: a close raised by the logout itself may have
        // scheduled a restart while we were waiting on it.
        self.inner.cancel_timer(id);
        self.inner.retries.lock().remove(id);

        if let Some(info) = info {
            self.inner.publish_status(
                id,
                &info.owner_id,
                SessionStatus::Disconnected,
                Some("logged out".into()),
            );
        }
        tracing::info!(session_id = %id, ok, "session disconnected");
        ok
    }

    /// Tear down everything held for `id`.  Idempotent.
    ///
    /// The caller removes the store row; the deleted marker keeps a
    /// restart that is already under way from resurrecting the session.
    pub async fn delete(&self, id: &str) -> bool {
        self.inner.deleted.lock().insert(id.to_owned());
        self.inner.cancel_timer(id);
        self.inner.retries.lock().remove(id);
        if let Some(info) = self.inner.release_slot(id).await {
            tracing::info!(session_id = %id, "session deleted");
            self.inner.publish_status(
                id,
                &info.owner_id,
                SessionStatus::Disconnected,
                Some("deleted".into()),
            );
        }
        true
    }

    /// Invoke an allow-listed transport method by name.
    ///
    /// `sendMessage` goes through [`Self::send`] so media is normalized.
    pub async fn call_raw(&self, id: &str, method: &str, args: &Value) -> Result<Value> {
        let op = RawOperation::parse(method, args)?;
        match op {
            RawOperation::SendMessage { to, content } => {
                let receipt = self.send(id, &to, content).await?;
                Ok(serde_json::to_value(receipt)?)
            }
            RawOperation::Logout => {
                self.connected_handle(id)?.logout().await?;
                Ok(Value::Null)
            }
            op => {
                let handle = self.connected_handle(id)?;
                tracing::debug!(session_id = %id, method = op.method_name(), "raw transport call");
                handle.call(&op).await
            }
        }
    }
}
