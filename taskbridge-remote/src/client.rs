//! Remote sync client — incremental pull plus batched mutations.
//!
//! [`RemoteApi`] is the seam the engine is written against; [`HttpRemote`]
//! implements it over blocking HTTP. Rate limiting (HTTP 429) is the only
//! retried failure: exponential backoff from a base delay, doubling up to a
//! ceiling, bounded attempts, then the batch fails. Everything else fails
//! the batch immediately and the caller continues with its remaining work.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use taskbridge_core::config::{SyncConfig, MAX_BATCH};
use taskbridge_core::types::{SyncCursor, TaskFields, TaskId};

use crate::api::{
    wire_due, wire_labels, wire_priority, Command, CommandRequest, ErrorBody, PullRequest,
    RemoteItem, SyncResponse, INVALID_CURSOR_TAG,
};
use crate::error::RemoteError;

// ---------------------------------------------------------------------------
// Engine-facing batch inputs and outputs
// ---------------------------------------------------------------------------

/// Result of one pull: pulled items, the next cursor, and whether the
/// service answered with a full snapshot instead of a delta.
#[derive(Debug)]
pub struct PullBatch {
    pub items: Vec<RemoteItem>,
    pub cursor: SyncCursor,
    pub full_resync: bool,
}

/// One task to create. `temp_id` keys the response's id mapping and may be
/// referenced as `parent` by other creates in the same or a later batch.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub temp_id: String,
    pub fields: TaskFields,
    pub parent: Option<TaskId>,
}

/// Field and completion updates for one task. Completion flips are a
/// distinct remote operation from field updates; both commands are emitted
/// when both are set.
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub id: TaskId,
    pub fields: Option<TaskFields>,
    pub completed: Option<bool>,
}

/// Reparent one task. `new_parent: None` detaches to root by moving into
/// the configured default container (the API has no "no parent" value).
#[derive(Debug, Clone)]
pub struct MoveSpec {
    pub id: TaskId,
    pub new_parent: Option<TaskId>,
}

/// Result of a create batch: temp id → assigned id, plus the next cursor.
#[derive(Debug)]
pub struct CreateOutcome {
    pub ids: HashMap<String, TaskId>,
    pub cursor: SyncCursor,
}

/// The remote service contract the engine consumes.
///
/// All batch calls reject more than [`MAX_BATCH`] entries; callers chunk.
pub trait RemoteApi {
    fn pull(&mut self, cursor: &SyncCursor) -> Result<PullBatch, RemoteError>;
    fn batch_create(&mut self, items: &[CreateSpec]) -> Result<CreateOutcome, RemoteError>;
    fn batch_update(&mut self, items: &[UpdateSpec]) -> Result<SyncCursor, RemoteError>;
    fn batch_move(&mut self, items: &[MoveSpec]) -> Result<SyncCursor, RemoteError>;
    fn batch_delete(&mut self, ids: &[TaskId]) -> Result<SyncCursor, RemoteError>;
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Bounded exponential backoff schedule for rate-limited calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub ceiling: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_ms),
            ceiling: Duration::from_millis(config.retry_ceiling_ms),
            max_attempts: config.retry_max_attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (0-based): base × 2^attempt,
    /// capped at the ceiling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.ceiling)
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Blocking HTTP client for the sync endpoint.
pub struct HttpRemote {
    agent: ureq::Agent,
    sync_url: String,
    token: String,
    sync_label: String,
    root_section_id: String,
    backoff: BackoffPolicy,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
            sync_url: format!("{}/sync", config.api_base_url.trim_end_matches('/')),
            token: config.api_token.clone(),
            sync_label: config.sync_label.clone(),
            root_section_id: config.root_section_id.clone(),
            backoff: BackoffPolicy::from_config(config),
        }
    }

    /// POST a body, retrying only on 429 per the backoff policy.
    fn execute(&self, body: &serde_json::Value) -> Result<SyncResponse, RemoteError> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .agent
                .post(&self.sync_url)
                .set("Authorization", &format!("Bearer {}", self.token))
                .send_json(body.clone());

            match result {
                Ok(response) => return Ok(response.into_json::<SyncResponse>()?),
                Err(ureq::Error::Status(429, _)) => {
                    attempt += 1;
                    if attempt >= self.backoff.max_attempts {
                        return Err(RemoteError::RateLimited { attempts: attempt });
                    }
                    let delay = self.backoff.delay(attempt - 1);
                    tracing::warn!(
                        "rate limited by sync endpoint; retrying in {:?} (attempt {attempt})",
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(ureq::Error::Status(status, response)) => {
                    return Err(classify_status(status, response.into_string().ok()));
                }
                Err(ureq::Error::Transport(transport)) => {
                    return Err(RemoteError::Transport(transport.to_string()));
                }
            }
        }
    }

    fn push(&self, commands: Vec<Command>) -> Result<SyncResponse, RemoteError> {
        let request = CommandRequest { commands };
        let body = serde_json::to_value(&request)
            .map_err(|e| RemoteError::Transport(format!("request encoding failed: {e}")))?;
        let response = self.execute(&body)?;
        check_command_statuses(&response)?;
        Ok(response)
    }

    fn update_args(&self, id: &TaskId, fields: &TaskFields) -> serde_json::Value {
        json!({
            "id": id.0,
            "content": fields.content,
            "due": wire_due(fields),
            "priority": wire_priority(fields),
            "duration_minutes": fields.duration_minutes,
            "labels": wire_labels(fields, &self.sync_label),
        })
    }
}

impl RemoteApi for HttpRemote {
    /// Incremental pull. An invalid or expired cursor falls back to one
    /// wildcard (full resync) pull before surfacing an error.
    fn pull(&mut self, cursor: &SyncCursor) -> Result<PullBatch, RemoteError> {
        let request = |token: &str| {
            serde_json::to_value(PullRequest {
                sync_token: token,
                resource_types: &["items"],
            })
            .map_err(|e| RemoteError::Transport(format!("request encoding failed: {e}")))
        };

        let (response, full_resync) = match self.execute(&request(&cursor.0)?) {
            Ok(response) => {
                let full = response.full_sync || cursor.is_wildcard();
                (response, full)
            }
            Err(RemoteError::InvalidCursor) if !cursor.is_wildcard() => {
                tracing::warn!("sync cursor rejected; falling back to full resync");
                (self.execute(&request(SyncCursor::WILDCARD)?)?, true)
            }
            Err(err) => return Err(err),
        };

        Ok(PullBatch {
            items: response.items,
            cursor: SyncCursor(response.sync_token),
            full_resync,
        })
    }

    fn batch_create(&mut self, items: &[CreateSpec]) -> Result<CreateOutcome, RemoteError> {
        ensure_batch_size(items.len())?;
        let commands = items
            .iter()
            .map(|item| {
                Command::with_temp_id(
                    "item_add",
                    item.temp_id.clone(),
                    json!({
                        "content": item.fields.content,
                        "checked": item.fields.completed,
                        "due": wire_due(&item.fields),
                        "priority": wire_priority(&item.fields),
                        "duration_minutes": item.fields.duration_minutes,
                        "labels": wire_labels(&item.fields, &self.sync_label),
                        "parent_id": item.parent.as_ref().map(|p| p.0.clone()),
                    }),
                )
            })
            .collect();

        let response = self.push(commands)?;
        let ids = response
            .temp_id_mapping
            .into_iter()
            .map(|(temp, real)| (temp, TaskId(real)))
            .collect();
        Ok(CreateOutcome {
            ids,
            cursor: SyncCursor(response.sync_token),
        })
    }

    fn batch_update(&mut self, items: &[UpdateSpec]) -> Result<SyncCursor, RemoteError> {
        ensure_batch_size(items.len())?;
        let mut commands = Vec::new();
        for item in items {
            if let Some(fields) = &item.fields {
                commands.push(Command::new("item_update", self.update_args(&item.id, fields)));
            }
            match item.completed {
                Some(true) => {
                    commands.push(Command::new("item_complete", json!({ "id": item.id.0 })));
                }
                Some(false) => {
                    commands.push(Command::new("item_uncomplete", json!({ "id": item.id.0 })));
                }
                None => {}
            }
        }
        let response = self.push(commands)?;
        Ok(SyncCursor(response.sync_token))
    }

    fn batch_move(&mut self, items: &[MoveSpec]) -> Result<SyncCursor, RemoteError> {
        ensure_batch_size(items.len())?;
        let commands = items
            .iter()
            .map(|item| {
                let args = match &item.new_parent {
                    Some(parent) => json!({ "id": item.id.0, "parent_id": parent.0 }),
                    None => json!({ "id": item.id.0, "section_id": self.root_section_id }),
                };
                Command::new("item_move", args)
            })
            .collect();
        let response = self.push(commands)?;
        Ok(SyncCursor(response.sync_token))
    }

    fn batch_delete(&mut self, ids: &[TaskId]) -> Result<SyncCursor, RemoteError> {
        ensure_batch_size(ids.len())?;
        let commands = ids
            .iter()
            .map(|id| Command::new("item_delete", json!({ "id": id.0 })))
            .collect();
        let response = self.push(commands)?;
        Ok(SyncCursor(response.sync_token))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_batch_size(size: usize) -> Result<(), RemoteError> {
    if size > MAX_BATCH {
        return Err(RemoteError::BatchTooLarge {
            size,
            limit: MAX_BATCH,
        });
    }
    Ok(())
}

/// Map a non-429 HTTP error status to a [`RemoteError`].
fn classify_status(status: u16, body: Option<String>) -> RemoteError {
    if status == 400 {
        if let Some(body) = &body {
            if let Ok(error) = serde_json::from_str::<ErrorBody>(body) {
                if error.error_tag == INVALID_CURSOR_TAG {
                    return RemoteError::InvalidCursor;
                }
            }
        }
    }
    RemoteError::Http {
        status,
        message: body.unwrap_or_default(),
    }
}

/// Fail the batch on the first rejected command.
fn check_command_statuses(response: &SyncResponse) -> Result<(), RemoteError> {
    for (uuid, status) in &response.sync_status {
        if let Some(message) = status.error_message() {
            return Err(RemoteError::Command {
                uuid: uuid.clone(),
                message: message.to_string(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
