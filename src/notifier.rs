// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Best-effort downstream notifications.
//!
//! Reward events are reported to the external task/achievement service so it
//! can mark tasks complete. Delivery is fire-and-forget: [`Notifier::notify`]
//! returns nothing and cannot fail, a notification is attempted at most once,
//! and every failure ends as a log line.

use crate::base::UserId;
use crate::config::NotifierConfig;
use crate::error::NotificationError;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Task types reported to the task service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Inviter brought in a new user
    InviteFriend,
    /// Inviter reached an invite milestone
    InviteMilestone,
    /// Invitee joined through an invite code
    AcceptInvite,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InviteFriend => "invite_friend",
            Self::InviteMilestone => "invite_milestone",
            Self::AcceptInvite => "accept_invite",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body of a task-completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCompletion {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_count: Option<u32>,
}

impl TaskCompletion {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            related_user_id: None,
            invite_count: None,
        }
    }
}

/// Sink for task-completion signals.
///
/// Implementations must return promptly and must not panic; the caller may
/// be holding a freshly committed monetary result.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: TaskKind, payload: TaskCompletion);
}

/// Logs notifications instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: TaskKind, payload: TaskCompletion) {
        debug!(%kind, user_id = %payload.user_id, "task notification (not delivered)");
    }
}

#[derive(Debug)]
struct Notification {
    kind: TaskKind,
    payload: TaskCompletion,
}

/// Sends notifications to `{api_base}/api/v1/tasks/{task}/complete`.
///
/// `notify` only enqueues onto a bounded channel. A background worker drains
/// the channel and spawns one detached request per notification, each bounded
/// by the configured timeout. When the queue is full the notification is
/// dropped. Dropping the notifier closes the queue and stops the worker;
/// requests already in flight run to completion.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    sender: mpsc::Sender<Notification>,
}

impl HttpNotifier {
    /// Starts the delivery worker on `runtime`.
    pub fn spawn(
        api_base: impl Into<String>,
        config: &NotifierConfig,
        runtime: &Handle,
    ) -> Result<(Self, JoinHandle<()>), NotificationError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let api_base = api_base.into().trim_end_matches('/').to_string();
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = runtime.spawn(run_worker(receiver, client, api_base));
        Ok((Self { sender }, worker))
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, kind: TaskKind, payload: TaskCompletion) {
        let user_id = payload.user_id;
        let error = match self.sender.try_send(Notification { kind, payload }) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => NotificationError::QueueFull,
            Err(TrySendError::Closed(_)) => NotificationError::QueueClosed,
        };
        warn!(%kind, %user_id, %error, "dropping task notification");
    }
}

/// URL of the completion endpoint for `kind`.
pub fn task_url(api_base: &str, kind: TaskKind) -> String {
    format!(
        "{}/api/v1/tasks/{}/complete",
        api_base.trim_end_matches('/'),
        kind
    )
}

async fn run_worker(mut receiver: mpsc::Receiver<Notification>, client: Client, api_base: String) {
    while let Some(notification) = receiver.recv().await {
        let client = client.clone();
        let url = task_url(&api_base, notification.kind);
        tokio::spawn(async move {
            let Notification { kind, payload } = notification;
            match deliver(&client, &url, &payload).await {
                Ok(()) => debug!(%kind, user_id = %payload.user_id, "task notification delivered"),
                Err(error) => {
                    warn!(%kind, user_id = %payload.user_id, %error, "task notification failed")
                }
            }
        });
    }
    debug!("notification queue closed");
}

async fn deliver(client: &Client, url: &str, payload: &TaskCompletion) -> Result<(), NotificationError> {
    let response = client.post(url).json(payload).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(NotificationError::UnexpectedStatus(status.as_u16()));
    }
    Ok(())
}

/// Builds the notifier described by `config`.
///
/// Without an `api_base` notifications are only logged. The HTTP worker, if
/// any, runs on `runtime` and its handle is returned for shutdown.
pub fn from_config(
    config: &NotifierConfig,
    runtime: &Handle,
) -> Result<(Arc<dyn Notifier>, Option<JoinHandle<()>>), NotificationError> {
    match &config.api_base {
        Some(api_base) => {
            let (notifier, worker) = HttpNotifier::spawn(api_base.clone(), config, runtime)?;
            Ok((Arc::new(notifier), Some(worker)))
        }
        None => Ok((Arc::new(LogNotifier), None)),
    }
}
