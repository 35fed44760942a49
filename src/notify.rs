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

//! Best-effort notifications.
//!
//! Ledger operations hand a [`Notification`] to the [`Dispatcher`] after their
//! unit of work has committed. Delivery happens on a dedicated worker thread
//! fed by a [`crossbeam`] channel: [`Dispatcher::notify`] never blocks and
//! never fails, and a [`Notifier`] error is logged and dropped.

use crate::base::TransactionId;
use crate::error::NotificationError;
use crossbeam::channel::{self, Sender};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConsultationPaid,
    TransferReceived,
    DepositApproved,
    DepositRejected,
    WithdrawApproved,
    WithdrawRejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationData {
    pub amount: Decimal,
    /// Name of the counterparty, or of the recipient for request outcomes.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Payload sent to the email relay: `{type, to, data}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    #[serde(rename = "type")]
    pub event: EventType,
    pub to: String,
    pub data: NotificationData,
}

/// Delivers notifications to an external sender.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            event = ?notification.event,
            to = %notification.to,
            amount = %notification.data.amount,
            "notification"
        );
        Ok(())
    }
}

/// Fire-and-forget notification queue.
#[derive(Debug)]
pub struct Dispatcher {
    sender: Option<Sender<Notification>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts a worker thread delivering through `notifier`.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (sender, receiver) = channel::unbounded::<Notification>();
        let worker = thread::Builder::new()
            .name("ledger-notify".into())
            .spawn(move || {
                for notification in receiver {
                    // A panicking notifier loses its own message, not the worker.
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| notifier.send(&notification)));
                    match outcome {
                        Ok(Ok(())) => debug!(event = ?notification.event, "notification delivered"),
                        Ok(Err(error)) => warn!(
                            event = ?notification.event,
                            to = %notification.to,
                            %error,
                            "notification dropped"
                        ),
                        Err(_) => warn!(
                            event = ?notification.event,
                            to = %notification.to,
                            "notifier panicked, notification dropped"
                        ),
                    }
                }
            });

        match worker {
            Ok(worker) => Self {
                sender: Some(sender),
                worker: Some(worker),
            },
            Err(error) => {
                warn!(%error, "could not start notification worker, notifications disabled");
                Self::disabled()
            }
        }
    }

    /// A dispatcher that discards everything.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            worker: None,
        }
    }

    /// Queues a notification. Never blocks, never fails.
    pub fn notify(&self, notification: Notification) {
        let Some(sender) = &self.sender else {
            debug!(event = ?notification.event, "notifications disabled");
            return;
        };
        if let Err(error) = sender.send(notification) {
            warn!(event = ?error.0.event, "notification worker gone, dropping");
        }
    }
}

impl Drop for Dispatcher {
    /// Closes the queue and waits for pending deliveries.
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("notification worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Notification>>);

    impl Notifier for Recorder {
        fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
            self.0.lock().push(notification.clone());
            Ok(())
        }
    }

    struct Broken;

    impl Notifier for Broken {
        fn send(&self, _: &Notification) -> Result<(), NotificationError> {
            Err(NotificationError::Timeout)
        }
    }

    /// Panics on its first send, then records like [`Recorder`].
    #[derive(Default)]
    struct PanicsOnce {
        panicked: AtomicBool,
        delivered: Recorder,
    }

    impl Notifier for PanicsOnce {
        fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("relay client bug");
            }
            self.delivered.send(notification)
        }
    }

    fn sample(event: EventType) -> Notification {
        Notification {
            event,
            to: "patient@example.com".into(),
            data: NotificationData {
                amount: dec!(30),
                name: "Dr. Lee".into(),
                transaction_id: Some(TransactionId("ABC12345".into())),
                notes: None,
            },
        }
    }

    #[test]
    fn delivers_in_queue_order_before_drop_returns() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::spawn(recorder.clone());
        dispatcher.notify(sample(EventType::DepositApproved));
        dispatcher.notify(sample(EventType::WithdrawRejected));
        drop(dispatcher);

        let events: Vec<_> = recorder.0.lock().iter().map(|n| n.event).collect();
        assert_eq!(events, vec![EventType::DepositApproved, EventType::WithdrawRejected]);
    }

    #[test]
    fn failures_are_swallowed() {
        let dispatcher = Dispatcher::spawn(Arc::new(Broken));
        dispatcher.notify(sample(EventType::ConsultationPaid));
        drop(dispatcher);
    }

    #[test]
    fn worker_survives_a_panicking_notifier() {
        let notifier = Arc::new(PanicsOnce::default());
        let dispatcher = Dispatcher::spawn(notifier.clone());
        dispatcher.notify(sample(EventType::ConsultationPaid));
        for _ in 0..5 {
            dispatcher.notify(sample(EventType::TransferReceived));
        }
        drop(dispatcher);

        assert!(notifier.panicked.load(Ordering::SeqCst));
        assert_eq!(notifier.delivered.0.lock().len(), 5);
    }

    #[test]
    fn disabled_dispatcher_discards() {
        let dispatcher = Dispatcher::disabled();
        dispatcher.notify(sample(EventType::TransferReceived));
    }

    #[test]
    fn payload_shape() {
        let json = serde_json::to_value(sample(EventType::ConsultationPaid)).unwrap();
        assert_eq!(json["type"], "consultation_paid");
        assert_eq!(json["to"], "patient@example.com");
        assert_eq!(json["data"]["amount"], "30");
        assert_eq!(json["data"]["transaction_id"], "ABC12345");
        assert!(json["data"].get("notes").is_none());
    }
}
