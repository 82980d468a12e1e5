//! Routes document changes and account events to the handlers.

use std::sync::Arc;

use storefront_docstore::{ChangeKind, Document, DocumentChange};
use storefront_types::{PaymentIntentStatus, TriggerPath, UserAccount, payment_status};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthEvent;
use crate::functions::Functions;

/// A handler invocation derived from an event
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    CreateCustomer(UserAccount),
    CleanupUser(UserAccount),
    AddPaymentMethodDetails {
        user_id: String,
        push_id: String,
        snapshot: Document,
    },
    CreatePayment {
        user_id: String,
        push_id: String,
        snapshot: Document,
    },
    ConfirmPayment {
        user_id: String,
        push_id: String,
        after: Document,
    },
}

/// Whether an update moved a payment into `requires_confirmation`.
///
/// Writes that leave the status there (such as a recorded error) do not
/// confirm again.
fn enters_confirmation(change: &DocumentChange) -> bool {
    let status = |document: Option<&Document>| document.and_then(payment_status);
    status(change.after.as_ref()) == Some(PaymentIntentStatus::RequiresConfirmation)
        && status(change.before.as_ref()) != Some(PaymentIntentStatus::RequiresConfirmation)
}

/// Handler for a document change, if any
pub fn route_change(change: &DocumentChange) -> Option<Trigger> {
    match (change.trigger(), change.kind, change.after.clone()) {
        (TriggerPath::PaymentMethod { user_id, push_id }, ChangeKind::Created, Some(snapshot)) => {
            Some(Trigger::AddPaymentMethodDetails {
                user_id,
                push_id,
                snapshot,
            })
        }
        (TriggerPath::Payment { user_id, push_id }, ChangeKind::Created, Some(snapshot)) => {
            Some(Trigger::CreatePayment {
                user_id,
                push_id,
                snapshot,
            })
        }
        (TriggerPath::Payment { user_id, push_id }, ChangeKind::Updated, Some(after))
            if enters_confirmation(change) =>
        {
            Some(Trigger::ConfirmPayment {
                user_id,
                push_id,
                after,
            })
        }
        _ => None,
    }
}

/// Handler for an account event
pub fn route_auth(event: &AuthEvent) -> Trigger {
    match event {
        AuthEvent::UserCreated(user) => Trigger::CreateCustomer(user.clone()),
        AuthEvent::UserDeleted(user) => Trigger::CleanupUser(user.clone()),
    }
}

pub struct TriggerDispatcher {
    functions: Arc<Functions>,
}

impl TriggerDispatcher {
    pub fn new(functions: Arc<Functions>) -> Self {
        Self { functions }
    }

    /// Run one handler. Failures are already recorded and reported by the
    /// handler itself.
    pub async fn run(functions: Arc<Functions>, trigger: Trigger) {
        let outcome = match &trigger {
            Trigger::CreateCustomer(user) => functions.create_stripe_customer(user).await.map(drop),
            Trigger::CleanupUser(user) => functions.cleanup_user(user).await.map(drop),
            Trigger::AddPaymentMethodDetails {
                user_id,
                push_id,
                snapshot,
            } => functions
                .add_payment_method_details(user_id, push_id, snapshot)
                .await
                .map(drop),
            Trigger::CreatePayment {
                user_id,
                push_id,
                snapshot,
            } => functions
                .create_stripe_payment(user_id, push_id, snapshot)
                .await
                .map(drop),
            Trigger::ConfirmPayment {
                user_id,
                push_id,
                after,
            } => functions
                .confirm_stripe_payment(user_id, push_id, after)
                .await
                .map(drop),
        };

        if let Err(err) = outcome {
            debug!(?trigger, error = %err, "Trigger finished with error");
        }
    }

    fn dispatch(&self, trigger: Trigger) {
        let functions = self.functions.clone();
        tokio::spawn(Self::run(functions, trigger));
    }

    /// Consume both event streams until they close, running each handler on
    /// its own task
    pub fn spawn(
        self,
        mut documents: broadcast::Receiver<DocumentChange>,
        mut accounts: broadcast::Receiver<AuthEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Trigger dispatcher started");
            let mut documents_open = true;
            let mut accounts_open = true;

            while documents_open || accounts_open {
                tokio::select! {
                    result = documents.recv(), if documents_open => match result {
                        Ok(change) => {
                            if let Some(trigger) = route_change(&change) {
                                self.dispatch(trigger);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Trigger dispatcher lagged behind document changes");
                        }
                        Err(RecvError::Closed) => documents_open = false,
                    },
                    result = accounts.recv(), if accounts_open => match result {
                        Ok(event) => self.dispatch(route_auth(&event)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Trigger dispatcher lagged behind account events");
                        }
                        Err(RecvError::Closed) => accounts_open = false,
                    },
                }
            }

            info!("Trigger dispatcher stopped");
        })
    }
}
