//! Storefront payments backend.
//!
//! Wires the document store, the payment processor and the error reporter
//! into the handlers that react to account and document events:
//!
//! - a new account gets a processor customer and a setup intent
//! - a new payment method document is replaced by the processor's object
//! - a new payment document becomes a payment intent, keyed by its push id
//! - a payment waiting for confirmation is confirmed
//! - a deleted account takes its processor customer and records with it

use std::sync::Arc;

use storefront_docstore::DocumentStore;
use tokio::task::JoinHandle;

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod functions;
pub mod processor;
pub mod reporting;
pub mod routes;
pub mod triggers;
pub mod utils;

use auth::AuthService;
use config::StorefrontConfig;
use functions::Functions;
use processor::PaymentProcessor;
use reporting::{ErrorReporter, ErrorSink};
use routes::RouteTable;
use triggers::TriggerDispatcher;

/// Everything the backend needs at runtime
#[derive(Clone)]
pub struct Storefront {
    pub store: Arc<DocumentStore>,
    pub auth: Arc<AuthService>,
    pub functions: Arc<Functions>,
    pub routes: Arc<RouteTable>,
}

impl Storefront {
    pub fn new(
        config: StorefrontConfig,
        processor: Arc<dyn PaymentProcessor>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let store = DocumentStore::new();
        let auth = Arc::new(AuthService::new(store.clone(), &config.auth));
        let reporter = ErrorReporter::new(sink);
        let functions = Arc::new(Functions::new(
            store.clone(),
            processor,
            reporter,
            config.checkout,
        ));

        Self {
            store,
            auth,
            functions,
            routes: Arc::new(RouteTable::storefront()),
        }
    }

    /// Start dispatching document and account events to the handlers
    pub fn spawn_triggers(&self) -> JoinHandle<()> {
        TriggerDispatcher::new(self.functions.clone())
            .spawn(self.store.subscribe(), self.auth.subscribe())
    }

    /// Run the trigger dispatcher and serve the HTTP API until the server stops
    pub async fn serve(&self, host: &str, port: u16) -> Result<(), std::io::Error> {
        let dispatcher = self.spawn_triggers();
        let result = api::start_server(self.clone(), host, port).await;
        dispatcher.abort();
        result
    }
}
