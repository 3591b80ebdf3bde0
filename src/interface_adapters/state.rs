use tokio::sync::mpsc;

use crate::use_cases::types::BrokerCommand;

#[derive(Clone)]
pub struct AppState {
    // Single command inbox for the broker task; every connection and every
    // admin HTTP request funnels through it.
    pub broker_tx: mpsc::Sender<BrokerCommand>,
}
