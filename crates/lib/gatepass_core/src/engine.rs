//! Shared engine context.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::notify::Notifier;
use crate::store::GateStore;

/// Handle passed to every engine operation.
///
/// Cheap to clone; all fields are shared.
#[derive(Clone)]
pub struct GateEngine {
    pub store: Arc<dyn GateStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Notifier,
    pub config: EngineConfig,
}

impl GateEngine {
    pub fn new(store: Arc<dyn GateStore>, config: EngineConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<dyn GateStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let notifier = Notifier::new(config.notification_capacity);
        Self {
            store,
            clock,
            notifier,
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
