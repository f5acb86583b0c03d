//! State shared by every component of one vault.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{clock::Clock, config::VaultConfig, kv::KvStore, storage::Storage};

pub(crate) struct Context<S> {
  pub storage: Storage<S>,
  pub clock:   Arc<dyn Clock>,
  pub config:  VaultConfig,
}

impl<S: KvStore> Context<S> {
  pub fn new(kv: S, clock: Arc<dyn Clock>, config: VaultConfig) -> Self {
    Self { storage: Storage::new(kv), clock, config }
  }

  pub fn now(&self) -> DateTime<Utc> { self.clock.now() }
}
