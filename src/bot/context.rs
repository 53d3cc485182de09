use std::collections::HashSet;
use std::sync::Arc;

use crate::ads::AdScheduler;
use crate::ads::AdsService;
use crate::config::AdsConfig;
use crate::config::StoreContacts;
use crate::db::Db;

#[derive(Clone)]
pub struct AppContext {
  db: Db,
  admins: HashSet<i64>,
  ads: Arc<AdsService>,
  scheduler: AdScheduler,
  ads_config: AdsConfig,
  contacts: StoreContacts,
  items_per_page: u32,
}

impl AppContext {
  pub fn new(
    db: Db,
    admins: Vec<i64>,
    ads: Arc<AdsService>,
    scheduler: AdScheduler,
    ads_config: AdsConfig,
    contacts: StoreContacts,
    items_per_page: u32,
  ) -> Self {
    Self {
      db,
      admins: admins.into_iter().collect(),
      ads,
      scheduler,
      ads_config,
      contacts,
      items_per_page,
    }
  }

  pub fn db(&self) -> &Db {
    &self.db
  }

  pub fn is_admin(&self, tg_id: i64) -> bool {
    self.admins.contains(&tg_id)
  }

  pub fn ads(&self) -> &AdsService {
    &self.ads
  }

  pub fn scheduler(&self) -> &AdScheduler {
    &self.scheduler
  }

  pub fn ads_config(&self) -> &AdsConfig {
    &self.ads_config
  }

  pub fn contacts(&self) -> &StoreContacts {
    &self.contacts
  }

  pub fn items_per_page(&self) -> u32 {
    self.items_per_page
  }
}
