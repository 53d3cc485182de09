pub mod format;
pub mod planner;
pub mod publisher;
pub mod scheduler;
pub mod selector;
#[cfg(test)]
pub(crate) mod testing;

pub use planner::PlannerConfig;
pub use planner::SlotTime;
pub use publisher::AdPublisher;
pub use publisher::TelegramSender;
pub use scheduler::AdScheduler;
pub use selector::AdsCatalog;

use crate::db::Db;

/// Production publisher wiring: catalog queries go through the database,
/// delivery through the Telegram bot API.
pub type AdsService = AdPublisher<Db, TelegramSender>;
