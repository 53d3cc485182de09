use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dptree;
use teloxide::prelude::*;
use tracing::error;
use tracing::info;

use crate::ads::AdScheduler;
use crate::ads::AdsService;
use crate::ads::PlannerConfig;
use crate::ads::SlotTime;
use crate::ads::TelegramSender;
use crate::ads::scheduler::trigger_job;
use crate::bot;
use crate::bot::AppContext;
use crate::bot::DialogueStorage;
use crate::config::Config;
use crate::db::Db;

pub struct App {
  bot: Bot,
  context: Arc<AppContext>,
  scheduler: AdScheduler,
  handler: UpdateHandler<anyhow::Error>,
}

impl App {
  pub fn new(bot: Bot, db: Db, config: &Config) -> Self {
    let ads: Arc<AdsService> = Arc::new(AdsService::new(
      db.clone(),
      TelegramSender::new(bot.clone()),
      config.ads.group_chat_id,
      config.contacts.clone(),
    ));

    let slot_ads = Arc::clone(&ads);
    let slot_job = trigger_job(move || {
      let ads = Arc::clone(&slot_ads);
      async move {
        ads.run_scheduled_slot().await;
      }
    });

    let bestseller_db = db.clone();
    let scheduler = AdScheduler::new(PlannerConfig::from(&config.ads), slot_job).with_daily_job(
      "bestsellers:refresh",
      SlotTime { hour: 0, minute: 5 },
      move || {
        let db = bestseller_db.clone();
        async move {
          match db.refresh_bestsellers().await {
            Ok(created) => info!(created, "refreshed bestseller rankings"),
            Err(err) => error!(error = %err, "bestseller refresh failed"),
          }
        }
      },
    );

    let context = Arc::new(AppContext::new(
      db,
      config.admins.clone(),
      ads,
      scheduler.clone(),
      config.ads.clone(),
      config.contacts.clone(),
      config.items_per_page,
    ));
    let handler = bot::build_schema();
    Self {
      bot,
      context,
      scheduler,
      handler,
    }
  }

  pub async fn run(self) -> anyhow::Result<()> {
    let storage: Arc<DialogueStorage> = InMemStorage::new();

    let me = self.bot.get_me().await?;
    self.scheduler.start()?;

    Dispatcher::builder(self.bot.clone(), self.handler)
      .dependencies(dptree::deps![self.context.clone(), storage.clone(), me])
      .enable_ctrlc_handler()
      .build()
      .dispatch()
      .await;

    self.scheduler.stop();
    Ok(())
  }
}
