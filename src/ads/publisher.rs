//! Delivers a selected toy to the configured group chat and records the
//! post so the selector can exclude it for the rest of the day.

use anyhow::Result;
use chrono::Local;
use chrono::NaiveDate;
use rand::SeedableRng;
use rand::rngs::StdRng;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::types::InputFile;
use teloxide::types::InputMedia;
use teloxide::types::InputMediaPhoto;
use teloxide::types::InputMediaVideo;
use teloxide::types::ParseMode;
use thiserror::Error;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::ads::format;
use crate::ads::selector;
use crate::ads::selector::AdPick;
use crate::ads::selector::AdsCatalog;
use crate::ads::selector::SelectError;
use crate::config::StoreContacts;
use crate::models::MediaType;
use crate::models::ToyMediaRow;

/// Outbound delivery capability. Production is the Telegram bot API; tests
/// substitute a recording fake.
#[allow(async_fn_in_trait)]
pub trait AdSender {
  async fn send_single(
    &self,
    chat: ChatId,
    media: &ToyMediaRow,
    caption: &str,
    keyboard: InlineKeyboardMarkup,
  ) -> Result<()>;
  async fn send_album(
    &self,
    chat: ChatId,
    media: &[ToyMediaRow],
    caption: &str,
    keyboard: InlineKeyboardMarkup,
  ) -> Result<()>;
  async fn send_text(&self, chat: ChatId, text: &str, keyboard: InlineKeyboardMarkup) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum PostError {
  #[error("group chat id is not configured, ad posting disabled")]
  DestinationDisabled,
  #[error("group chat id {0} is positive; groups use negative ids")]
  DestinationInvalid(i64),
  #[error("toy {0} not found")]
  ToyNotFound(i64),
  #[error("toy {0} is inactive")]
  ToyInactive(i64),
  #[error(transparent)]
  Select(#[from] SelectError),
  #[error("ad delivery failed: {0}")]
  Delivery(#[source] anyhow::Error),
  #[error("catalog store error: {0}")]
  Store(#[source] anyhow::Error),
}

pub struct AdPublisher<S, T> {
  store: S,
  sender: T,
  group_chat_id: i64,
  contacts: StoreContacts,
}

impl<S: AdsCatalog, T: AdSender> AdPublisher<S, T> {
  pub fn new(store: S, sender: T, group_chat_id: i64, contacts: StoreContacts) -> Self {
    Self {
      store,
      sender,
      group_chat_id,
      contacts,
    }
  }

  /// Destination precondition: groups and supergroups carry negative ids,
  /// 0 means posting is switched off. Checked before any I/O.
  fn destination(&self) -> Result<ChatId, PostError> {
    match self.group_chat_id {
      0 => Err(PostError::DestinationDisabled),
      id if id > 0 => Err(PostError::DestinationInvalid(id)),
      id => Ok(ChatId(id)),
    }
  }

  fn today() -> NaiveDate {
    Local::now().date_naive()
  }

  /// Scheduled-slot path: selector with today's exclusion, then delivery.
  #[instrument(skip(self))]
  pub async fn post_scheduled_ad(&self) -> Result<(), PostError> {
    let destination = self.destination()?;
    let today = Self::today();
    let mut rng = StdRng::from_entropy();
    let pick = selector::pick_category_toy(&self.store, true, today, &mut rng).await?;
    self.deliver(destination, &pick, today).await
  }

  /// Entry point for the scheduler's ad-slot trigger. Contains every
  /// failure at the scope of this single fire.
  pub async fn run_scheduled_slot(&self) {
    match self.post_scheduled_ad().await {
      Ok(()) => {},
      Err(PostError::DestinationDisabled) => {
        warn!("group chat id not configured, skipping ad slot");
      },
      Err(PostError::Select(err)) if err.is_exhausted() => {
        info!(reason = %err, "no toy available for this ad slot");
      },
      Err(err) => {
        error!(error = %err, "scheduled ad post failed");
      },
    }
  }

  /// Operator-triggered immediate post. An explicit toy id bypasses the
  /// selector and the daily exclusion; without one the selector runs with
  /// exclusion off so a repeat post is allowed. Never raises.
  #[instrument(skip(self))]
  pub async fn post_manual_ad(&self, toy_id: Option<i64>) -> bool {
    match self.post_manual_inner(toy_id).await {
      Ok(()) => true,
      Err(PostError::Select(err)) if err.is_exhausted() => {
        warn!(reason = %err, "manual ad has nothing to post");
        false
      },
      Err(err) => {
        error!(error = %err, ?toy_id, "manual ad post failed");
        false
      },
    }
  }

  async fn post_manual_inner(&self, toy_id: Option<i64>) -> Result<(), PostError> {
    let destination = self.destination()?;
    let today = Self::today();

    let pick = match toy_id {
      Some(id) => {
        let toy = self.store.get_toy(id).await.map_err(PostError::Store)?;
        let Some(toy) = toy else {
          return Err(PostError::ToyNotFound(id));
        };
        if !toy.is_active {
          return Err(PostError::ToyInactive(id));
        }
        let category = match toy.category_id {
          Some(category_id) => self.store.get_category(category_id).await.map_err(PostError::Store)?,
          None => None,
        };
        AdPick { category, toy }
      },
      None => {
        let mut rng = StdRng::from_entropy();
        selector::pick_category_toy(&self.store, false, today, &mut rng).await?
      },
    };

    self.deliver(destination, &pick, today).await
  }

  /// Render and send, and only then append to the daily post log; a failed
  /// delivery leaves the toy eligible for a later slot or a manual retry.
  async fn deliver(&self, destination: ChatId, pick: &AdPick, today: NaiveDate) -> Result<(), PostError> {
    let toy = &pick.toy;
    let media = self.store.list_toy_media(toy.id).await.map_err(PostError::Store)?;
    let caption = format::ad_caption(toy, pick.category.as_ref(), &self.contacts);
    let keyboard = format::ad_keyboard(toy.id, &self.contacts);

    let sent = match media.as_slice() {
      [] => self.sender.send_text(destination, &caption, keyboard).await,
      [single] => self.sender.send_single(destination, single, &caption, keyboard).await,
      many => self.sender.send_album(destination, many, &caption, keyboard).await,
    };
    sent.map_err(PostError::Delivery)?;

    let category_id = pick.category.as_ref().map(|c| c.id);
    self
      .store
      .record_posted(toy.id, category_id, today)
      .await
      .map_err(PostError::Store)?;

    info!(
      toy_id = toy.id,
      category_id,
      chat_id = destination.0,
      "posted toy advertisement"
    );
    Ok(())
  }

  /// How many ads went out today, for the admin status screen.
  pub async fn today_posted_count(&self) -> Result<i64> {
    self.store.count_posted_on(Self::today()).await
  }
}

/// [`AdSender`] over the Telegram bot API.
#[derive(Clone)]
pub struct TelegramSender {
  bot: Bot,
}

impl TelegramSender {
  pub fn new(bot: Bot) -> Self {
    Self { bot }
  }
}

impl AdSender for TelegramSender {
  async fn send_single(
    &self,
    chat: ChatId,
    media: &ToyMediaRow,
    caption: &str,
    keyboard: InlineKeyboardMarkup,
  ) -> Result<()> {
    let file = InputFile::file_id(media.file_id.clone().into());
    match media.media_type {
      MediaType::Photo => {
        self
          .bot
          .send_photo(chat, file)
          .caption(caption.to_string())
          .parse_mode(ParseMode::Html)
          .reply_markup(keyboard)
          .await?;
      },
      MediaType::Video => {
        self
          .bot
          .send_video(chat, file)
          .caption(caption.to_string())
          .parse_mode(ParseMode::Html)
          .reply_markup(keyboard)
          .await?;
      },
    }
    Ok(())
  }

  async fn send_album(
    &self,
    chat: ChatId,
    media: &[ToyMediaRow],
    caption: &str,
    keyboard: InlineKeyboardMarkup,
  ) -> Result<()> {
    let mut group = Vec::with_capacity(media.len());
    for (index, item) in media.iter().enumerate() {
      let file = InputFile::file_id(item.file_id.clone().into());
      let entry = match item.media_type {
        MediaType::Photo => {
          let mut photo = InputMediaPhoto::new(file);
          if index == 0 {
            photo = photo.caption(caption.to_string()).parse_mode(ParseMode::Html);
          }
          InputMedia::Photo(photo)
        },
        MediaType::Video => {
          let mut video = InputMediaVideo::new(file);
          if index == 0 {
            video = video.caption(caption.to_string()).parse_mode(ParseMode::Html);
          }
          InputMedia::Video(video)
        },
      };
      group.push(entry);
    }

    let sent = self.bot.send_media_group(chat, group).await?;

    // Media groups cannot carry a keyboard directly; attach it to the first
    // message, falling back to a separate message when editing fails.
    if let Some(first) = sent.first()
      && let Err(err) = self
        .bot
        .edit_message_reply_markup(chat, first.id)
        .reply_markup(keyboard.clone())
        .await
    {
      warn!(error = %err, chat_id = chat.0, "could not attach keyboard to media group");
      self.bot.send_message(chat, "🔘").reply_markup(keyboard).await?;
    }
    Ok(())
  }

  async fn send_text(&self, chat: ChatId, text: &str, keyboard: InlineKeyboardMarkup) -> Result<()> {
    self
      .bot
      .send_message(chat, text.to_string())
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard)
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use chrono::Local;

  use super::AdPublisher;
  use super::PostError;
  use crate::ads::testing::FakeCatalog;
  use crate::ads::testing::RecordingSender;
  use crate::ads::testing::SentAd;
  use crate::config::StoreContacts;

  fn contacts() -> StoreContacts {
    StoreContacts {
      bot_username: "@ToymixBot".to_string(),
      group_link: "https://t.me/toymix".to_string(),
      order_phone: "+998901234567".to_string(),
    }
  }

  fn publisher(store: FakeCatalog, chat_id: i64) -> AdPublisher<FakeCatalog, RecordingSender> {
    AdPublisher::new(store, RecordingSender::default(), chat_id, contacts())
  }

  #[tokio::test]
  async fn disabled_destination_posts_nothing() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    store.add_toy("Red Car", Some(cars), true);
    let publisher = publisher(store, 0);

    let err = publisher.post_scheduled_ad().await.unwrap_err();
    assert!(matches!(err, PostError::DestinationDisabled));
    assert!(publisher.sender.sent().is_empty());
    assert_eq!(publisher.today_posted_count().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn positive_destination_is_a_configuration_fault() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    store.add_toy("Red Car", Some(cars), true);
    let publisher = publisher(store, 12345);

    let err = publisher.post_scheduled_ad().await.unwrap_err();
    assert!(matches!(err, PostError::DestinationInvalid(12345)));
    assert!(publisher.sender.sent().is_empty());

    assert!(!publisher.post_manual_ad(None).await);
    assert!(publisher.sender.sent().is_empty());
  }

  #[tokio::test]
  async fn scheduled_post_records_and_excludes_for_the_day() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let red_car = store.add_toy("Red Car", Some(cars), true);
    let publisher = publisher(store, -100);

    publisher.post_scheduled_ad().await.unwrap();
    assert_eq!(publisher.sender.sent().len(), 1);
    assert_eq!(publisher.today_posted_count().await.unwrap(), 1);

    // The only toy is now excluded; the next slot has nothing to post.
    let err = publisher.post_scheduled_ad().await.unwrap_err();
    assert!(matches!(err, PostError::Select(e) if e.is_exhausted()));
    assert_eq!(publisher.sender.sent().len(), 1);
    assert_eq!(
      publisher.store.posted_on(Local::now().date_naive()),
      vec![red_car]
    );
  }

  #[tokio::test]
  async fn send_shape_follows_media_count() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let toy = store.add_toy("Red Car", Some(cars), true);
    let publisher = publisher(store, -100);

    publisher.post_scheduled_ad().await.unwrap();
    assert!(matches!(publisher.sender.sent()[0], SentAd::Text { .. }));

    publisher.store.add_media(toy, "file-1");
    assert!(publisher.post_manual_ad(Some(toy)).await);
    assert!(matches!(publisher.sender.sent()[1], SentAd::Single { .. }));

    publisher.store.add_media(toy, "file-2");
    assert!(publisher.post_manual_ad(Some(toy)).await);
    assert!(matches!(publisher.sender.sent()[2], SentAd::Album { media_count: 2, .. }));
  }

  #[tokio::test]
  async fn manual_ad_with_explicit_toy_bypasses_exclusion() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let red_car = store.add_toy("Red Car", Some(cars), true);
    let publisher = publisher(store, -100);

    publisher.post_scheduled_ad().await.unwrap();
    assert!(publisher.post_manual_ad(Some(red_car)).await);
    assert_eq!(publisher.sender.sent().len(), 2);
    // The forced post is recorded too, keeping the exclusion log accurate.
    assert_eq!(publisher.today_posted_count().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn manual_ad_without_toy_allows_repeats() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    store.add_toy("Red Car", Some(cars), true);
    let publisher = publisher(store, -100);

    publisher.post_scheduled_ad().await.unwrap();
    assert!(publisher.post_manual_ad(None).await);
    assert_eq!(publisher.sender.sent().len(), 2);
  }

  #[tokio::test]
  async fn manual_ad_rejects_missing_or_inactive_toys() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let broken = store.add_toy("Broken Car", Some(cars), false);
    let publisher = publisher(store, -100);

    assert!(!publisher.post_manual_ad(Some(9999)).await);
    assert!(!publisher.post_manual_ad(Some(broken)).await);
    assert!(publisher.sender.sent().is_empty());
  }

  #[tokio::test]
  async fn failed_delivery_leaves_toy_eligible() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    store.add_toy("Red Car", Some(cars), true);
    let publisher = publisher(store, -100);
    publisher.sender.fail_next();

    let err = publisher.post_scheduled_ad().await.unwrap_err();
    assert!(matches!(err, PostError::Delivery(_)));
    assert_eq!(publisher.today_posted_count().await.unwrap(), 0);

    // The retry path is simply the next fire.
    publisher.post_scheduled_ad().await.unwrap();
    assert_eq!(publisher.today_posted_count().await.unwrap(), 1);
  }
}
