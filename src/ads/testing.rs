//! In-memory fakes shared by the ads subsystem tests.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use anyhow::Result;
use anyhow::anyhow;
use chrono::NaiveDate;
use chrono::Utc;
use teloxide::types::ChatId;
use teloxide::types::InlineKeyboardMarkup;

use crate::ads::publisher::AdSender;
use crate::ads::selector::AdsCatalog;
use crate::models::CategoryRow;
use crate::models::MediaType;
use crate::models::ToyMediaRow;
use crate::models::ToyRow;

#[derive(Default)]
struct CatalogState {
  categories: Vec<CategoryRow>,
  toys: Vec<ToyRow>,
  media: Vec<ToyMediaRow>,
  posted: Vec<(i64, Option<i64>, NaiveDate)>,
}

/// [`AdsCatalog`] backed by plain vectors.
#[derive(Default)]
pub struct FakeCatalog {
  state: Mutex<CatalogState>,
  toy_queries: AtomicUsize,
}

impl FakeCatalog {
  fn state(&self) -> std::sync::MutexGuard<'_, CatalogState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn add_category(&self, name: &str, is_active: bool) -> i64 {
    let mut state = self.state();
    let id = state.categories.len() as i64 + 1;
    state.categories.push(CategoryRow {
      id,
      name: name.to_string(),
      is_active,
    });
    id
  }

  pub fn add_toy(&self, title: &str, category_id: Option<i64>, is_active: bool) -> i64 {
    let mut state = self.state();
    let id = state.toys.len() as i64 + 1;
    state.toys.push(ToyRow {
      id,
      title: title.to_string(),
      price: "100 000".to_string(),
      description: String::new(),
      category_id,
      is_active,
      created_at: Utc::now(),
    });
    id
  }

  pub fn add_media(&self, toy_id: i64, file_id: &str) {
    let mut state = self.state();
    let sort_order = state.media.iter().filter(|m| m.toy_id == toy_id).count() as i32;
    state.media.push(ToyMediaRow {
      toy_id,
      file_id: file_id.to_string(),
      media_type: MediaType::Photo,
      sort_order,
    });
  }

  /// Toys logged as posted on `date`, in insertion order.
  pub fn posted_on(&self, date: NaiveDate) -> Vec<i64> {
    self
      .state()
      .posted
      .iter()
      .filter(|(_, _, d)| *d == date)
      .map(|(toy_id, _, _)| *toy_id)
      .collect()
  }

  /// How many times `list_active_toys` ran.
  pub fn toy_queries(&self) -> usize {
    self.toy_queries.load(Ordering::SeqCst)
  }
}

impl AdsCatalog for FakeCatalog {
  async fn list_active_categories(&self) -> Result<Vec<CategoryRow>> {
    Ok(self.state().categories.iter().filter(|c| c.is_active).cloned().collect())
  }

  async fn list_active_toys(&self, category_id: i64, exclude: &[i64]) -> Result<Vec<ToyRow>> {
    self.toy_queries.fetch_add(1, Ordering::SeqCst);
    Ok(
      self
        .state()
        .toys
        .iter()
        .filter(|t| t.is_active && t.category_id == Some(category_id) && !exclude.contains(&t.id))
        .cloned()
        .collect(),
    )
  }

  async fn get_toy(&self, toy_id: i64) -> Result<Option<ToyRow>> {
    Ok(self.state().toys.iter().find(|t| t.id == toy_id).cloned())
  }

  async fn get_category(&self, category_id: i64) -> Result<Option<CategoryRow>> {
    Ok(self.state().categories.iter().find(|c| c.id == category_id).cloned())
  }

  async fn list_toy_media(&self, toy_id: i64) -> Result<Vec<ToyMediaRow>> {
    Ok(self.state().media.iter().filter(|m| m.toy_id == toy_id).cloned().collect())
  }

  async fn posted_toy_ids(&self, date: NaiveDate) -> Result<Vec<i64>> {
    let mut ids = self.posted_on(date);
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
  }

  async fn record_posted(&self, toy_id: i64, category_id: Option<i64>, date: NaiveDate) -> Result<()> {
    self.state().posted.push((toy_id, category_id, date));
    Ok(())
  }

  async fn count_posted_on(&self, date: NaiveDate) -> Result<i64> {
    Ok(self.posted_on(date).len() as i64)
  }
}

/// One delivery observed by [`RecordingSender`].
#[derive(Debug, Clone)]
pub enum SentAd {
  Text { chat: ChatId, text: String },
  Single { chat: ChatId, file_id: String, caption: String },
  Album { chat: ChatId, media_count: usize, caption: String },
}

/// [`AdSender`] that records deliveries instead of calling Telegram.
#[derive(Default)]
pub struct RecordingSender {
  sent: Mutex<Vec<SentAd>>,
  fail_next: AtomicBool,
}

impl RecordingSender {
  pub fn sent(&self) -> Vec<SentAd> {
    self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Makes the next send fail once.
  pub fn fail_next(&self) {
    self.fail_next.store(true, Ordering::SeqCst);
  }

  fn record(&self, ad: SentAd) -> Result<()> {
    if self.fail_next.swap(false, Ordering::SeqCst) {
      return Err(anyhow!("simulated delivery failure"));
    }
    self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(ad);
    Ok(())
  }
}

impl AdSender for RecordingSender {
  async fn send_single(
    &self,
    chat: ChatId,
    media: &ToyMediaRow,
    caption: &str,
    _keyboard: InlineKeyboardMarkup,
  ) -> Result<()> {
    self.record(SentAd::Single {
      chat,
      file_id: media.file_id.clone(),
      caption: caption.to_string(),
    })
  }

  async fn send_album(
    &self,
    chat: ChatId,
    media: &[ToyMediaRow],
    caption: &str,
    _keyboard: InlineKeyboardMarkup,
  ) -> Result<()> {
    self.record(SentAd::Album {
      chat,
      media_count: media.len(),
      caption: caption.to_string(),
    })
  }

  async fn send_text(&self, chat: ChatId, text: &str, _keyboard: InlineKeyboardMarkup) -> Result<()> {
    self.record(SentAd::Text {
      chat,
      text: text.to_string(),
    })
  }
}
