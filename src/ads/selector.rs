//! Picks the next (category, toy) pair to advertise, rotating fairly across
//! categories and skipping toys already posted today.

use anyhow::Result;
use chrono::NaiveDate;
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

use crate::db::Db;
use crate::models::CategoryRow;
use crate::models::ToyMediaRow;
use crate::models::ToyRow;

/// The slice of the catalog store the ads subsystem reads and appends to.
/// Implemented by [`Db`] in production and by an in-memory fake in tests.
#[allow(async_fn_in_trait)]
pub trait AdsCatalog {
  async fn list_active_categories(&self) -> Result<Vec<CategoryRow>>;
  async fn list_active_toys(&self, category_id: i64, exclude: &[i64]) -> Result<Vec<ToyRow>>;
  async fn get_toy(&self, toy_id: i64) -> Result<Option<ToyRow>>;
  async fn get_category(&self, category_id: i64) -> Result<Option<CategoryRow>>;
  async fn list_toy_media(&self, toy_id: i64) -> Result<Vec<ToyMediaRow>>;
  async fn posted_toy_ids(&self, date: NaiveDate) -> Result<Vec<i64>>;
  async fn record_posted(&self, toy_id: i64, category_id: Option<i64>, date: NaiveDate) -> Result<()>;
  async fn count_posted_on(&self, date: NaiveDate) -> Result<i64>;
}

impl AdsCatalog for Db {
  async fn list_active_categories(&self) -> Result<Vec<CategoryRow>> {
    self.list_categories(true).await
  }

  async fn list_active_toys(&self, category_id: i64, exclude: &[i64]) -> Result<Vec<ToyRow>> {
    self.list_active_toys_excluding(category_id, exclude).await
  }

  async fn get_toy(&self, toy_id: i64) -> Result<Option<ToyRow>> {
    Db::get_toy(self, toy_id).await
  }

  async fn get_category(&self, category_id: i64) -> Result<Option<CategoryRow>> {
    Db::get_category(self, category_id).await
  }

  async fn list_toy_media(&self, toy_id: i64) -> Result<Vec<ToyMediaRow>> {
    Db::list_toy_media(self, toy_id).await
  }

  async fn posted_toy_ids(&self, date: NaiveDate) -> Result<Vec<i64>> {
    Db::posted_toy_ids(self, date).await
  }

  async fn record_posted(&self, toy_id: i64, category_id: Option<i64>, date: NaiveDate) -> Result<()> {
    Db::record_posted(self, toy_id, category_id, date).await
  }

  async fn count_posted_on(&self, date: NaiveDate) -> Result<i64> {
    Db::count_posted_on(self, date).await
  }
}

/// A toy chosen for advertising. `category` is None only on the manual path
/// when the toy is uncategorised.
#[derive(Debug, Clone)]
pub struct AdPick {
  pub category: Option<CategoryRow>,
  pub toy: ToyRow,
}

#[derive(Debug, Error)]
pub enum SelectError {
  #[error("no active categories")]
  NoActiveCategories,
  #[error("no eligible toys in any category")]
  NoEligibleToys,
  #[error(transparent)]
  Store(#[from] anyhow::Error),
}

impl SelectError {
  /// Empty-catalog outcomes are a normal steady state, not failures.
  pub fn is_exhausted(&self) -> bool {
    matches!(self, Self::NoActiveCategories | Self::NoEligibleToys)
  }
}

/// Pick one (category, toy) pair. Categories are shuffled uniformly and the
/// first one holding an eligible toy wins, so every category with remaining
/// stock is equally likely to lead. At most one pass is made; when every
/// category is exhausted the result is [`SelectError::NoEligibleToys`].
///
/// With `exclude_today` set, toys whose id appears in today's post log are
/// filtered out (set semantics, so duplicate log rows are harmless). The
/// selector itself never writes to the log.
pub async fn pick_category_toy<S, R>(
  store: &S,
  exclude_today: bool,
  today: NaiveDate,
  rng: &mut R,
) -> Result<AdPick, SelectError>
where
  S: AdsCatalog,
  R: Rng + ?Sized,
{
  let mut categories = store.list_active_categories().await?;
  if categories.is_empty() {
    return Err(SelectError::NoActiveCategories);
  }

  let exclude = if exclude_today {
    store.posted_toy_ids(today).await?
  } else {
    Vec::new()
  };

  categories.shuffle(rng);

  for category in categories {
    let eligible = store.list_active_toys(category.id, &exclude).await?;
    if let Some(toy) = eligible.choose(rng) {
      debug!(category_id = category.id, toy_id = toy.id, "selected toy for advertising");
      return Ok(AdPick {
        toy: toy.clone(),
        category: Some(category),
      });
    }
  }

  Err(SelectError::NoEligibleToys)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  use super::AdsCatalog;
  use super::SelectError;
  use super::pick_category_toy;
  use crate::ads::testing::FakeCatalog;

  fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
  }

  #[tokio::test]
  async fn empty_catalog_reports_no_categories() {
    let store = FakeCatalog::default();
    let mut rng = StdRng::seed_from_u64(0);
    let err = pick_category_toy(&store, true, day(), &mut rng).await.unwrap_err();
    assert!(matches!(err, SelectError::NoActiveCategories));
    assert!(err.is_exhausted());
  }

  #[tokio::test]
  async fn single_toy_is_always_picked_without_exclusion() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let red_car = store.add_toy("Red Car", Some(cars), true);

    for seed in 0 .. 20u64 {
      let mut rng = StdRng::seed_from_u64(seed);
      let pick = pick_category_toy(&store, false, day(), &mut rng).await.unwrap();
      assert_eq!(pick.toy.id, red_car);
      assert_eq!(pick.category.as_ref().map(|c| c.name.as_str()), Some("Cars"));
    }
  }

  #[tokio::test]
  async fn posted_toy_is_excluded_today_but_not_without_exclusion() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let red_car = store.add_toy("Red Car", Some(cars), true);
    store.record_posted(red_car, Some(cars), day()).await.unwrap();

    let mut rng = StdRng::seed_from_u64(3);
    let err = pick_category_toy(&store, true, day(), &mut rng).await.unwrap_err();
    assert!(matches!(err, SelectError::NoEligibleToys));

    let pick = pick_category_toy(&store, false, day(), &mut rng).await.unwrap();
    assert_eq!(pick.toy.id, red_car);
  }

  #[tokio::test]
  async fn duplicate_log_rows_do_not_break_exclusion() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let red_car = store.add_toy("Red Car", Some(cars), true);
    let blue_car = store.add_toy("Blue Car", Some(cars), true);
    store.record_posted(red_car, Some(cars), day()).await.unwrap();
    store.record_posted(red_car, Some(cars), day()).await.unwrap();

    for seed in 0 .. 20u64 {
      let mut rng = StdRng::seed_from_u64(seed);
      let pick = pick_category_toy(&store, true, day(), &mut rng).await.unwrap();
      assert_eq!(pick.toy.id, blue_car);
    }
  }

  #[tokio::test]
  async fn yesterdays_posts_do_not_exclude_today() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let red_car = store.add_toy("Red Car", Some(cars), true);
    let yesterday = day().pred_opt().unwrap();
    store.record_posted(red_car, Some(cars), yesterday).await.unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let pick = pick_category_toy(&store, true, day(), &mut rng).await.unwrap();
    assert_eq!(pick.toy.id, red_car);
  }

  #[tokio::test]
  async fn inactive_toys_and_categories_are_never_picked() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    store.add_toy("Broken Car", Some(cars), false);
    let hidden = store.add_category("Hidden", false);
    store.add_toy("Ghost", Some(hidden), true);

    let mut rng = StdRng::seed_from_u64(5);
    let err = pick_category_toy(&store, true, day(), &mut rng).await.unwrap_err();
    assert!(matches!(err, SelectError::NoEligibleToys));
  }

  #[tokio::test]
  async fn falls_through_exhausted_categories_in_one_pass() {
    let store = FakeCatalog::default();
    let cars = store.add_category("Cars", true);
    let dolls = store.add_category("Dolls", true);
    let car = store.add_toy("Red Car", Some(cars), true);
    let doll = store.add_toy("Rag Doll", Some(dolls), true);
    store.record_posted(car, Some(cars), day()).await.unwrap();

    for seed in 0 .. 20u64 {
      let mut rng = StdRng::seed_from_u64(seed);
      let pick = pick_category_toy(&store, true, day(), &mut rng).await.unwrap();
      assert_eq!(pick.toy.id, doll);
    }
    // Every category was examined at most once per call.
    assert!(store.toy_queries() <= 20 * 2);
  }
}
