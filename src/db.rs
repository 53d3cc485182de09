use anyhow::Result;
use chrono::NaiveDate;
use sqlx::Pool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::postgres::PgRow;
use tracing::instrument;

use crate::models::BestsellerRow;
use crate::models::CartItemRow;
use crate::models::CategoryRow;
use crate::models::FavoriteRow;
use crate::models::MediaType;
use crate::models::OrderContactRow;
use crate::models::StatsPeriod;
use crate::models::StoreLocationRow;
use crate::models::ToyMediaRow;
use crate::models::ToyRow;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const TOY_COLUMNS: &str = "id, title, price, description, category_id, is_active, created_at";

fn toy_from_row(row: &PgRow) -> ToyRow {
  ToyRow {
    id: row.get("id"),
    title: row.get("title"),
    price: row.get("price"),
    description: row.get("description"),
    category_id: row.get("category_id"),
    is_active: row.get("is_active"),
    created_at: row.get("created_at"),
  }
}

fn category_from_row(row: &PgRow) -> CategoryRow {
  CategoryRow {
    id: row.get("id"),
    name: row.get("name"),
    is_active: row.get("is_active"),
  }
}

#[derive(Clone)]
pub struct Db {
  pool: Pool<Postgres>,
}

impl Db {
  pub async fn connect(database_url: &str) -> Result<Self> {
    let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
    MIGRATOR.run(&pool).await?;
    Ok(Self { pool })
  }

  #[instrument(skip(self))]
  pub async fn upsert_user(
    &self,
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
  ) -> Result<()> {
    sqlx::query(
      r#"
      INSERT INTO users (id, username, first_name, last_name)
      VALUES ($1, $2, $3, $4)
      ON CONFLICT (id) DO UPDATE SET
        username = EXCLUDED.username,
        first_name = EXCLUDED.first_name,
        last_name = EXCLUDED.last_name
      "#,
    )
    .bind(id)
    .bind(username)
    .bind(first_name)
    .bind(last_name)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  // --- categories ---

  #[instrument(skip(self))]
  pub async fn list_categories(&self, only_active: bool) -> Result<Vec<CategoryRow>> {
    let rows = sqlx::query("SELECT id, name, is_active FROM categories WHERE is_active OR NOT $1 ORDER BY name")
      .bind(only_active)
      .fetch_all(&self.pool)
      .await?;
    Ok(rows.iter().map(category_from_row).collect())
  }

  #[instrument(skip(self))]
  pub async fn get_category(&self, category_id: i64) -> Result<Option<CategoryRow>> {
    let row = sqlx::query("SELECT id, name, is_active FROM categories WHERE id = $1")
      .bind(category_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.as_ref().map(category_from_row))
  }

  #[instrument(skip(self))]
  pub async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryRow>> {
    let row = sqlx::query("SELECT id, name, is_active FROM categories WHERE LOWER(name) = LOWER($1) LIMIT 1")
      .bind(name)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.as_ref().map(category_from_row))
  }

  #[instrument(skip(self))]
  pub async fn create_category(&self, name: &str) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>("INSERT INTO categories (name) VALUES ($1) RETURNING id")
      .bind(name)
      .fetch_one(&self.pool)
      .await?;
    Ok(id)
  }

  #[instrument(skip(self))]
  pub async fn rename_category(&self, category_id: i64, name: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE categories SET name = $2 WHERE id = $1")
      .bind(category_id)
      .bind(name)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  #[instrument(skip(self))]
  pub async fn set_category_active(&self, category_id: i64, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE categories SET is_active = $2 WHERE id = $1")
      .bind(category_id)
      .bind(active)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  // --- toys ---

  #[instrument(skip(self, description))]
  pub async fn create_toy(
    &self,
    title: &str,
    price: &str,
    description: &str,
    category_id: Option<i64>,
  ) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
      "INSERT INTO toys (title, price, description, category_id) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(title)
    .bind(price)
    .bind(description)
    .bind(category_id)
    .fetch_one(&self.pool)
    .await?;
    Ok(id)
  }

  #[instrument(skip(self))]
  pub async fn get_toy(&self, toy_id: i64) -> Result<Option<ToyRow>> {
    let row = sqlx::query(&format!("SELECT {TOY_COLUMNS} FROM toys WHERE id = $1"))
      .bind(toy_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.as_ref().map(toy_from_row))
  }

  #[instrument(skip(self))]
  pub async fn set_toy_active(&self, toy_id: i64, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE toys SET is_active = $2 WHERE id = $1")
      .bind(toy_id)
      .bind(active)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  #[instrument(skip(self))]
  pub async fn count_active_toys(&self, category_id: i64) -> Result<i64> {
    let count =
      sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM toys WHERE category_id = $1 AND is_active")
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;
    Ok(count)
  }

  #[instrument(skip(self))]
  pub async fn list_active_toys_page(&self, category_id: i64, limit: i64, offset: i64) -> Result<Vec<ToyRow>> {
    let rows = sqlx::query(&format!(
      "SELECT {TOY_COLUMNS} FROM toys WHERE category_id = $1 AND is_active ORDER BY created_at DESC LIMIT $2 OFFSET \
       $3",
    ))
    .bind(category_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.iter().map(toy_from_row).collect())
  }

  /// Active toys in a category minus an explicit exclusion set. Used by the
  /// ads selector with the "posted today" set.
  #[instrument(skip(self, exclude))]
  pub async fn list_active_toys_excluding(&self, category_id: i64, exclude: &[i64]) -> Result<Vec<ToyRow>> {
    let rows = sqlx::query(&format!(
      "SELECT {TOY_COLUMNS} FROM toys WHERE category_id = $1 AND is_active AND NOT (id = ANY($2))",
    ))
    .bind(category_id)
    .bind(exclude.to_vec())
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.iter().map(toy_from_row).collect())
  }

  // --- toy media ---

  #[instrument(skip(self))]
  pub async fn add_toy_media(&self, toy_id: i64, file_id: &str, media_type: MediaType, sort_order: i32) -> Result<()> {
    sqlx::query("INSERT INTO toy_media (toy_id, file_id, media_type, sort_order) VALUES ($1, $2, $3, $4)")
      .bind(toy_id)
      .bind(file_id)
      .bind(media_type.as_str())
      .bind(sort_order)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn list_toy_media(&self, toy_id: i64) -> Result<Vec<ToyMediaRow>> {
    let rows = sqlx::query(
      "SELECT toy_id, file_id, media_type, sort_order FROM toy_media WHERE toy_id = $1 ORDER BY sort_order, id",
    )
    .bind(toy_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(
      rows
        .into_iter()
        .filter_map(|row| {
          let media_type = MediaType::parse(row.get::<String, _>("media_type").as_str())?;
          Some(ToyMediaRow {
            toy_id: row.get("toy_id"),
            file_id: row.get("file_id"),
            media_type,
            sort_order: row.get("sort_order"),
          })
        })
        .collect(),
    )
  }

  // --- daily ads log ---

  /// Set of toy ids advertised on `date`. Duplicate log rows collapse here.
  #[instrument(skip(self))]
  pub async fn posted_toy_ids(&self, date: NaiveDate) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT DISTINCT toy_id FROM daily_ads_log WHERE posted_date = $1")
      .bind(date.format("%Y-%m-%d").to_string())
      .fetch_all(&self.pool)
      .await?;
    Ok(ids)
  }

  #[instrument(skip(self))]
  pub async fn record_posted(&self, toy_id: i64, category_id: Option<i64>, date: NaiveDate) -> Result<()> {
    sqlx::query("INSERT INTO daily_ads_log (toy_id, category_id, posted_date) VALUES ($1, $2, $3)")
      .bind(toy_id)
      .bind(category_id)
      .bind(date.format("%Y-%m-%d").to_string())
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn count_posted_on(&self, date: NaiveDate) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM daily_ads_log WHERE posted_date = $1")
      .bind(date.format("%Y-%m-%d").to_string())
      .fetch_one(&self.pool)
      .await?;
    Ok(count)
  }

  // --- order contacts ---

  #[instrument(skip(self))]
  pub async fn list_contacts(&self, only_active: bool) -> Result<Vec<OrderContactRow>> {
    let rows = sqlx::query(
      "SELECT id, contact_value, is_active FROM order_contacts WHERE is_active OR NOT $1 ORDER BY id",
    )
    .bind(only_active)
    .fetch_all(&self.pool)
    .await?;
    Ok(
      rows
        .into_iter()
        .map(|row| OrderContactRow {
          id: row.get("id"),
          contact_value: row.get("contact_value"),
          is_active: row.get("is_active"),
        })
        .collect(),
    )
  }

  #[instrument(skip(self))]
  pub async fn add_contact(&self, contact_value: &str) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
      r#"
      INSERT INTO order_contacts (contact_value)
      VALUES ($1)
      ON CONFLICT (contact_value) DO UPDATE SET is_active = TRUE
      RETURNING id
      "#,
    )
    .bind(contact_value)
    .fetch_one(&self.pool)
    .await?;
    Ok(id)
  }

  #[instrument(skip(self))]
  pub async fn set_contact_active(&self, contact_id: i64, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE order_contacts SET is_active = $2 WHERE id = $1")
      .bind(contact_id)
      .bind(active)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  // --- store locations ---

  #[instrument(skip(self))]
  pub async fn list_active_locations(&self) -> Result<Vec<StoreLocationRow>> {
    let rows = sqlx::query(
      "SELECT id, name, address_text, latitude, longitude FROM store_locations WHERE is_active ORDER BY id",
    )
    .fetch_all(&self.pool)
    .await?;
    Ok(
      rows
        .into_iter()
        .map(|row| StoreLocationRow {
          id: row.get("id"),
          name: row.get("name"),
          address_text: row.get("address_text"),
          latitude: row.get("latitude"),
          longitude: row.get("longitude"),
        })
        .collect(),
    )
  }

  #[instrument(skip(self, address_text))]
  pub async fn add_location(&self, name: &str, address_text: &str, latitude: f64, longitude: f64) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
      "INSERT INTO store_locations (name, address_text, latitude, longitude) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(name)
    .bind(address_text)
    .bind(latitude.to_string())
    .bind(longitude.to_string())
    .fetch_one(&self.pool)
    .await?;
    Ok(id)
  }

  #[instrument(skip(self))]
  pub async fn set_location_active(&self, location_id: i64, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE store_locations SET is_active = $2 WHERE id = $1")
      .bind(location_id)
      .bind(active)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  // --- cart ---

  #[instrument(skip(self))]
  pub async fn add_to_cart(&self, user_id: i64, toy: &ToyRow) -> Result<()> {
    sqlx::query(
      r#"
      INSERT INTO cart_items (user_id, toy_id, toy_name, price, quantity)
      VALUES ($1, $2, $3, $4, 1)
      ON CONFLICT (user_id, toy_id) DO UPDATE SET quantity = cart_items.quantity + 1
      "#,
    )
    .bind(user_id)
    .bind(toy.id)
    .bind(&toy.title)
    .bind(&toy.price)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn list_cart(&self, user_id: i64) -> Result<Vec<CartItemRow>> {
    let rows = sqlx::query(
      "SELECT toy_id, toy_name, price, quantity FROM cart_items WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(
      rows
        .into_iter()
        .map(|row| CartItemRow {
          toy_id: row.get("toy_id"),
          toy_name: row.get("toy_name"),
          price: row.get("price"),
          quantity: row.get("quantity"),
        })
        .collect(),
    )
  }

  /// Adjust a cart line by `delta`; the row is removed once quantity drops
  /// to zero.
  #[instrument(skip(self))]
  pub async fn change_cart_quantity(&self, user_id: i64, toy_id: i64, delta: i32) -> Result<()> {
    sqlx::query("UPDATE cart_items SET quantity = quantity + $3 WHERE user_id = $1 AND toy_id = $2")
      .bind(user_id)
      .bind(toy_id)
      .bind(delta)
      .execute(&self.pool)
      .await?;
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND toy_id = $2 AND quantity <= 0")
      .bind(user_id)
      .bind(toy_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn remove_cart_item(&self, user_id: i64, toy_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND toy_id = $2")
      .bind(user_id)
      .bind(toy_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn clear_cart(&self, user_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
      .bind(user_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected())
  }

  // --- favorites ---

  #[instrument(skip(self))]
  pub async fn add_favorite(&self, user_id: i64, toy_id: i64, toy_name: &str) -> Result<()> {
    sqlx::query(
      r#"
      INSERT INTO favorites (user_id, toy_id, toy_name)
      VALUES ($1, $2, $3)
      ON CONFLICT (user_id, toy_id) DO NOTHING
      "#,
    )
    .bind(user_id)
    .bind(toy_id)
    .bind(toy_name)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn remove_favorite(&self, user_id: i64, toy_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND toy_id = $2")
      .bind(user_id)
      .bind(toy_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn is_favorite(&self, user_id: i64, toy_id: i64) -> Result<bool> {
    let exists =
      sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM favorites WHERE user_id = $1 AND toy_id = $2)")
        .bind(user_id)
        .bind(toy_id)
        .fetch_one(&self.pool)
        .await?;
    Ok(exists)
  }

  #[instrument(skip(self))]
  pub async fn list_favorites(&self, user_id: i64) -> Result<Vec<FavoriteRow>> {
    let rows = sqlx::query("SELECT toy_id, toy_name FROM favorites WHERE user_id = $1 ORDER BY created_at DESC")
      .bind(user_id)
      .fetch_all(&self.pool)
      .await?;
    Ok(
      rows
        .into_iter()
        .map(|row| FavoriteRow {
          toy_id: row.get("toy_id"),
          toy_name: row.get("toy_name"),
        })
        .collect(),
    )
  }

  // --- sales stats & bestsellers ---

  #[instrument(skip(self, toy_name, category_name))]
  pub async fn log_sale_lead(
    &self,
    user_id: i64,
    toy_id: i64,
    toy_name: &str,
    category_id: Option<i64>,
    category_name: Option<&str>,
  ) -> Result<()> {
    sqlx::query(
      "INSERT INTO sales_logs (user_id, toy_id, toy_name, category_id, category_name) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(user_id)
    .bind(toy_id)
    .bind(toy_name)
    .bind(category_id)
    .bind(category_name)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  /// Grouped lead counts per category for a reporting window, best first.
  #[instrument(skip(self))]
  pub async fn category_stats(&self, period: StatsPeriod) -> Result<Vec<(String, i64)>> {
    let window = match period {
      StatsPeriod::Weekly => "created_at >= now() - interval '7 days'",
      StatsPeriod::Monthly => "created_at >= date_trunc('month', now())",
      StatsPeriod::Yearly => "created_at >= date_trunc('year', now())",
    };
    let rows = sqlx::query(&format!(
      "SELECT category_name, COUNT(*) AS leads FROM sales_logs WHERE category_name IS NOT NULL AND {window} GROUP \
       BY category_name ORDER BY leads DESC",
    ))
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.into_iter().map(|row| (row.get("category_name"), row.get("leads"))).collect())
  }

  #[instrument(skip(self))]
  pub async fn list_bestsellers(&self, period: StatsPeriod, limit: i64) -> Result<Vec<BestsellerRow>> {
    let rows = sqlx::query(
      r#"
      SELECT category_id, category_name, source, rank
      FROM bestseller_categories
      WHERE period = $1 AND is_active
      ORDER BY rank
      LIMIT $2
      "#,
    )
    .bind(period.as_str())
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;
    Ok(
      rows
        .into_iter()
        .map(|row| BestsellerRow {
          category_id: row.get("category_id"),
          category_name: row.get("category_name"),
          source: row.get("source"),
          rank: row.get("rank"),
        })
        .collect(),
    )
  }

  /// Replace the auto-generated top list for a period. Ranks held by an
  /// active manual entry are left alone.
  #[instrument(skip(self, ranked))]
  pub async fn replace_auto_bestsellers(&self, period: StatsPeriod, ranked: &[(i64, String)]) -> Result<usize> {
    sqlx::query("UPDATE bestseller_categories SET is_active = FALSE WHERE period = $1 AND source = 'auto'")
      .bind(period.as_str())
      .execute(&self.pool)
      .await?;

    let mut created = 0usize;
    for (index, (category_id, category_name)) in ranked.iter().take(5).enumerate() {
      let rank = (index + 1) as i32;
      let manual_taken = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
          SELECT 1 FROM bestseller_categories
          WHERE period = $1 AND rank = $2 AND source = 'manual' AND is_active
        )
        "#,
      )
      .bind(period.as_str())
      .bind(rank)
      .fetch_one(&self.pool)
      .await?;
      if manual_taken {
        continue;
      }

      sqlx::query(
        r#"
        INSERT INTO bestseller_categories (category_id, category_name, source, period, rank)
        VALUES ($1, $2, 'auto', $3, $4)
        "#,
      )
      .bind(category_id)
      .bind(category_name)
      .bind(period.as_str())
      .bind(rank)
      .execute(&self.pool)
      .await?;
      created += 1;
    }
    Ok(created)
  }

  #[instrument(skip(self))]
  pub async fn create_manual_bestseller(&self, period: StatsPeriod, rank: i32, category: &CategoryRow) -> Result<()> {
    sqlx::query(
      "UPDATE bestseller_categories SET is_active = FALSE WHERE period = $1 AND rank = $2 AND is_active",
    )
    .bind(period.as_str())
    .bind(rank)
    .execute(&self.pool)
    .await?;
    sqlx::query(
      r#"
      INSERT INTO bestseller_categories (category_id, category_name, source, period, rank)
      VALUES ($1, $2, 'manual', $3, $4)
      "#,
    )
    .bind(category.id)
    .bind(&category.name)
    .bind(period.as_str())
    .bind(rank)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  /// Regenerate auto bestseller lists for every period from sales leads.
  #[instrument(skip(self))]
  pub async fn refresh_bestsellers(&self) -> Result<usize> {
    let mut total = 0usize;
    for period in StatsPeriod::ALL {
      let stats = self.category_stats(period).await?;
      if stats.is_empty() {
        continue;
      }
      let mut ranked = Vec::with_capacity(stats.len().min(5));
      for (name, _count) in stats.into_iter().take(5) {
        if let Some(category) = self.find_category_by_name(&name).await? {
          ranked.push((category.id, category.name));
        }
      }
      total += self.replace_auto_bestsellers(period, &ranked).await?;
    }
    Ok(total)
  }
}
