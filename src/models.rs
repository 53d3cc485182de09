use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRow {
  pub id: i64,
  pub name: String,
  pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToyRow {
  pub id: i64,
  pub title: String,
  pub price: String,
  pub description: String,
  pub category_id: Option<i64>,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
  Photo,
  Video,
}

impl MediaType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Photo => "photo",
      Self::Video => "video",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "photo" | "image" => Some(Self::Photo),
      "video" => Some(Self::Video),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToyMediaRow {
  pub toy_id: i64,
  pub file_id: String,
  pub media_type: MediaType,
  pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderContactRow {
  pub id: i64,
  pub contact_value: String,
  pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreLocationRow {
  pub id: i64,
  pub name: String,
  pub address_text: String,
  pub latitude: String,
  pub longitude: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItemRow {
  pub toy_id: i64,
  pub toy_name: String,
  pub price: String,
  pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteRow {
  pub toy_id: i64,
  pub toy_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestsellerRow {
  pub category_id: i64,
  pub category_name: String,
  pub source: String,
  pub rank: i32,
}

/// Reporting window for sales stats and bestseller rankings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsPeriod {
  Weekly,
  Monthly,
  Yearly,
}

impl StatsPeriod {
  pub const ALL: [StatsPeriod; 3] = [Self::Weekly, Self::Monthly, Self::Yearly];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Weekly => "weekly",
      Self::Monthly => "monthly",
      Self::Yearly => "yearly",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "weekly" => Some(Self::Weekly),
      "monthly" => Some(Self::Monthly),
      "yearly" => Some(Self::Yearly),
      _ => None,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Self::Weekly => "This week",
      Self::Monthly => "This month",
      Self::Yearly => "This year",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::MediaType;
  use super::StatsPeriod;

  #[test]
  fn media_type_round_trips() {
    assert_eq!(MediaType::parse("photo"), Some(MediaType::Photo));
    assert_eq!(MediaType::parse("video"), Some(MediaType::Video));
    assert_eq!(MediaType::parse(MediaType::Photo.as_str()), Some(MediaType::Photo));
    assert_eq!(MediaType::parse("gif"), None);
  }

  #[test]
  fn legacy_image_media_type_still_parses() {
    assert_eq!(MediaType::parse("image"), Some(MediaType::Photo));
  }

  #[test]
  fn stats_period_parses_known_values() {
    for period in StatsPeriod::ALL {
      assert_eq!(StatsPeriod::parse(period.as_str()), Some(period));
    }
    assert_eq!(StatsPeriod::parse("daily"), None);
  }
}
