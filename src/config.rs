use std::env;

use anyhow::Context;
use anyhow::Result;

/// Ad posting window and spacing, consumed by the slot planner.
#[derive(Debug, Clone, Copy)]
pub struct AdsConfig {
  pub daily_count: u32,
  pub start_hour: u8,
  pub end_hour: u8,
  pub min_interval_minutes: u32,
  pub max_interval_minutes: u32,
  /// Negative ids are group chats; 0 disables posting entirely.
  pub group_chat_id: i64,
}

/// Storefront contact details rendered into ads and the About screen.
#[derive(Debug, Clone)]
pub struct StoreContacts {
  pub bot_username: String,
  pub group_link: String,
  pub order_phone: String,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub database_url: String,
  pub admins: Vec<i64>,
  pub ads: AdsConfig,
  pub contacts: StoreContacts,
  pub items_per_page: u32,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let bot_token = env::var("BOT_TOKEN")
      .or_else(|_| env::var("TELOXIDE_TOKEN"))
      .context("BOT_TOKEN or TELOXIDE_TOKEN must be set")?;
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let admins = parse_id_list(&env::var("ADMIN_IDS").unwrap_or_default());

    let ads = AdsConfig {
      daily_count: int_env("DAILY_AD_COUNT", 15),
      start_hour: int_env("AD_START_HOUR", 9),
      end_hour: int_env("AD_END_HOUR", 21),
      min_interval_minutes: int_env("AD_MIN_INTERVAL", 30),
      max_interval_minutes: int_env("AD_MAX_INTERVAL", 90),
      group_chat_id: int_env("GROUP_CHAT_ID", 0),
    };

    let contacts = StoreContacts {
      bot_username: env::var("BOT_USERNAME").unwrap_or_else(|_| "@ToymixBot".to_string()),
      group_link: env::var("GROUP_LINK").unwrap_or_else(|_| "https://t.me/toymix".to_string()),
      order_phone: env::var("ORDER_PHONE").unwrap_or_default(),
    };

    Ok(Self {
      bot_token,
      database_url,
      admins,
      ads,
      contacts,
      items_per_page: int_env("ITEMS_PER_PAGE", 5),
    })
  }
}

fn int_env<T>(key: &str, default: T) -> T
where
  T: std::str::FromStr + Copy,
{
  match env::var(key) {
    Ok(raw) => match raw.trim().parse() {
      Ok(value) => value,
      Err(_) => {
        tracing::warn!(key, value = raw.as_str(), "invalid integer env value, using default");
        default
      },
    },
    Err(_) => default,
  }
}

fn parse_id_list(raw: &str) -> Vec<i64> {
  raw
    .split(',')
    .filter_map(|id| {
      let trimmed = id.trim();
      if trimmed.is_empty() {
        return None;
      }
      match trimmed.parse::<i64>() {
        Ok(value) => Some(value),
        Err(err) => {
          tracing::warn!(value = trimmed, error = %err, "invalid ADMIN_IDS entry");
          None
        },
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::parse_id_list;

  #[test]
  fn parses_valid_admin_ids() {
    let admins = parse_id_list("1, 2 ,3");
    assert_eq!(admins, vec![1, 2, 3]);
  }

  #[test]
  fn skips_invalid_entries() {
    let admins = parse_id_list("42,abc,  7");
    assert_eq!(admins, vec![42, 7]);
  }

  #[test]
  fn empty_input_yields_empty_list() {
    let admins = parse_id_list("");
    assert!(admins.is_empty());
  }
}
