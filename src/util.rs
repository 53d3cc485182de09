use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static CONTACT_PATTERN: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(?:\+?\d{7,15}|@[A-Za-z0-9_]{5,32})$").expect("valid regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContactError {
  #[error("contact must be a phone number or a @username")]
  InvalidFormat,
}

/// Validate an order contact entry: a phone number (digits, optional leading
/// `+`) or a Telegram @username.
pub fn validate_contact(input: &str) -> Result<String, ContactError> {
  let trimmed = input.trim();
  if CONTACT_PATTERN.is_match(trimmed) {
    Ok(trimmed.to_string())
  } else {
    Err(ContactError::InvalidFormat)
  }
}

/// Parse "lat, lon" (or "lat lon") into coordinates suitable for
/// `send_location`.
pub fn parse_coordinates(input: &str) -> Option<(f64, f64)> {
  let mut parts = input.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty());
  let lat: f64 = parts.next()?.parse().ok()?;
  let lon: f64 = parts.next()?.parse().ok()?;
  if parts.next().is_some() {
    return None;
  }
  if !(-90.0 ..= 90.0).contains(&lat) || !(-180.0 ..= 180.0).contains(&lon) {
    return None;
  }
  Some((lat, lon))
}

/// Extract a numeric value from free-form price text ("15 000 so'm" -> 15000).
/// Returns None when the text carries no digits.
pub fn price_value(price: &str) -> Option<i64> {
  let digits: String = price.chars().filter(|c| c.is_ascii_digit()).collect();
  if digits.is_empty() {
    return None;
  }
  digits.parse().ok()
}

pub fn truncate_button_text(text: &str, max_chars: usize) -> String {
  if text.chars().count() <= max_chars {
    return text.to_string();
  }

  let guarded = max_chars.saturating_sub(3);
  if guarded == 0 {
    return "...".to_string();
  }

  let truncated: String = text.chars().take(guarded).collect();
  format!("{truncated}...")
}

/// Number of pages needed to show `total` items, `per_page` at a time.
pub fn page_count(total: u64, per_page: u32) -> u32 {
  if per_page == 0 {
    return 0;
  }
  total.div_ceil(per_page as u64) as u32
}

#[cfg(test)]
mod tests {
  use super::ContactError;
  use super::page_count;
  use super::parse_coordinates;
  use super::price_value;
  use super::truncate_button_text;
  use super::validate_contact;

  #[test]
  fn accepts_phone_and_username_contacts() {
    assert_eq!(validate_contact("+998901234567"), Ok("+998901234567".to_string()));
    assert_eq!(validate_contact(" 998901234567 "), Ok("998901234567".to_string()));
    assert_eq!(validate_contact("@toymix_orders"), Ok("@toymix_orders".to_string()));
  }

  #[test]
  fn rejects_malformed_contacts() {
    assert_eq!(validate_contact("not a phone"), Err(ContactError::InvalidFormat));
    assert_eq!(validate_contact("@abc"), Err(ContactError::InvalidFormat));
    assert_eq!(validate_contact("+12"), Err(ContactError::InvalidFormat));
  }

  #[test]
  fn parses_coordinate_pairs() {
    assert_eq!(parse_coordinates("40.25, 70.81"), Some((40.25, 70.81)));
    assert_eq!(parse_coordinates("40.25 70.81"), Some((40.25, 70.81)));
    assert_eq!(parse_coordinates("91.0, 70.0"), None);
    assert_eq!(parse_coordinates("40.0"), None);
    assert_eq!(parse_coordinates("40.0, 70.0, 1.0"), None);
  }

  #[test]
  fn extracts_price_digits() {
    assert_eq!(price_value("15 000 so'm"), Some(15_000));
    assert_eq!(price_value("12000"), Some(12_000));
    assert_eq!(price_value("call us"), None);
  }

  #[test]
  fn truncates_long_button_labels() {
    assert_eq!(truncate_button_text("short", 10), "short");
    assert_eq!(truncate_button_text("a very long label", 10), "a very ...");
  }

  #[test]
  fn computes_page_counts() {
    assert_eq!(page_count(0, 5), 0);
    assert_eq!(page_count(5, 5), 1);
    assert_eq!(page_count(6, 5), 2);
    assert_eq!(page_count(10, 0), 0);
  }
}
