//! Renders advertisement captions and call-to-action keyboards.

use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use url::Url;

use crate::config::StoreContacts;
use crate::models::CategoryRow;
use crate::models::ToyRow;

const UNCATEGORISED: &str = "Uncategorised";

pub fn html_escape(text: &str) -> String {
  text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Advertisement caption (HTML parse mode). Doubles as the caption on the
/// first item of a media album.
pub fn ad_caption(toy: &ToyRow, category: Option<&CategoryRow>, contacts: &StoreContacts) -> String {
  let category_name = category.map(|c| c.name.as_str()).unwrap_or(UNCATEGORISED);

  let mut text = format!(
    "✨ Fresh pick for the little ones!\n\n🧸 Category: <b>{}</b>\n📦 Toy: <b>{}</b>\n\n💰 Price: {}\n",
    html_escape(category_name),
    html_escape(&toy.title),
    html_escape(&toy.price),
  );

  if !toy.description.trim().is_empty() {
    text.push_str(&format!("\n{}\n", html_escape(toy.description.trim())));
  }

  text.push_str(&format!(
    "\n━━━━━━━━━━━━━━━\n🛒 To order:\n👉 Via bot: {}\n",
    html_escape(&contacts.bot_username)
  ));
  if !contacts.order_phone.is_empty() {
    text.push_str(&format!("📞 Phone: {}\n", html_escape(&contacts.order_phone)));
  }
  text.push_str(&format!("👥 Group: {}\n\n🎁 Make your kid's day!", html_escape(&contacts.group_link)));

  text
}

fn bot_deep_link(contacts: &StoreContacts, payload: &str) -> Option<Url> {
  let username = contacts.bot_username.trim_start_matches('@');
  Url::parse(&format!("https://t.me/{username}?start={payload}")).ok()
}

/// CTA keyboard under an ad: order deep link, group invite, catalog link.
/// Buttons whose configured link does not parse are dropped.
pub fn ad_keyboard(toy_id: i64, contacts: &StoreContacts) -> InlineKeyboardMarkup {
  let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();

  if let Some(order_url) = bot_deep_link(contacts, &format!("order_{toy_id}")) {
    rows.push(vec![InlineKeyboardButton::url("🛒 Order now", order_url)]);
  }

  let mut second = Vec::new();
  if let Ok(group_url) = Url::parse(&contacts.group_link) {
    second.push(InlineKeyboardButton::url("👥 Join the group", group_url));
  }
  if let Some(catalog_url) = bot_deep_link(contacts, "catalog") {
    second.push(InlineKeyboardButton::url("📦 Browse catalog", catalog_url));
  }
  if !second.is_empty() {
    rows.push(second);
  }

  InlineKeyboardMarkup::new(rows)
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::ad_caption;
  use super::ad_keyboard;
  use super::html_escape;
  use crate::config::StoreContacts;
  use crate::models::CategoryRow;
  use crate::models::ToyRow;

  fn contacts() -> StoreContacts {
    StoreContacts {
      bot_username: "@ToymixBot".to_string(),
      group_link: "https://t.me/toymix".to_string(),
      order_phone: "+998901234567".to_string(),
    }
  }

  fn toy(title: &str) -> ToyRow {
    ToyRow {
      id: 7,
      title: title.to_string(),
      price: "15 000".to_string(),
      description: "Soft & cuddly".to_string(),
      category_id: Some(1),
      is_active: true,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn escapes_html_metacharacters() {
    assert_eq!(html_escape("a <b> & c"), "a &lt;b&gt; &amp; c");
  }

  #[test]
  fn caption_carries_toy_and_category() {
    let category = CategoryRow {
      id: 1,
      name: "Plush".to_string(),
      is_active: true,
    };
    let caption = ad_caption(&toy("Bear <XL>"), Some(&category), &contacts());
    assert!(caption.contains("<b>Plush</b>"));
    assert!(caption.contains("Bear &lt;XL&gt;"));
    assert!(caption.contains("15 000"));
    assert!(caption.contains("+998901234567"));
  }

  #[test]
  fn caption_without_category_says_uncategorised() {
    let caption = ad_caption(&toy("Bear"), None, &contacts());
    assert!(caption.contains("Uncategorised"));
  }

  #[test]
  fn keyboard_has_order_and_link_rows() {
    let keyboard = ad_keyboard(7, &contacts());
    assert_eq!(keyboard.inline_keyboard.len(), 2);
    assert_eq!(keyboard.inline_keyboard[1].len(), 2);
  }

  #[test]
  fn unparseable_group_link_drops_the_button() {
    let mut broken = contacts();
    broken.group_link = "not a url".to_string();
    let keyboard = ad_keyboard(7, &broken);
    // order row plus the catalog-only row
    assert_eq!(keyboard.inline_keyboard.len(), 2);
    assert_eq!(keyboard.inline_keyboard[1].len(), 1);
  }
}
