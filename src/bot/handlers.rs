use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use teloxide::ApiError;
use teloxide::RequestError;
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::Dialogue;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::types::ChatId;
use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::types::InputFile;
use teloxide::types::InputMedia;
use teloxide::types::InputMediaPhoto;
use teloxide::types::InputMediaVideo;
use teloxide::types::Message;
use teloxide::types::MessageId;
use teloxide::types::ParseMode;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::ads::format::html_escape;
use crate::bot::Command;
use crate::bot::DialogueStorage;
use crate::bot::HandlerResult;
use crate::bot::context::AppContext;
use crate::bot::state::AddToyDraft;
use crate::bot::state::ConversationState;
use crate::bot::state::LocationDraft;
use crate::bot::state::LocationStage;
use crate::bot::state::MediaDraft;
use crate::bot::state::ToyDraftStage;
use crate::models::CategoryRow;
use crate::models::MediaType;
use crate::models::StatsPeriod;
use crate::models::ToyMediaRow;
use crate::models::ToyRow;
use crate::util::page_count;
use crate::util::parse_coordinates;
use crate::util::price_value;
use crate::util::truncate_button_text;
use crate::util::validate_contact;

type SharedContext = Arc<AppContext>;
type BotDialogue = Dialogue<ConversationState, DialogueStorage>;

const MAIN_MENU_TEXT: &str = "🧸 Welcome to the toy store! What would you like to do?";
const MEDIA_GROUP_BATCH: usize = 10;
const BESTSELLER_LIMIT: i64 = 5;

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .enter_dialogue::<Message, DialogueStorage, ConversationState>()
    .branch(command_branch())
    .branch(dptree::case![ConversationState::AddToy(draft)].endpoint(handle_add_toy_message))
    .branch(dptree::case![ConversationState::AddCategory { admin_tg_id }].endpoint(handle_add_category_message))
    .branch(
      dptree::case![ConversationState::RenameCategory { admin_tg_id, category_id }]
        .endpoint(handle_rename_category_message),
    )
    .branch(dptree::case![ConversationState::ToggleToy { admin_tg_id }].endpoint(handle_toggle_toy_message))
    .branch(dptree::case![ConversationState::AddContact { admin_tg_id }].endpoint(handle_add_contact_message))
    .branch(dptree::case![ConversationState::AddLocation(draft)].endpoint(handle_add_location_message))
    .branch(dptree::case![ConversationState::ManualAd { admin_tg_id }].endpoint(handle_manual_ad_message))
    .branch(
      dptree::case![ConversationState::ManualBestseller { admin_tg_id }].endpoint(handle_manual_bestseller_message),
    )
    .branch(dptree::endpoint(handle_idle_text));

  let callback_handler = Update::filter_callback_query()
    .enter_dialogue::<CallbackQuery, DialogueStorage, ConversationState>()
    .endpoint(handle_callback_query);

  dptree::entry().branch(message_handler).branch(callback_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start].endpoint(handle_start))
    .branch(dptree::case![Command::Help].endpoint(handle_help))
    .branch(dptree::case![Command::Admin].endpoint(handle_admin))
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_start(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  dialogue.reset().await?;
  let user = msg.from.as_ref().context("message missing sender")?;
  ensure_user_record(&ctx, user).await?;
  let user_id = user.id.0 as i64;
  let username = user.username.as_deref().unwrap_or("-");
  info!(user_id, chat_id = %msg.chat.id, username, "received /start command");

  // Ads carry deep links like `/start order_12` and `/start catalog`.
  let payload = msg
    .text()
    .and_then(|text| text.strip_prefix("/start"))
    .map(str::trim)
    .filter(|payload| !payload.is_empty());

  match payload {
    Some("catalog") => {
      send_catalogue_message(&bot, &ctx, msg.chat.id).await?;
      return Ok(());
    },
    Some(value) => {
      if let Some(toy_id) = value.strip_prefix("order_").and_then(|raw| raw.parse::<i64>().ok()) {
        if let Some(toy) = ctx.db().get_toy(toy_id).await? {
          order_toy(&bot, &ctx, msg.chat.id, user_id, &toy).await?;
        } else {
          bot.send_message(msg.chat.id, "❓ That toy is no longer available.").await?;
        }
        return Ok(());
      }
      info!(user_id, payload = value, "ignoring unknown start payload");
    },
    None => {},
  }

  send_main_menu_message(&bot, &ctx, msg.chat.id, user_id).await
}

#[instrument(skip(bot, msg))]
async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /help command");
  let mut text = Command::descriptions().to_string();
  text.push_str("\n\nBrowse toys, manage your cart, and place orders from the on-screen menu. Use /start to open it.");
  bot.send_message(msg.chat.id, text).await?;
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_admin(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  dialogue.reset().await?;
  let user = msg.from.as_ref().context("message missing sender")?;
  let user_id = user.id.0 as i64;
  if !ctx.is_admin(user_id) {
    info!(user_id, chat_id = %msg.chat.id, "non-admin tried /admin");
    bot.send_message(msg.chat.id, "🛡️ Admins only.").await?;
    return Ok(());
  }
  info!(user_id, chat_id = %msg.chat.id, "received /admin command");
  bot
    .send_message(msg.chat.id, "🛡️ Admin panel\n\nChoose an action:")
    .reply_markup(admin_menu_keyboard())
    .await?;
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn send_main_menu_message(bot: &Bot, ctx: &SharedContext, chat: ChatId, user_id: i64) -> HandlerResult {
  bot
    .send_message(chat, MAIN_MENU_TEXT)
    .reply_markup(main_menu_keyboard(ctx, user_id))
    .await?;
  info!(user_id, chat_id = %chat, "sent main menu message");
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_main_menu(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
  user_id: i64,
) -> HandlerResult {
  let keyboard = main_menu_keyboard(ctx, user_id);
  let request = bot
    .edit_message_text(chat, message_id, MAIN_MENU_TEXT)
    .reply_markup(keyboard);
  match request.await {
    Ok(_) => info!(user_id, chat_id = %chat, message_id = %message_id, "updated main menu message"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(user_id, chat_id = %chat, message_id = %message_id, "main menu message already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

fn main_menu_keyboard(ctx: &SharedContext, user_id: i64) -> InlineKeyboardMarkup {
  let mut rows = vec![vec![InlineKeyboardButton::callback(
    "🗂️ Catalogue",
    "menu:catalogue".to_string(),
  )]];

  rows.push(vec![
    InlineKeyboardButton::callback("🛒 My cart", "menu:cart".to_string()),
    InlineKeyboardButton::callback("⭐ My favorites", "menu:favorites".to_string()),
  ]);

  rows.push(vec![
    InlineKeyboardButton::callback("🏆 Bestsellers", "menu:bestsellers".to_string()),
    InlineKeyboardButton::callback("📍 Store locations", "menu:locations".to_string()),
  ]);

  rows.push(vec![InlineKeyboardButton::callback(
    "ℹ️ About & contacts",
    "menu:about".to_string(),
  )]);

  if ctx.is_admin(user_id) {
    rows.push(vec![InlineKeyboardButton::callback(
      "🛡️ Admin panel",
      "menu:admin".to_string(),
    )]);
  }

  InlineKeyboardMarkup::new(rows)
}

fn admin_menu_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![
    vec![
      InlineKeyboardButton::callback("🧸 Add toy", "admin:add_toy".to_string()),
      InlineKeyboardButton::callback("🔁 Toggle toy", "admin:toggle_toy".to_string()),
    ],
    vec![
      InlineKeyboardButton::callback("🆕 Add category", "admin:add_category".to_string()),
      InlineKeyboardButton::callback("🗂 Categories", "admin:categories".to_string()),
    ],
    vec![
      InlineKeyboardButton::callback("📞 Order contacts", "admin:contacts".to_string()),
      InlineKeyboardButton::callback("📍 Locations", "admin:locations".to_string()),
    ],
    vec![
      InlineKeyboardButton::callback("📣 Post ad now", "admin:manual_ad".to_string()),
      InlineKeyboardButton::callback("📊 Ads status", "admin:ads_status".to_string()),
    ],
    vec![
      InlineKeyboardButton::callback("📈 Sales stats", "admin:stats".to_string()),
      InlineKeyboardButton::callback("🏆 Refresh bestsellers", "admin:refresh_best".to_string()),
    ],
    vec![InlineKeyboardButton::callback(
      "⭐ Pin bestseller",
      "admin:add_best".to_string(),
    )],
    vec![InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string())],
  ])
}

fn main_menu_only_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
    "⬅️ Main menu",
    "menu:root".to_string(),
  )]])
}

#[instrument(skip(bot))]
async fn show_admin_menu(bot: &Bot, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let request = bot
    .edit_message_text(chat, message_id, "🛡️ Admin panel\n\nChoose an action:")
    .reply_markup(admin_menu_keyboard());
  match request.await {
    Ok(_) => info!(chat_id = %chat, message_id = %message_id, "updated admin menu"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(chat_id = %chat, message_id = %message_id, "admin menu already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

// --- catalogue ---

fn build_categories_keyboard(categories: &[CategoryRow]) -> InlineKeyboardMarkup {
  let mut rows = categories
    .chunks(2)
    .map(|row| {
      row
        .iter()
        .map(|category| InlineKeyboardButton::callback(category.name.clone(), format!("cat:{}:0", category.id)))
        .collect::<Vec<_>>()
    })
    .collect::<Vec<_>>();

  rows.push(vec![InlineKeyboardButton::callback(
    "⬅️ Main menu",
    "menu:root".to_string(),
  )]);

  InlineKeyboardMarkup::new(rows)
}

#[instrument(skip(bot, ctx))]
async fn send_catalogue_message(bot: &Bot, ctx: &SharedContext, chat: ChatId) -> HandlerResult {
  let categories = ctx.db().list_categories(true).await?;
  if categories.is_empty() {
    bot.send_message(chat, "🗂️ No categories yet. Check back soon.").await?;
  } else {
    bot
      .send_message(chat, "🗂️ Choose a category:")
      .reply_markup(build_categories_keyboard(&categories))
      .await?;
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn update_categories_menu(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
) -> HandlerResult {
  let categories = ctx.db().list_categories(true).await?;
  let (text, keyboard) = if categories.is_empty() {
    (
      "🗂️ No categories yet. Check back soon.".to_string(),
      main_menu_only_keyboard(),
    )
  } else {
    ("🗂️ Choose a category:".to_string(), build_categories_keyboard(&categories))
  };
  let request = bot.edit_message_text(chat, message_id, text).reply_markup(keyboard);
  match request.await {
    Ok(_) => info!(chat_id = %chat, message_id = %message_id, count = categories.len(), "rendered categories menu"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(chat_id = %chat, message_id = %message_id, "categories menu already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_toys_page(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
  category_id: i64,
  page: u32,
) -> HandlerResult {
  let Some(category) = ctx.db().get_category(category_id).await? else {
    bot
      .edit_message_text(chat, message_id, "❓ Category not found.")
      .reply_markup(main_menu_only_keyboard())
      .await?;
    return Ok(());
  };

  let per_page = ctx.items_per_page();
  let total = ctx.db().count_active_toys(category_id).await? as u64;
  let pages = page_count(total, per_page);
  let page = if pages == 0 { 0 } else { page.min(pages - 1) };
  let offset = i64::from(page) * i64::from(per_page);
  let toys = ctx.db().list_active_toys_page(category_id, i64::from(per_page), offset).await?;

  let text = if toys.is_empty() {
    format!("🗂️ {}\n📭 No toys in this category yet.", category.name)
  } else {
    format!(
      "🗂️ {}\n🧸 Page {} of {} — pick a toy:",
      category.name,
      page + 1,
      pages.max(1)
    )
  };

  let mut rows: Vec<Vec<InlineKeyboardButton>> = toys
    .iter()
    .map(|toy| {
      let label = truncate_button_text(&format!("{} — {}", toy.title, toy.price), 48);
      vec![InlineKeyboardButton::callback(label, format!("toy:{}", toy.id))]
    })
    .collect();

  let mut nav = Vec::new();
  if page > 0 {
    nav.push(InlineKeyboardButton::callback(
      "◀️ Prev",
      format!("cat:{category_id}:{}", page - 1),
    ));
  }
  if page + 1 < pages {
    nav.push(InlineKeyboardButton::callback(
      "Next ▶️",
      format!("cat:{category_id}:{}", page + 1),
    ));
  }
  if !nav.is_empty() {
    rows.push(nav);
  }
  rows.push(vec![
    InlineKeyboardButton::callback("⬅️ Categories", "menu:catalogue".to_string()),
    InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string()),
  ]);

  let request = bot
    .edit_message_text(chat, message_id, text)
    .reply_markup(InlineKeyboardMarkup::new(rows));
  match request.await {
    Ok(_) => info!(category_id, page, chat_id = %chat, "rendered toys page"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(category_id, page, chat_id = %chat, "toys page already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

fn render_toy_card(toy: &ToyRow, category_name: Option<&str>, is_favorite: bool) -> String {
  let mut text = format!("🧸 <b>{}</b>\n💰 Price: {}", html_escape(&toy.title), html_escape(&toy.price));

  if let Some(name) = category_name {
    text.push_str(&format!("\n🗂 Category: {}", html_escape(name)));
  }

  if !toy.description.trim().is_empty() {
    text.push_str(&format!("\n\n{}", html_escape(toy.description.trim())));
  }

  if is_favorite {
    text.push_str("\n\n⭐ Saved to favorites");
  }

  text
}

fn toy_action_keyboard(toy_id: i64, is_favorite: bool) -> InlineKeyboardMarkup {
  let (fav_label, fav_action) = if is_favorite {
    ("❌ Remove favorite", "fav:remove")
  } else {
    ("⭐ Add favorite", "fav:add")
  };

  InlineKeyboardMarkup::new(vec![
    vec![
      InlineKeyboardButton::callback("🛍 Order", format!("toyact:order:{toy_id}")),
      InlineKeyboardButton::callback("🛒 Add to cart", format!("toyact:cart:{toy_id}")),
    ],
    vec![InlineKeyboardButton::callback(
      fav_label.to_string(),
      format!("{fav_action}:{toy_id}"),
    )],
    vec![InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string())],
  ])
}

/// Sends a toy card: media albums first, then the caption with the action
/// keyboard. Returns false when the toy is missing or inactive.
#[instrument(skip(bot, ctx))]
async fn send_toy_card(bot: &Bot, ctx: &SharedContext, chat: ChatId, toy_id: i64, viewer_id: i64) -> Result<bool> {
  let Some(toy) = ctx.db().get_toy(toy_id).await? else {
    return Ok(false);
  };
  if !toy.is_active {
    return Ok(false);
  }

  let category_name = match toy.category_id {
    Some(category_id) => ctx.db().get_category(category_id).await?.map(|c| c.name),
    None => None,
  };
  let is_favorite = ctx.db().is_favorite(viewer_id, toy_id).await?;

  let media = ctx.db().list_toy_media(toy_id).await?;
  for batch in media.chunks(MEDIA_GROUP_BATCH) {
    send_media_batch(bot, chat, batch).await?;
  }

  let text = render_toy_card(&toy, category_name.as_deref(), is_favorite);
  bot
    .send_message(chat, text)
    .parse_mode(ParseMode::Html)
    .reply_markup(toy_action_keyboard(toy.id, is_favorite))
    .await?;

  Ok(true)
}

async fn send_media_batch(bot: &Bot, chat: ChatId, batch: &[ToyMediaRow]) -> Result<()> {
  match batch {
    [] => Ok(()),
    [single] => {
      let file = InputFile::file_id(single.file_id.clone().into());
      match single.media_type {
        MediaType::Photo => {
          bot.send_photo(chat, file).await?;
        },
        MediaType::Video => {
          bot.send_video(chat, file).await?;
        },
      }
      Ok(())
    },
    many => {
      let group: Vec<InputMedia> = many
        .iter()
        .map(|item| {
          let file = InputFile::file_id(item.file_id.clone().into());
          match item.media_type {
            MediaType::Photo => InputMedia::Photo(InputMediaPhoto::new(file)),
            MediaType::Video => InputMedia::Video(InputMediaVideo::new(file)),
          }
        })
        .collect();
      bot.send_media_group(chat, group).await?;
      Ok(())
    },
  }
}

// --- orders ---

async fn contacts_text(ctx: &SharedContext) -> Result<String> {
  let contacts = ctx.db().list_contacts(true).await?;
  let store = ctx.contacts();

  let mut text = String::from("📞 To complete your order, reach us at:\n");
  if !store.order_phone.is_empty() {
    text.push_str(&format!("• {}\n", store.order_phone));
  }
  for contact in contacts {
    text.push_str(&format!("• {}\n", contact.contact_value));
  }
  if !store.group_link.is_empty() {
    text.push_str(&format!("\n👥 Group: {}", store.group_link));
  }
  Ok(text)
}

#[instrument(skip(bot, ctx, toy))]
async fn order_toy(bot: &Bot, ctx: &SharedContext, chat: ChatId, user_id: i64, toy: &ToyRow) -> HandlerResult {
  let category = match toy.category_id {
    Some(category_id) => ctx.db().get_category(category_id).await?,
    None => None,
  };
  ctx
    .db()
    .log_sale_lead(
      user_id,
      toy.id,
      &toy.title,
      category.as_ref().map(|c| c.id),
      category.as_ref().map(|c| c.name.as_str()),
    )
    .await?;
  info!(user_id, toy_id = toy.id, "logged sales lead");

  let mut text = format!("✅ Order request noted: {} ({}).\n\n", toy.title, toy.price);
  text.push_str(&contacts_text(ctx).await?);
  bot.send_message(chat, text).await?;
  Ok(())
}

// --- cart ---

#[instrument(skip(bot, ctx))]
async fn show_cart(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId, user_id: i64) -> HandlerResult {
  let items = ctx.db().list_cart(user_id).await?;

  let (text, keyboard) = if items.is_empty() {
    ("🛒 Your cart is empty.".to_string(), main_menu_only_keyboard())
  } else {
    let mut text = String::from("🛒 Your cart:\n\n");
    let mut total: Option<i64> = Some(0);
    for item in &items {
      text.push_str(&format!("• {} × {} — {}\n", item.toy_name, item.quantity, item.price));
      total = match (total, price_value(&item.price)) {
        (Some(sum), Some(value)) => Some(sum + value * i64::from(item.quantity)),
        _ => None,
      };
    }
    if let Some(total) = total {
      text.push_str(&format!("\n💰 Total: {total}"));
    }

    let mut rows: Vec<Vec<InlineKeyboardButton>> = items
      .iter()
      .map(|item| {
        vec![
          InlineKeyboardButton::callback("➖", format!("cart:dec:{}", item.toy_id)),
          InlineKeyboardButton::callback(
            truncate_button_text(&format!("{} ({})", item.toy_name, item.quantity), 32),
            format!("cart:rm:{}", item.toy_id),
          ),
          InlineKeyboardButton::callback("➕", format!("cart:inc:{}", item.toy_id)),
        ]
      })
      .collect();
    rows.push(vec![
      InlineKeyboardButton::callback("🗑 Clear", "cart:clear:0".to_string()),
      InlineKeyboardButton::callback("✅ Checkout", "cart:checkout:0".to_string()),
    ]);
    rows.push(vec![InlineKeyboardButton::callback(
      "⬅️ Main menu",
      "menu:root".to_string(),
    )]);
    (text, InlineKeyboardMarkup::new(rows))
  };

  let request = bot.edit_message_text(chat, message_id, text).reply_markup(keyboard);
  match request.await {
    Ok(_) => info!(user_id, chat_id = %chat, "rendered cart"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn checkout_cart(bot: &Bot, ctx: &SharedContext, chat: ChatId, user_id: i64) -> HandlerResult {
  let items = ctx.db().list_cart(user_id).await?;
  if items.is_empty() {
    bot.send_message(chat, "🛒 Your cart is empty.").await?;
    return Ok(());
  }

  for item in &items {
    let (category_id, category_name) = match ctx.db().get_toy(item.toy_id).await? {
      Some(toy) => match toy.category_id {
        Some(id) => {
          let category = ctx.db().get_category(id).await?;
          (Some(id), category.map(|c| c.name))
        },
        None => (None, None),
      },
      None => (None, None),
    };
    ctx
      .db()
      .log_sale_lead(user_id, item.toy_id, &item.toy_name, category_id, category_name.as_deref())
      .await?;
  }
  info!(user_id, items = items.len(), "logged checkout leads");

  let mut text = format!("✅ Order request noted for {} item(s).\n\n", items.len());
  text.push_str(&contacts_text(ctx).await?);
  bot.send_message(chat, text).await?;
  Ok(())
}

// --- favorites ---

#[instrument(skip(bot, ctx))]
async fn send_favorites_list(bot: &Bot, ctx: &SharedContext, chat: ChatId, user_id: i64) -> HandlerResult {
  let favorites = ctx.db().list_favorites(user_id).await?;

  if favorites.is_empty() {
    info!(user_id, chat_id = %chat, "no favorites to display");
    bot.send_message(chat, "⭐ No favorites yet.").await?;
    return Ok(());
  }

  info!(user_id, chat_id = %chat, count = favorites.len(), "sending favorites list");
  bot
    .send_message(chat, format!("⭐ Favorites ({}):", favorites.len()))
    .await?;

  for favorite in favorites {
    if !send_toy_card(bot, ctx, chat, favorite.toy_id, user_id).await? {
      warn!(toy_id = favorite.toy_id, "favorite toy missing while rendering");
    }
  }

  Ok(())
}

// --- bestsellers ---

#[instrument(skip(bot, ctx))]
async fn show_bestsellers(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
  period: StatsPeriod,
) -> HandlerResult {
  let rows = ctx.db().list_bestsellers(period, BESTSELLER_LIMIT).await?;

  let text = if rows.is_empty() {
    format!("🏆 Bestsellers — {}\n\nNo data yet.", period.label())
  } else {
    let mut text = format!("🏆 Bestsellers — {}\n\n", period.label());
    for row in &rows {
      text.push_str(&format!("{}. {}\n", row.rank, row.category_name));
    }
    text
  };

  let period_row = StatsPeriod::ALL
    .iter()
    .map(|p| {
      let label = if *p == period {
        format!("• {} •", p.label())
      } else {
        p.label().to_string()
      };
      InlineKeyboardButton::callback(label, format!("best:{}", p.as_str()))
    })
    .collect::<Vec<_>>();
  let keyboard = InlineKeyboardMarkup::new(vec![
    period_row,
    vec![InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string())],
  ]);

  let request = bot.edit_message_text(chat, message_id, text).reply_markup(keyboard);
  match request.await {
    Ok(_) => info!(period = period.as_str(), chat_id = %chat, "rendered bestsellers"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

// --- locations & about ---

#[instrument(skip(bot, ctx))]
async fn send_locations(bot: &Bot, ctx: &SharedContext, chat: ChatId) -> HandlerResult {
  let locations = ctx.db().list_active_locations().await?;
  if locations.is_empty() {
    bot.send_message(chat, "📍 No store locations published yet.").await?;
    return Ok(());
  }

  for location in locations {
    bot
      .send_message(chat, format!("📍 {}\n{}", location.name, location.address_text))
      .await?;
    match (location.latitude.parse::<f64>(), location.longitude.parse::<f64>()) {
      (Ok(latitude), Ok(longitude)) => {
        bot.send_location(chat, latitude, longitude).await?;
      },
      _ => {
        warn!(location_id = location.id, "stored coordinates do not parse, skipping pin");
      },
    }
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn send_about(bot: &Bot, ctx: &SharedContext, chat: ChatId) -> HandlerResult {
  let mut text = String::from("🧸 Toy store\n\n");
  text.push_str(&contacts_text(ctx).await?);
  bot.send_message(chat, text).await?;
  Ok(())
}

// --- admin screens ---

#[instrument(skip(bot, ctx))]
async fn show_ads_status(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let config = ctx.ads_config();
  let scheduler = ctx.scheduler();
  let posted_today = ctx.ads().today_posted_count().await?;

  let status = if scheduler.is_running() { "running" } else { "stopped" };
  let text = format!(
    "📊 Ads status\n\nScheduler: {status}\nSlots registered today: {}\nPosted today: {posted_today}\nWindow: \
     {:02}:00–{:02}:00, {}–{} min apart, {} per day",
    scheduler.ad_slot_count(),
    config.start_hour,
    config.end_hour,
    config.min_interval_minutes,
    config.max_interval_minutes,
    config.daily_count,
  );

  let request = bot
    .edit_message_text(chat, message_id, text)
    .reply_markup(admin_menu_keyboard());
  match request.await {
    Ok(_) => info!(chat_id = %chat, "rendered ads status"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_sales_stats(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let mut text = String::from("📈 Sales leads per category\n");
  for period in StatsPeriod::ALL {
    text.push_str(&format!("\n{}:\n", period.label()));
    let stats = ctx.db().category_stats(period).await?;
    if stats.is_empty() {
      text.push_str("  no leads\n");
    }
    for (name, count) in stats.into_iter().take(10) {
      text.push_str(&format!("  {name}: {count}\n"));
    }
  }

  let request = bot
    .edit_message_text(chat, message_id, text)
    .reply_markup(admin_menu_keyboard());
  match request.await {
    Ok(_) => info!(chat_id = %chat, "rendered sales stats"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

fn build_admin_categories_keyboard(categories: &[CategoryRow]) -> InlineKeyboardMarkup {
  let mut rows = categories
    .chunks(2)
    .map(|row| {
      row
        .iter()
        .map(|category| {
          let marker = if category.is_active { "" } else { "🚫 " };
          InlineKeyboardButton::callback(format!("{marker}{}", category.name), format!("catadm:pick:{}", category.id))
        })
        .collect::<Vec<_>>()
    })
    .collect::<Vec<_>>();

  rows.push(vec![
    InlineKeyboardButton::callback("➕ New category", "admin:add_category".to_string()),
    InlineKeyboardButton::callback("⬅️ Admin panel", "menu:admin".to_string()),
  ]);
  InlineKeyboardMarkup::new(rows)
}

#[instrument(skip(bot, ctx))]
async fn show_admin_categories(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let categories = ctx.db().list_categories(false).await?;
  let text = if categories.is_empty() {
    "🗂 No categories yet."
  } else {
    "🗂 Categories (tap to manage):"
  };
  let request = bot
    .edit_message_text(chat, message_id, text)
    .reply_markup(build_admin_categories_keyboard(&categories));
  match request.await {
    Ok(_) => info!(chat_id = %chat, count = categories.len(), "rendered admin categories"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_admin_category(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
  category_id: i64,
) -> HandlerResult {
  let Some(category) = ctx.db().get_category(category_id).await? else {
    bot.edit_message_text(chat, message_id, "❓ Category not found.").await?;
    return Ok(());
  };

  let toggle_label = if category.is_active {
    "🚫 Deactivate"
  } else {
    "✅ Activate"
  };
  let keyboard = InlineKeyboardMarkup::new(vec![
    vec![
      InlineKeyboardButton::callback("✏️ Rename", format!("catadm:rename:{category_id}")),
      InlineKeyboardButton::callback(toggle_label.to_string(), format!("catadm:toggle:{category_id}")),
    ],
    vec![InlineKeyboardButton::callback(
      "⬅️ Categories",
      "admin:categories".to_string(),
    )],
  ]);

  let status = if category.is_active { "active" } else { "inactive" };
  let request = bot
    .edit_message_text(
      chat,
      message_id,
      format!("🗂 {} (#{}) — {status}", category.name, category.id),
    )
    .reply_markup(keyboard);
  match request.await {
    Ok(_) => info!(category_id, chat_id = %chat, "rendered admin category card"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_admin_contacts(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let contacts = ctx.db().list_contacts(false).await?;

  let mut rows: Vec<Vec<InlineKeyboardButton>> = contacts
    .iter()
    .map(|contact| {
      let (marker, target) = if contact.is_active { ("🟢", "off") } else { ("⚪", "on") };
      vec![InlineKeyboardButton::callback(
        format!("{marker} {}", contact.contact_value),
        format!("contact:{target}:{}", contact.id),
      )]
    })
    .collect();
  rows.push(vec![
    InlineKeyboardButton::callback("➕ Add contact", "admin:add_contact".to_string()),
    InlineKeyboardButton::callback("⬅️ Admin panel", "menu:admin".to_string()),
  ]);

  let text = if contacts.is_empty() {
    "📞 No order contacts yet."
  } else {
    "📞 Order contacts (tap to toggle):"
  };
  let request = bot
    .edit_message_text(chat, message_id, text)
    .reply_markup(InlineKeyboardMarkup::new(rows));
  match request.await {
    Ok(_) => info!(chat_id = %chat, count = contacts.len(), "rendered admin contacts"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_admin_locations(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let locations = ctx.db().list_active_locations().await?;

  let mut rows: Vec<Vec<InlineKeyboardButton>> = locations
    .iter()
    .map(|location| {
      vec![InlineKeyboardButton::callback(
        truncate_button_text(&format!("🚫 {}", location.name), 48),
        format!("loc:off:{}", location.id),
      )]
    })
    .collect();
  rows.push(vec![
    InlineKeyboardButton::callback("➕ Add location", "admin:add_location".to_string()),
    InlineKeyboardButton::callback("⬅️ Admin panel", "menu:admin".to_string()),
  ]);

  let text = if locations.is_empty() {
    "📍 No active locations."
  } else {
    "📍 Locations (tap to deactivate):"
  };
  let request = bot
    .edit_message_text(chat, message_id, text)
    .reply_markup(InlineKeyboardMarkup::new(rows));
  match request.await {
    Ok(_) => info!(chat_id = %chat, count = locations.len(), "rendered admin locations"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

// --- dialogue message handlers ---

#[instrument(skip(bot, ctx, dialogue, msg, draft))]
async fn handle_add_toy_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  mut draft: AddToyDraft,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != draft.admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this toy creation can respond.")
      .await?;
    return Ok(());
  }
  let chat_id = msg.chat.id;

  let mut added_media = false;
  if draft.stage == ToyDraftStage::Media {
    if let Some(photo) = msg.photo().and_then(|photos| photos.last()) {
      let file_id = photo.file.id.to_string();
      if !draft.media.iter().any(|existing| existing.file_id == file_id) {
        draft.media.push(MediaDraft {
          file_id,
          media_type: MediaType::Photo,
        });
        added_media = true;
      }
    }
    if let Some(video) = msg.video() {
      let file_id = video.file.id.to_string();
      if !draft.media.iter().any(|existing| existing.file_id == file_id) {
        draft.media.push(MediaDraft {
          file_id,
          media_type: MediaType::Video,
        });
        added_media = true;
      }
    }
  }

  let text = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty());
  info!(
    admin_tg_id = draft.admin_tg_id,
    chat_id = %chat_id,
    stage = ?draft.stage,
    "handling add toy input"
  );

  if text.is_none() {
    dialogue.update(ConversationState::AddToy(draft.clone())).await?;
    if added_media {
      bot
        .send_message(
          chat_id,
          format!("🖼️ Added media. Total uploaded: {}. Send more or type done.", draft.media.len()),
        )
        .await?;
    }
    return Ok(());
  }

  if matches!(text, Some(value) if value.eq_ignore_ascii_case("cancel")) {
    dialogue.reset().await?;
    bot.send_message(chat_id, "❌ Toy creation cancelled.").await?;
    return Ok(());
  }

  match draft.stage {
    ToyDraftStage::Category => {
      let Some(name) = text else {
        bot.send_message(chat_id, "🗂️ Please provide a category name.").await?;
        return Ok(());
      };
      let (category, _) = ensure_category(&ctx, name).await?;
      draft.category_id = Some(category.id);
      draft.category_name = Some(category.name);
      draft.stage = ToyDraftStage::Title;
      dialogue.update(ConversationState::AddToy(draft)).await?;
      bot.send_message(chat_id, "📝 Enter toy title:").await?;
    },
    ToyDraftStage::Title => {
      let Some(title) = text else {
        bot.send_message(chat_id, "📝 Please provide a title.").await?;
        return Ok(());
      };
      draft.title = Some(title.to_string());
      draft.stage = ToyDraftStage::Price;
      dialogue.update(ConversationState::AddToy(draft)).await?;
      bot
        .send_message(chat_id, "💰 Enter price (free text, e.g. 150 000 UZS):")
        .await?;
    },
    ToyDraftStage::Price => {
      let Some(price) = text else {
        bot.send_message(chat_id, "💰 Please provide a price.").await?;
        return Ok(());
      };
      draft.price = Some(price.to_string());
      draft.stage = ToyDraftStage::Description;
      dialogue.update(ConversationState::AddToy(draft)).await?;
      bot
        .send_message(chat_id, "🧾 Enter description (or '-' to skip):")
        .await?;
    },
    ToyDraftStage::Description => {
      let description = match text {
        Some("-") | None => String::new(),
        Some(value) => value.to_string(),
      };
      draft.description = Some(description);
      draft.stage = ToyDraftStage::Media;
      dialogue.update(ConversationState::AddToy(draft)).await?;
      bot
        .send_message(chat_id, "📸 Send photos or videos for the toy, then type done.")
        .await?;
    },
    ToyDraftStage::Media => {
      let Some(value) = text else {
        return Ok(());
      };
      if !value.eq_ignore_ascii_case("done") {
        bot
          .send_message(chat_id, "📸 Send more media, or type done to finish.")
          .await?;
        dialogue.update(ConversationState::AddToy(draft)).await?;
        return Ok(());
      }

      let title = draft.title.as_deref().context("missing title during draft completion")?;
      let price = draft.price.as_deref().context("missing price during draft completion")?;
      let description = draft.description.clone().unwrap_or_default();
      let toy_id = ctx
        .db()
        .create_toy(title, price, &description, draft.category_id)
        .await?;
      for (index, media) in draft.media.iter().enumerate() {
        ctx
          .db()
          .add_toy_media(toy_id, &media.file_id, media.media_type, index as i32)
          .await?;
      }
      info!(toy_id, media = draft.media.len(), "created toy");
      dialogue.reset().await?;
      bot.send_message(chat_id, format!("✅ Toy created: #{toy_id}")).await?;
      match send_toy_card(&bot, &ctx, chat_id, toy_id, draft.admin_tg_id).await {
        Ok(true) => {},
        Ok(false) => warn!(toy_id, "toy missing immediately after creation"),
        Err(err) => warn!(error = %err, toy_id, "failed to present new toy"),
      }
    },
  }

  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_add_category_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(msg.chat.id, "🆕 Send the new category name or type cancel to stop.")
      .await?;
    return Ok(());
  };

  if raw_text.eq_ignore_ascii_case("cancel") {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Category creation cancelled.").await?;
    return Ok(());
  }

  let (category, existing) = ensure_category(&ctx, raw_text).await?;
  info!(admin_tg_id, category_id = category.id, existing, "ensured category");
  dialogue.reset().await?;

  let response = if existing {
    format!("⚠️ Category already exists: {} (#{})", category.name, category.id)
  } else {
    format!("✅ Category created: {} (#{})", category.name, category.id)
  };
  bot.send_message(msg.chat.id, response).await?;
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_rename_category_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  (admin_tg_id, category_id): (i64, i64),
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(msg.chat.id, "✏️ Send the new category name or type cancel to stop.")
      .await?;
    return Ok(());
  };

  if raw_text.eq_ignore_ascii_case("cancel") {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Rename cancelled.").await?;
    return Ok(());
  }

  dialogue.reset().await?;
  if ctx.db().rename_category(category_id, raw_text).await? {
    info!(admin_tg_id, category_id, "renamed category");
    bot
      .send_message(msg.chat.id, format!("✅ Category #{category_id} renamed to {raw_text}."))
      .await?;
  } else {
    bot.send_message(msg.chat.id, "❓ Category not found.").await?;
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_toggle_toy_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(msg.chat.id, "🔁 Send the toy ID to toggle or type cancel to stop.")
      .await?;
    return Ok(());
  };

  if raw_text.eq_ignore_ascii_case("cancel") {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Toy toggle cancelled.").await?;
    return Ok(());
  }

  let toy_id: i64 = match raw_text.parse() {
    Ok(value) => value,
    Err(_) => {
      bot.send_message(msg.chat.id, "🔢 Provide a numeric toy ID.").await?;
      return Ok(());
    },
  };

  let Some(toy) = ctx.db().get_toy(toy_id).await? else {
    bot.send_message(msg.chat.id, "❓ Toy not found.").await?;
    return Ok(());
  };

  let next = !toy.is_active;
  ctx.db().set_toy_active(toy_id, next).await?;
  info!(admin_tg_id, toy_id, active = next, "toggled toy");
  dialogue.reset().await?;
  let status = if next { "active" } else { "inactive" };
  bot
    .send_message(msg.chat.id, format!("🔁 Toy #{toy_id} ({}) is now {status}.", toy.title))
    .await?;
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_add_contact_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(msg.chat.id, "📞 Send a phone number or @username, or type cancel.")
      .await?;
    return Ok(());
  };

  if raw_text.eq_ignore_ascii_case("cancel") {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Contact creation cancelled.").await?;
    return Ok(());
  }

  match validate_contact(raw_text) {
    Ok(value) => {
      let contact_id = ctx.db().add_contact(&value).await?;
      info!(admin_tg_id, contact_id, "added order contact");
      dialogue.reset().await?;
      bot
        .send_message(msg.chat.id, format!("✅ Contact saved: {value} (#{contact_id})"))
        .await?;
    },
    Err(err) => {
      bot.send_message(msg.chat.id, format!("⚠️ {err}")).await?;
    },
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg, draft))]
async fn handle_add_location_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  mut draft: LocationDraft,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != draft.admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }
  let chat_id = msg.chat.id;

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot.send_message(chat_id, "📍 Send text, or type cancel to stop.").await?;
    return Ok(());
  };

  if raw_text.eq_ignore_ascii_case("cancel") {
    dialogue.reset().await?;
    bot.send_message(chat_id, "❌ Location creation cancelled.").await?;
    return Ok(());
  }

  match draft.stage {
    LocationStage::Name => {
      draft.name = Some(raw_text.to_string());
      draft.stage = LocationStage::Address;
      dialogue.update(ConversationState::AddLocation(draft)).await?;
      bot.send_message(chat_id, "🏠 Enter the address:").await?;
    },
    LocationStage::Address => {
      draft.address = Some(raw_text.to_string());
      draft.stage = LocationStage::Coordinates;
      dialogue.update(ConversationState::AddLocation(draft)).await?;
      bot
        .send_message(chat_id, "🧭 Enter coordinates as 'lat, lon' (e.g. 41.3111, 69.2797):")
        .await?;
    },
    LocationStage::Coordinates => {
      let Some((latitude, longitude)) = parse_coordinates(raw_text) else {
        bot
          .send_message(chat_id, "⚠️ Could not parse coordinates. Use 'lat, lon' format.")
          .await?;
        return Ok(());
      };
      let name = draft.name.as_deref().context("missing name during location draft")?;
      let address = draft.address.as_deref().context("missing address during location draft")?;
      let location_id = ctx.db().add_location(name, address, latitude, longitude).await?;
      info!(admin_tg_id = draft.admin_tg_id, location_id, "added store location");
      dialogue.reset().await?;
      bot
        .send_message(chat_id, format!("✅ Location saved: {name} (#{location_id})"))
        .await?;
    },
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_manual_ad_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(msg.chat.id, "📣 Send a toy ID, 'any' for a random pick, or cancel.")
      .await?;
    return Ok(());
  };

  if raw_text.eq_ignore_ascii_case("cancel") {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Manual ad cancelled.").await?;
    return Ok(());
  }

  let toy_id = if raw_text.eq_ignore_ascii_case("any") {
    None
  } else {
    match raw_text.parse::<i64>() {
      Ok(value) => Some(value),
      Err(_) => {
        bot
          .send_message(msg.chat.id, "🔢 Provide a numeric toy ID or 'any'.")
          .await?;
        return Ok(());
      },
    }
  };

  dialogue.reset().await?;
  if ctx.ads().post_manual_ad(toy_id).await {
    info!(admin_tg_id, ?toy_id, "manual ad posted");
    bot.send_message(msg.chat.id, "📣 Ad posted to the group.").await?;
  } else {
    bot
      .send_message(
        msg.chat.id,
        "⚠️ Could not post the ad. Check the toy ID, group configuration, and logs.",
      )
      .await?;
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_manual_bestseller_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(
        msg.chat.id,
        "⭐ Send '<weekly|monthly|yearly> <rank 1-5> <category name>' or cancel.",
      )
      .await?;
    return Ok(());
  };

  if raw_text.eq_ignore_ascii_case("cancel") {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Bestseller pin cancelled.").await?;
    return Ok(());
  }

  let mut parts = raw_text.splitn(3, char::is_whitespace);
  let parsed = match (parts.next(), parts.next(), parts.next()) {
    (Some(period_raw), Some(rank_raw), Some(name)) => {
      match (StatsPeriod::parse(period_raw), rank_raw.parse::<i32>()) {
        (Some(period), Ok(rank)) if (1 ..= 5).contains(&rank) => Some((period, rank, name.trim())),
        _ => None,
      }
    },
    _ => None,
  };

  let Some((period, rank, name)) = parsed else {
    bot
      .send_message(
        msg.chat.id,
        "⚠️ Format: '<weekly|monthly|yearly> <rank 1-5> <category name>'.",
      )
      .await?;
    return Ok(());
  };

  let Some(category) = ctx.db().find_category_by_name(name).await? else {
    bot.send_message(msg.chat.id, "❓ Category not found.").await?;
    return Ok(());
  };

  ctx.db().create_manual_bestseller(period, rank, &category).await?;
  info!(admin_tg_id, category_id = category.id, rank, period = period.as_str(), "pinned manual bestseller");
  dialogue.reset().await?;
  bot
    .send_message(
      msg.chat.id,
      format!("⭐ Pinned {} at rank {rank} for {}.", category.name, period.label()),
    )
    .await?;
  Ok(())
}

#[instrument(skip(bot, msg))]
async fn handle_idle_text(bot: Bot, msg: Message, state: ConversationState) -> HandlerResult {
  if matches!(state, ConversationState::Idle)
    && let Some(text) = msg.text()
  {
    if text.starts_with('/') {
      // unknown command, ignore to let telegram handle
    } else {
      info!(chat_id = %msg.chat.id, "idle state received unrecognized message");
      bot
        .send_message(msg.chat.id, "I did not understand that. Use the menu buttons or /help.")
        .await?;
    }
  }
  Ok(())
}

// --- callbacks ---

#[instrument(skip(bot, ctx, dialogue, query))]
async fn handle_callback_query(
  bot: Bot,
  ctx: SharedContext,
  query: CallbackQuery,
  dialogue: BotDialogue,
) -> HandlerResult {
  ensure_user_record(&ctx, &query.from).await?;
  let mut callback_text: Option<String> = None;
  let user_id = query.from.id.0 as i64;
  let message_ctx = query.message.as_ref().map(|message| (message.chat().id, message.id()));
  let callback_data = query.data.as_deref().unwrap_or("<empty>");
  if let Some((chat_id, _)) = message_ctx {
    info!(user_id, chat_id = %chat_id, callback = callback_data, "handling callback query");
  } else {
    info!(user_id, callback = callback_data, "handling callback query without message context");
  }

  if let Some(data) = query.data.as_deref()
    && let Some((prefix, value)) = data.split_once(':')
  {
    match prefix {
      "menu" => match value {
        "root" => {
          dialogue.reset().await?;
          if let Some((chat_id, message_id)) = message_ctx {
            show_main_menu(&bot, &ctx, chat_id, message_id, user_id).await?;
          }
        },
        "catalogue" => {
          dialogue.reset().await?;
          if let Some((chat_id, message_id)) = message_ctx {
            update_categories_menu(&bot, &ctx, chat_id, message_id).await?;
          }
        },
        "cart" => {
          if let Some((chat_id, message_id)) = message_ctx {
            show_cart(&bot, &ctx, chat_id, message_id, user_id).await?;
          }
        },
        "favorites" => {
          if let Some((chat_id, _)) = message_ctx {
            send_favorites_list(&bot, &ctx, chat_id, user_id).await?;
            callback_text = Some("⭐ Sent your favorites.".to_string());
          }
        },
        "bestsellers" => {
          if let Some((chat_id, message_id)) = message_ctx {
            show_bestsellers(&bot, &ctx, chat_id, message_id, StatsPeriod::Weekly).await?;
          }
        },
        "locations" => {
          if let Some((chat_id, _)) = message_ctx {
            send_locations(&bot, &ctx, chat_id).await?;
            callback_text = Some("📍 Sent store locations.".to_string());
          }
        },
        "about" => {
          if let Some((chat_id, _)) = message_ctx {
            send_about(&bot, &ctx, chat_id).await?;
            callback_text = Some("ℹ️ Sent store info.".to_string());
          }
        },
        "admin" => {
          if ctx.is_admin(user_id) {
            dialogue.reset().await?;
            if let Some((chat_id, message_id)) = message_ctx {
              show_admin_menu(&bot, chat_id, message_id).await?;
            }
          } else {
            callback_text = Some("🛡️ Admins only.".to_string());
          }
        },
        _ => {},
      },
      "cat" => {
        let mut parts = value.split(':');
        if let (Some(id_raw), Some(page_raw)) = (parts.next(), parts.next())
          && let (Ok(category_id), Ok(page)) = (id_raw.parse::<i64>(), page_raw.parse::<u32>())
          && let Some((chat_id, message_id)) = message_ctx
        {
          show_toys_page(&bot, &ctx, chat_id, message_id, category_id, page).await?;
        }
      },
      "toy" => {
        if let Ok(toy_id) = value.parse::<i64>()
          && let Some((chat_id, _)) = message_ctx
          && !send_toy_card(&bot, &ctx, chat_id, toy_id, user_id).await?
        {
          callback_text = Some("❓ Toy not found".to_string());
        }
      },
      "toyact" => {
        if let Some((action, toy_raw)) = value.split_once(':')
          && let Ok(toy_id) = toy_raw.parse::<i64>()
          && let Some((chat_id, _)) = message_ctx
        {
          match ctx.db().get_toy(toy_id).await? {
            Some(toy) if toy.is_active => match action {
              "order" => {
                order_toy(&bot, &ctx, chat_id, user_id, &toy).await?;
                callback_text = Some("🛍 Order noted.".to_string());
              },
              "cart" => {
                ctx.db().add_to_cart(user_id, &toy).await?;
                callback_text = Some("🛒 Added to cart.".to_string());
              },
              _ => {},
            },
            _ => {
              callback_text = Some("❓ Toy not found".to_string());
            },
          }
        }
      },
      "fav" => {
        if let Some((action, toy_raw)) = value.split_once(':')
          && let Ok(toy_id) = toy_raw.parse::<i64>()
        {
          match action {
            "add" => {
              if let Some(toy) = ctx.db().get_toy(toy_id).await? {
                ctx.db().add_favorite(user_id, toy_id, &toy.title).await?;
                callback_text = Some("⭐ Added to favorites".to_string());
              } else {
                callback_text = Some("❓ Toy not found".to_string());
              }
            },
            "remove" => {
              ctx.db().remove_favorite(user_id, toy_id).await?;
              callback_text = Some("❌ Removed from favorites".to_string());
            },
            _ => {},
          }

          if let Some((chat_id, message_id)) = message_ctx {
            let is_favorite = ctx.db().is_favorite(user_id, toy_id).await?;
            if let Err(err) = bot
              .edit_message_reply_markup(chat_id, message_id)
              .reply_markup(toy_action_keyboard(toy_id, is_favorite))
              .await
              && !matches!(err, RequestError::Api(ApiError::MessageNotModified))
            {
              return Err(err.into());
            }
          }
        }
      },
      "cart" => {
        if let Some((action, toy_raw)) = value.split_once(':')
          && let Some((chat_id, message_id)) = message_ctx
        {
          match action {
            "inc" | "dec" => {
              if let Ok(toy_id) = toy_raw.parse::<i64>() {
                let delta = if action == "inc" { 1 } else { -1 };
                ctx.db().change_cart_quantity(user_id, toy_id, delta).await?;
                show_cart(&bot, &ctx, chat_id, message_id, user_id).await?;
              }
            },
            "rm" => {
              if let Ok(toy_id) = toy_raw.parse::<i64>() {
                ctx.db().remove_cart_item(user_id, toy_id).await?;
                show_cart(&bot, &ctx, chat_id, message_id, user_id).await?;
                callback_text = Some("🗑 Removed.".to_string());
              }
            },
            "clear" => {
              let removed = ctx.db().clear_cart(user_id).await?;
              show_cart(&bot, &ctx, chat_id, message_id, user_id).await?;
              callback_text = Some(format!("🗑 Cleared {removed} item(s)."));
            },
            "checkout" => {
              checkout_cart(&bot, &ctx, chat_id, user_id).await?;
              ctx.db().clear_cart(user_id).await?;
              show_cart(&bot, &ctx, chat_id, message_id, user_id).await?;
            },
            _ => {},
          }
        }
      },
      "best" => {
        if let Some(period) = StatsPeriod::parse(value)
          && let Some((chat_id, message_id)) = message_ctx
        {
          show_bestsellers(&bot, &ctx, chat_id, message_id, period).await?;
        }
      },
      "admin" => {
        if !ctx.is_admin(user_id) {
          callback_text = Some("🛡️ Admins only.".to_string());
        } else {
          match value {
            "add_toy" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::AddToy(AddToyDraft::new(user_id)))
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                send_category_picker_message(&bot, &ctx, chat_id).await?;
              }
              callback_text = Some("🧸 Starting toy creation.".to_string());
            },
            "toggle_toy" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::ToggleToy { admin_tg_id: user_id })
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                bot
                  .send_message(chat_id, "🔁 Send the toy ID to activate/deactivate:")
                  .await?;
              }
              callback_text = Some("🔁 Awaiting toy ID.".to_string());
            },
            "add_category" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::AddCategory { admin_tg_id: user_id })
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                bot.send_message(chat_id, "🆕 Send the new category name:").await?;
              }
              callback_text = Some("🆕 Waiting for category name.".to_string());
            },
            "categories" => {
              dialogue.reset().await?;
              if let Some((chat_id, message_id)) = message_ctx {
                show_admin_categories(&bot, &ctx, chat_id, message_id).await?;
              }
            },
            "contacts" => {
              dialogue.reset().await?;
              if let Some((chat_id, message_id)) = message_ctx {
                show_admin_contacts(&bot, &ctx, chat_id, message_id).await?;
              }
            },
            "add_contact" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::AddContact { admin_tg_id: user_id })
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                bot
                  .send_message(chat_id, "📞 Send a phone number or @username to publish:")
                  .await?;
              }
              callback_text = Some("📞 Waiting for contact.".to_string());
            },
            "locations" => {
              dialogue.reset().await?;
              if let Some((chat_id, message_id)) = message_ctx {
                show_admin_locations(&bot, &ctx, chat_id, message_id).await?;
              }
            },
            "add_location" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::AddLocation(LocationDraft::new(user_id)))
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                bot.send_message(chat_id, "📍 Enter the location name:").await?;
              }
              callback_text = Some("📍 Starting location creation.".to_string());
            },
            "manual_ad" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::ManualAd { admin_tg_id: user_id })
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                bot
                  .send_message(chat_id, "📣 Send a toy ID to advertise, or 'any' for a random pick:")
                  .await?;
              }
              callback_text = Some("📣 Waiting for toy ID.".to_string());
            },
            "ads_status" => {
              if let Some((chat_id, message_id)) = message_ctx {
                show_ads_status(&bot, &ctx, chat_id, message_id).await?;
              }
            },
            "stats" => {
              if let Some((chat_id, message_id)) = message_ctx {
                show_sales_stats(&bot, &ctx, chat_id, message_id).await?;
              }
            },
            "refresh_best" => {
              let created = ctx.db().refresh_bestsellers().await?;
              info!(admin_tg_id = user_id, created, "refreshed bestsellers on demand");
              callback_text = Some(format!("🏆 Bestsellers refreshed ({created} entries)."));
            },
            "add_best" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::ManualBestseller { admin_tg_id: user_id })
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                bot
                  .send_message(chat_id, "⭐ Send '<weekly|monthly|yearly> <rank 1-5> <category name>':")
                  .await?;
              }
              callback_text = Some("⭐ Waiting for bestseller pin.".to_string());
            },
            _ => {},
          }
        }
      },
      "catadm" => {
        if !ctx.is_admin(user_id) {
          callback_text = Some("🛡️ Admins only.".to_string());
        } else if let Some((action, id_raw)) = value.split_once(':')
          && let Ok(category_id) = id_raw.parse::<i64>()
        {
          match action {
            "pick" => {
              if let Some((chat_id, message_id)) = message_ctx {
                show_admin_category(&bot, &ctx, chat_id, message_id, category_id).await?;
              }
            },
            "rename" => {
              dialogue.reset().await?;
              dialogue
                .update(ConversationState::RenameCategory {
                  admin_tg_id: user_id,
                  category_id,
                })
                .await?;
              if let Some((chat_id, _)) = message_ctx {
                bot.send_message(chat_id, "✏️ Send the new category name:").await?;
              }
              callback_text = Some("✏️ Waiting for new name.".to_string());
            },
            "toggle" => {
              if let Some(category) = ctx.db().get_category(category_id).await? {
                let next = !category.is_active;
                ctx.db().set_category_active(category_id, next).await?;
                info!(admin_tg_id = user_id, category_id, active = next, "toggled category");
                if let Some((chat_id, message_id)) = message_ctx {
                  show_admin_category(&bot, &ctx, chat_id, message_id, category_id).await?;
                }
              } else {
                callback_text = Some("❓ Category not found".to_string());
              }
            },
            _ => {},
          }
        }
      },
      "contact" => {
        if !ctx.is_admin(user_id) {
          callback_text = Some("🛡️ Admins only.".to_string());
        } else if let Some((action, id_raw)) = value.split_once(':')
          && let Ok(contact_id) = id_raw.parse::<i64>()
        {
          let target = action == "on";
          if ctx.db().set_contact_active(contact_id, target).await? {
            info!(admin_tg_id = user_id, contact_id, active = target, "toggled contact");
          }
          if let Some((chat_id, message_id)) = message_ctx {
            show_admin_contacts(&bot, &ctx, chat_id, message_id).await?;
          }
        }
      },
      "loc" => {
        if !ctx.is_admin(user_id) {
          callback_text = Some("🛡️ Admins only.".to_string());
        } else if let Some((action, id_raw)) = value.split_once(':')
          && let Ok(location_id) = id_raw.parse::<i64>()
          && action == "off"
        {
          if ctx.db().set_location_active(location_id, false).await? {
            info!(admin_tg_id = user_id, location_id, "deactivated location");
          }
          if let Some((chat_id, message_id)) = message_ctx {
            show_admin_locations(&bot, &ctx, chat_id, message_id).await?;
          }
        }
      },
      "newtoycat" => {
        if let Some((chat_id, _)) = message_ctx {
          match value {
            "new" => {
              if !matches!(dialogue.get().await?, Some(ConversationState::AddToy(_))) {
                dialogue
                  .update(ConversationState::AddToy(AddToyDraft::new(user_id)))
                  .await?;
              }
              bot
                .send_message(chat_id, "🆕 Send the new category name (or type cancel).")
                .await?;
              callback_text = Some("🆕 Waiting for category name.".to_string());
            },
            id_raw => {
              if let Ok(category_id) = id_raw.parse::<i64>() {
                if let Some(category) = ctx.db().get_category(category_id).await? {
                  let mut draft = match dialogue.get().await? {
                    Some(ConversationState::AddToy(draft)) => draft,
                    _ => AddToyDraft::new(user_id),
                  };
                  draft.category_id = Some(category.id);
                  draft.category_name = Some(category.name);
                  draft.stage = ToyDraftStage::Title;
                  dialogue.update(ConversationState::AddToy(draft)).await?;
                  bot.send_message(chat_id, "📝 Enter toy title:").await?;
                  callback_text = Some("🗂️ Category selected.".to_string());
                } else {
                  callback_text = Some("❓ Category not found".to_string());
                }
              }
            },
          }
        }
      },
      _ => {},
    }
  }

  if let Some(text) = callback_text {
    bot.answer_callback_query(query.id).text(text).await?;
  } else {
    bot.answer_callback_query(query.id).await?;
  }
  Ok(())
}

fn build_category_picker_keyboard(categories: &[CategoryRow]) -> InlineKeyboardMarkup {
  let mut rows = Vec::new();

  for chunk in categories.chunks(2) {
    rows.push(
      chunk
        .iter()
        .map(|c| InlineKeyboardButton::callback(c.name.clone(), format!("newtoycat:{}", c.id)))
        .collect::<Vec<_>>(),
    );
  }

  rows.push(vec![
    InlineKeyboardButton::callback("➕ New category", "newtoycat:new".to_string()),
    InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string()),
  ]);
  InlineKeyboardMarkup::new(rows)
}

#[instrument(skip(bot, ctx))]
async fn send_category_picker_message(bot: &Bot, ctx: &SharedContext, chat: ChatId) -> HandlerResult {
  let categories = ctx.db().list_categories(false).await?;
  if categories.is_empty() {
    info!(chat_id = %chat, "no categories to show in picker");
    bot
      .send_message(chat, "🗂️ No categories yet.\nSend a new category name, or type cancel to stop.")
      .await?;
  } else {
    info!(chat_id = %chat, count = categories.len(), "sending category picker");
    bot
      .send_message(chat, "🗂️ Choose a category for the new toy (or tap ➕ New category):")
      .reply_markup(build_category_picker_keyboard(&categories))
      .await?;
  }
  Ok(())
}

// --- shared helpers ---

async fn ensure_user_record(ctx: &SharedContext, user: &User) -> Result<()> {
  ctx
    .db()
    .upsert_user(
      user.id.0 as i64,
      user.username.clone(),
      Some(user.first_name.clone()),
      user.last_name.clone(),
    )
    .await
    .context("failed to upsert user record")
}

async fn ensure_category(ctx: &SharedContext, name: &str) -> Result<(CategoryRow, bool)> {
  if let Some(existing) = ctx.db().find_category_by_name(name).await? {
    return Ok((existing, true));
  }
  let id = ctx.db().create_category(name).await?;
  Ok((
    CategoryRow {
      id,
      name: name.to_string(),
      is_active: true,
    },
    false,
  ))
}

fn message_text(msg: &Message) -> Option<&str> {
  msg.text().or_else(|| msg.caption())
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::render_toy_card;
  use super::toy_action_keyboard;
  use crate::models::ToyRow;

  fn toy() -> ToyRow {
    ToyRow {
      id: 3,
      title: "Wooden train".to_string(),
      price: "120 000".to_string(),
      description: "Handmade, ages 3+".to_string(),
      category_id: Some(1),
      is_active: true,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn renders_toy_card_text() {
    let text = render_toy_card(&toy(), Some("Trains"), false);
    assert!(text.contains("Wooden train"));
    assert!(text.contains("Trains"));
    assert!(text.contains("Handmade"));
    assert!(!text.contains("favorites"));
  }

  #[test]
  fn toy_card_marks_favorites() {
    let text = render_toy_card(&toy(), None, true);
    assert!(text.contains("Saved to favorites"));
  }

  #[test]
  fn favorite_button_flips_with_state() {
    let keyboard = toy_action_keyboard(3, false);
    let flat: Vec<String> = keyboard
      .inline_keyboard
      .iter()
      .flatten()
      .map(|button| button.text.clone())
      .collect();
    assert!(flat.iter().any(|label| label.contains("Add favorite")));

    let keyboard = toy_action_keyboard(3, true);
    let flat: Vec<String> = keyboard
      .inline_keyboard
      .iter()
      .flatten()
      .map(|button| button.text.clone())
      .collect();
    assert!(flat.iter().any(|label| label.contains("Remove favorite")));
  }
}
