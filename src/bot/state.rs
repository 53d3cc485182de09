use serde::Deserialize;
use serde::Serialize;

use crate::models::MediaType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum ConversationState {
  #[default]
  Idle,
  AddToy(AddToyDraft),
  AddCategory {
    admin_tg_id: i64,
  },
  RenameCategory {
    admin_tg_id: i64,
    category_id: i64,
  },
  ToggleToy {
    admin_tg_id: i64,
  },
  AddContact {
    admin_tg_id: i64,
  },
  AddLocation(LocationDraft),
  ManualAd {
    admin_tg_id: i64,
  },
  ManualBestseller {
    admin_tg_id: i64,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDraft {
  pub file_id: String,
  pub media_type: MediaType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddToyDraft {
  pub stage: ToyDraftStage,
  pub admin_tg_id: i64,
  pub category_id: Option<i64>,
  pub category_name: Option<String>,
  pub title: Option<String>,
  pub price: Option<String>,
  pub description: Option<String>,
  pub media: Vec<MediaDraft>,
}

impl AddToyDraft {
  pub fn new(admin_tg_id: i64) -> Self {
    Self {
      stage: ToyDraftStage::Category,
      admin_tg_id,
      category_id: None,
      category_name: None,
      title: None,
      price: None,
      description: None,
      media: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToyDraftStage {
  Category,
  Title,
  Price,
  Description,
  Media,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationDraft {
  pub stage: LocationStage,
  pub admin_tg_id: i64,
  pub name: Option<String>,
  pub address: Option<String>,
}

impl LocationDraft {
  pub fn new(admin_tg_id: i64) -> Self {
    Self {
      stage: LocationStage::Name,
      admin_tg_id,
      name: None,
      address: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LocationStage {
  Name,
  Address,
  Coordinates,
}

#[cfg(test)]
mod tests {
  use super::AddToyDraft;
  use super::LocationDraft;
  use super::LocationStage;
  use super::ToyDraftStage;

  #[test]
  fn new_toy_draft_starts_with_category_stage() {
    let draft = AddToyDraft::new(1);
    assert_eq!(draft.stage, ToyDraftStage::Category);
    assert_eq!(draft.admin_tg_id, 1);
    assert!(draft.media.is_empty());
  }

  #[test]
  fn new_location_draft_starts_with_name_stage() {
    let draft = LocationDraft::new(7);
    assert_eq!(draft.stage, LocationStage::Name);
    assert!(draft.name.is_none());
    assert!(draft.address.is_none());
  }
}
