//! Daily ad slot planning: a handful of pseudo-random posting times inside a
//! configured window, spaced by a random interval.

use rand::Rng;
use thiserror::Error;

use crate::config::AdsConfig;

/// Ad-slot trigger ids share this prefix so the midnight replan can find
/// them without touching other triggers.
pub const AD_TRIGGER_PREFIX: &str = "ad:";

/// Spread of the random offset applied to the window start, so the first
/// slot does not land at the exact top of the window every day.
const START_JITTER_MINUTES: u32 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
  #[error("posting window has start hour {start} and end hour {end}; expected 0 <= start < end <= 24")]
  InvalidWindow { start: u8, end: u8 },
  #[error("interval bounds {min}..={max} minutes are invalid; expected 1 <= min <= max")]
  InvalidInterval { min: u32, max: u32 },
}

/// A planned (hour, minute) posting slot within the current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTime {
  pub hour: u8,
  pub minute: u8,
}

impl SlotTime {
  pub fn total_minutes(&self) -> u32 {
    self.hour as u32 * 60 + self.minute as u32
  }

  /// Deterministic trigger identity: re-registering the same slot replaces
  /// rather than duplicates.
  pub fn trigger_id(&self) -> String {
    format!("{AD_TRIGGER_PREFIX}{}:{}", self.hour, self.minute)
  }
}

impl std::fmt::Display for SlotTime {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:02}:{:02}", self.hour, self.minute)
  }
}

/// Planner inputs, taken from [`AdsConfig`] but without the delivery
/// destination.
#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
  pub daily_count: u32,
  pub start_hour: u8,
  pub end_hour: u8,
  pub min_interval_minutes: u32,
  pub max_interval_minutes: u32,
}

impl PlannerConfig {
  pub fn validate(&self) -> Result<(), PlanError> {
    if self.start_hour >= self.end_hour || self.end_hour > 24 {
      return Err(PlanError::InvalidWindow {
        start: self.start_hour,
        end: self.end_hour,
      });
    }
    if self.min_interval_minutes == 0 || self.min_interval_minutes > self.max_interval_minutes {
      return Err(PlanError::InvalidInterval {
        min: self.min_interval_minutes,
        max: self.max_interval_minutes,
      });
    }
    Ok(())
  }
}

impl From<&AdsConfig> for PlannerConfig {
  fn from(ads: &AdsConfig) -> Self {
    Self {
      daily_count: ads.daily_count,
      start_hour: ads.start_hour,
      end_hour: ads.end_hour,
      min_interval_minutes: ads.min_interval_minutes,
      max_interval_minutes: ads.max_interval_minutes,
    }
  }
}

/// Plan up to `daily_count` posting slots for one day.
///
/// Starts at `start_hour` plus a random offset under half an hour, then
/// walks forward by a random interval per slot. Planning stops early once a
/// slot would land at or past `end_hour`, so the result may be shorter than
/// requested, or empty when the window is too narrow.
pub fn plan_daily_slots<R: Rng + ?Sized>(config: &PlannerConfig, rng: &mut R) -> Result<Vec<SlotTime>, PlanError> {
  config.validate()?;

  let end_minutes = config.end_hour as u32 * 60;
  let mut current = config.start_hour as u32 * 60 + rng.gen_range(0 .. START_JITTER_MINUTES);
  let mut slots = Vec::new();

  for _ in 0 .. config.daily_count {
    current += rng.gen_range(config.min_interval_minutes ..= config.max_interval_minutes);
    if current >= end_minutes {
      break;
    }
    slots.push(SlotTime {
      hour: (current / 60) as u8,
      minute: (current % 60) as u8,
    });
  }

  Ok(slots)
}

#[cfg(test)]
mod tests {
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  use super::PlanError;
  use super::PlannerConfig;
  use super::plan_daily_slots;

  fn config(count: u32, start: u8, end: u8, min: u32, max: u32) -> PlannerConfig {
    PlannerConfig {
      daily_count: count,
      start_hour: start,
      end_hour: end,
      min_interval_minutes: min,
      max_interval_minutes: max,
    }
  }

  #[test]
  fn slots_stay_inside_window_and_increase() {
    for seed in 0 .. 50u64 {
      let mut rng = StdRng::seed_from_u64(seed);
      let cfg = config(15, 9, 21, 30, 90);
      let slots = plan_daily_slots(&cfg, &mut rng).unwrap();
      assert!(slots.len() <= 15);
      for pair in slots.windows(2) {
        assert!(pair[1].total_minutes() > pair[0].total_minutes());
        let gap = pair[1].total_minutes() - pair[0].total_minutes();
        assert!((30 ..= 90).contains(&gap), "gap {gap} out of bounds");
      }
      for slot in &slots {
        assert!(slot.hour >= 9 && slot.hour < 21, "slot {slot} outside window");
      }
    }
  }

  #[test]
  fn zero_count_plans_nothing() {
    let mut rng = StdRng::seed_from_u64(1);
    let slots = plan_daily_slots(&config(0, 9, 21, 30, 90), &mut rng).unwrap();
    assert!(slots.is_empty());
  }

  #[test]
  fn narrow_window_caps_slot_count() {
    // One hour at 30-minute spacing fits at most two slots after the
    // random start offset.
    for seed in 0 .. 50u64 {
      let mut rng = StdRng::seed_from_u64(seed);
      let slots = plan_daily_slots(&config(3, 9, 10, 30, 30), &mut rng).unwrap();
      assert!(slots.len() <= 2, "seed {seed} produced {} slots", slots.len());
      for slot in &slots {
        assert_eq!(slot.hour, 9);
      }
    }
  }

  #[test]
  fn window_too_narrow_for_any_slot_yields_empty_plan() {
    let mut rng = StdRng::seed_from_u64(7);
    let slots = plan_daily_slots(&config(5, 9, 10, 120, 180), &mut rng).unwrap();
    assert!(slots.is_empty());
  }

  #[test]
  fn rejects_inverted_window() {
    let mut rng = StdRng::seed_from_u64(0);
    let err = plan_daily_slots(&config(5, 21, 9, 30, 90), &mut rng).unwrap_err();
    assert_eq!(err, PlanError::InvalidWindow { start: 21, end: 9 });
  }

  #[test]
  fn rejects_zero_or_inverted_interval() {
    let mut rng = StdRng::seed_from_u64(0);
    assert_eq!(
      plan_daily_slots(&config(5, 9, 21, 0, 90), &mut rng).unwrap_err(),
      PlanError::InvalidInterval { min: 0, max: 90 }
    );
    assert_eq!(
      plan_daily_slots(&config(5, 9, 21, 90, 30), &mut rng).unwrap_err(),
      PlanError::InvalidInterval { min: 90, max: 30 }
    );
  }

  #[test]
  fn trigger_ids_are_deterministic() {
    let slot = super::SlotTime { hour: 9, minute: 5 };
    assert_eq!(slot.trigger_id(), "ad:9:5");
    assert_eq!(slot.trigger_id(), slot.trigger_id());
  }
}
