//! Raviente: the scheduled raid-boss event shared by every hunter in a world.
//!
//! The register/state/support groups are mutated by quest handlers outside
//! this crate; this module owns their storage, their lock and the
//! participation multiplier.

use tokio::sync::{Mutex, MutexGuard};

pub const REGISTER_AUX_SLOTS: usize = 5;
pub const STATE_SLOTS: usize = 29;
pub const SUPPORT_SLOTS: usize = 25;

/// Player count above which the large-event threshold applies.
const LARGE_EVENT_MAX_PLAYERS: u32 = 8;
const LARGE_EVENT_MIN_PLAYERS: usize = 24;
const SMALL_EVENT_MIN_PLAYERS: usize = 4;

/// Scheduling and configuration counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RavienteRegister {
    pub next_time: u32,
    pub start_time: u32,
    pub post_time: u32,
    pub killed_time: u32,
    pub raviente_type: u32,
    pub max_players: u32,
    pub carve_quest: u32,
    pub aux: [u32; REGISTER_AUX_SLOTS],
}

/// Live encounter state. Slot meanings belong to the quest handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RavienteState {
    slots: [u32; STATE_SLOTS],
}

/// Support-mechanic state. Slot meanings belong to the quest handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RavienteSupport {
    slots: [u32; SUPPORT_SLOTS],
}

macro_rules! slot_group {
    ($ty:ident, $n:expr) => {
        impl $ty {
            pub fn get(&self, index: usize) -> Option<u32> {
                self.slots.get(index).copied()
            }

            /// Returns the previous value, or `None` if `index` is out of range.
            pub fn set(&mut self, index: usize, value: u32) -> Option<u32> {
                self.slots
                    .get_mut(index)
                    .map(|slot| std::mem::replace(slot, value))
            }

            /// Add `delta` to a slot with wrapping. Returns the new value.
            pub fn add(&mut self, index: usize, delta: u32) -> Option<u32> {
                self.slots.get_mut(index).map(|slot| {
                    *slot = slot.wrapping_add(delta);
                    *slot
                })
            }

            pub fn slots(&self) -> &[u32; $n] {
                &self.slots
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self { slots: [0; $n] }
            }
        }
    };
}

slot_group!(RavienteState, STATE_SLOTS);
slot_group!(RavienteSupport, SUPPORT_SLOTS);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RavienteData {
    pub register: RavienteRegister,
    pub state: RavienteState,
    pub support: RavienteSupport,
}

impl RavienteData {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
pub struct Raviente {
    data: Mutex<RavienteData>,
}

impl Raviente {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to all three slot groups.
    pub async fn lock(&self) -> MutexGuard<'_, RavienteData> {
        self.data.lock().await
    }

    pub async fn max_players(&self) -> u32 {
        self.data.lock().await.register.max_players
    }

    /// Zero every slot at the end of an event cycle.
    pub async fn reset(&self) {
        self.data.lock().await.reset();
        tracing::info!("[channel] [raviente_reset]");
    }
}

/// Difficulty scaling from Raviente semaphore occupancy.
///
/// `None` occupancy means no event is running. Below the threshold the result
/// is the truncated ratio threshold / occupancy.
pub fn participation_multiplier(max_players: u32, occupancy: Option<usize>) -> u32 {
    let Some(occupancy) = occupancy else {
        return 0;
    };
    let min_players = if max_players > LARGE_EVENT_MAX_PLAYERS {
        LARGE_EVENT_MIN_PLAYERS
    } else {
        SMALL_EVENT_MIN_PLAYERS
    };
    if occupancy > min_players {
        return 1;
    }
    // An empty semaphore scales as if one hunter were present.
    (min_players / occupancy.max(1)) as u32
}
