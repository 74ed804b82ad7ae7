//! Named, timed input sequences: storage and playback.

pub mod action;
pub mod player;
pub mod store;

pub use action::MacroAction;
pub use player::{
    DEFAULT_SPEED_FACTOR, MacroPlayer, PlayReply, Playback, PlaybackToken, completion_message,
    scaled_delay,
};
pub use store::{MacroDefinition, MacroStep, MacroStore};
