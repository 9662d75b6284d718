#![deny(missing_docs)]
#![doc = "Core traits and data types shared by the MIMC crates: errors, levels, sample values and seeding."]

pub mod errors;
mod index;
pub mod levels;
pub mod rng;
mod value;

pub use errors::{ErrorInfo, MimcError};
pub use index::MultiIndex;
pub use levels::{LevelSet, ProfitCalculator};
pub use rng::{derive_substream_seed, level_seed, LevelStreams, RngHandle};
pub use value::SampleValue;
