//! A streaming implementation of random cut forests, an unsupervised
//! algorithm for sketching non-stationary data streams, most commonly used
//! for anomaly detection.
//!
//! The forest keeps a shared, reference-counted arena of shingled points and
//! a set of independent components, each a time-decayed reservoir sampler
//! coupled to one random-cut tree. Feeding a point runs every sampler's
//! accept/evict decision and applies it to the owning tree; scoring
//! traverses every tree with a visitor and folds the results.
//!
//! ```ignore
//! use cutforest::{ForestBuilder, RandomCutForest};
//!
//! // the dimension is the only required parameter
//! let mut forest = ForestBuilder::new(2)
//!     .sample_size(256)     // samples per tree
//!     .number_of_trees(50)  // trees in the model
//!     .random_seed(17)
//!     .build()?;
//!
//! for point in data.iter() {
//!     let score = forest.score(point)?;
//!     forest.update(point)?;
//! }
//! # Ok::<(), cutforest::ForestError>(())
//! ```
//!
//! ### References
//!
//! Sudipto Guha, Nina Mishra, Gourav Roy, and Okke Schrijvers. *"Robust
//! random cut forest based anomaly detection on streams."* International
//! Conference on Machine Learning, pp. 2712-2721. PMLR, 2016.

pub mod datagen;
pub mod divector;
pub mod errors;
pub mod forest;
pub mod indexmanager;
pub mod pointstore;
pub mod sampler;
pub mod samplerplustree;
pub mod tree;
pub mod types;
mod util;
pub mod visitor;

pub use errors::ForestError;
pub use forest::{ForestBuilder, RandomCutForest};
pub use util::{l1distance, linfinitydistance};
