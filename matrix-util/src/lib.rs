pub mod coherence;
pub mod common_io;
pub mod sparse_bow;
pub mod vocab;
