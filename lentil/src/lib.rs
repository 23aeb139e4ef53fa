pub mod config;
pub mod config_space;
pub mod evaluation;
pub mod inference;
pub mod lentil_input;
pub mod model_io;
pub mod search;
pub mod sparsity;
pub mod trainer;
