pub mod error;
pub mod gate;
pub mod labels;
pub mod normalizer;
pub mod pipeline;
pub mod urgency;
