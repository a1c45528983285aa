pub mod engine;
pub mod extractor;
pub mod minutia;
pub mod pipeline;
