pub mod mimetype;
pub mod preprocess;
pub mod render;
