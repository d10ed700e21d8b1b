pub mod plumbing;
pub mod render;
