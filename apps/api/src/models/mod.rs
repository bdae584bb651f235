pub mod generation;
pub mod language;
pub mod resume;
pub mod template;
