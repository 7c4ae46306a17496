//! BlockFile over custom media

mod failing;
mod file;
