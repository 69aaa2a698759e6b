pub mod evaluate;
pub mod migrate;
pub mod templates;
pub mod test;
pub mod validate;
