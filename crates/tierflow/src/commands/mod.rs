pub mod apply;
pub mod destroy;
pub mod plan;
pub mod topology;
pub mod validate;
