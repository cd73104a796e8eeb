pub mod handler;
pub mod intercept;
