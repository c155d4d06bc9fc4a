#![forbid(unsafe_code)]

pub mod health;
