//! Specialist analysts for the ticker path
//!
//! Both analysts are infallible from the executor's point of view: any
//! collaborator failure becomes a degraded `AnalystReport`.

pub mod news;
pub mod price;

pub use news::{NewsAnalyst, NextAction};
pub use price::PriceAnalyst;
