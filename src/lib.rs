//! Proxied scraper for the Trh knih book marketplace.
//!
//! Samples candidate proxies, keeps the ones that answer a probe, fetches the listing pages
//! and then every item's detail page through one of them, and assembles the offers into a table.

mod error;
mod macros;

pub mod config;
pub mod logging;
pub mod parse;
pub mod process;
pub mod proxy;
pub mod request;
pub mod table;
pub mod validate;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
