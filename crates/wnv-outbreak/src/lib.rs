//! Geocoding ETL and spatial analysis orchestration for West Nile outbreak
//! response maps.
//!
//! Address records are pulled from a published sheet, geocoded, loaded as a
//! point layer, and fed through a fixed buffer → intersect → erase → spatial
//! join sequence before the results are published to a map layout.

pub mod config;
pub mod error;
pub mod gis;
pub mod http;
pub mod telemetry;
pub mod workflows;
