pub mod admin;
pub mod app;
pub mod cancel;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod gateway;
pub mod output;
pub mod parser;
pub mod report;
pub mod resolver;
pub mod serializer;
pub mod sparql;
pub mod store;
pub mod vocab;
