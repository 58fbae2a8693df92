//! Newsdesk - A News Headline Aggregator
//!
//! This crate pulls raw RSS/Atom documents through an aggregation endpoint,
//! parses and merges them into a short list of headlines, and serves that
//! list as a web page. The aggregation endpoint itself is served by the same
//! binary (see [`relay`]).

pub mod aggregator;
pub mod config;
pub mod parser;
pub mod presentation;
pub mod relay;
pub mod routes;
pub mod source_client;
