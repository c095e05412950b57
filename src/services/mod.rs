pub mod auth;
pub mod backend_gateway;
pub mod data_store;
pub mod gateway_service;
pub mod key_codec;
pub mod location;
pub mod metadata_store;
pub mod part_listing;
pub mod replication;
