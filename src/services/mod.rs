//! Core services: the storage engine, bearer tokens and the access gate.

pub mod access_gate;
pub mod file_storage;
pub mod storage;
pub mod token_service;
