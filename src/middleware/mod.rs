//! Request middleware layered onto the router.

pub mod auth;
