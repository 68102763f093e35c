//! HTTP middleware. Access logging wraps every route.

pub mod access;
