#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod admin;
pub mod config;
pub mod logging;
pub mod session;
pub mod subscription;
pub mod support;

pub mod net;
