#![cfg_attr(not(test), forbid(unsafe_code))]

//! Wire models and client configuration shared by the LearnHub realtime
//! core and its front-ends.

pub mod config;
pub mod models;
