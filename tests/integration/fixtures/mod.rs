#![allow(dead_code)]

pub mod cluster;
pub mod entities;
pub mod stream;
