#![no_std]

pub mod memory;
