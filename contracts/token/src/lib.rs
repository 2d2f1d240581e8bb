#![no_std]

mod admin;
mod allowance;
mod balance;
mod contract;
mod event;
mod metadata;
mod storage_types;


pub use crate::contract::Token;
pub use crate::contract::TokenClient;
