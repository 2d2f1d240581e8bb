use crate::storage_types::{DataKey, BALANCE_BUMP_AMOUNT, BALANCE_LIFETIME_THRESHOLD};
use soroban_sdk::{Address, Env};

pub fn read_balance(e: &Env, addr: Address) -> i128 {
    let key = DataKey::Balance(addr);
    match e.storage().persistent().get::<DataKey, i128>(&key) {
        Some(balance) => {
            e.storage()
                .persistent()
                .extend_ttl(&key, BALANCE_LIFETIME_THRESHOLD, BALANCE_BUMP_AMOUNT);
            balance
        }
        None => 0,
    }
}

fn write_balance(e: &Env, addr: Address, amount: i128) {
    let key = DataKey::Balance(addr);
    e.storage().persistent().set(&key, &amount);
    e.storage()
        .persistent()
        .extend_ttl(&key, BALANCE_LIFETIME_THRESHOLD, BALANCE_BUMP_AMOUNT);
}

pub fn receive_balance(e: &Env, addr: Address, amount: i128) {
    let balance = read_balance(e, addr.clone());
    let Some(updated) = balance.checked_add(amount) else {
        panic!("balance overflow");
    };
    write_balance(e, addr, updated);
}

pub fn spend_balance(e: &Env, addr: Address, amount: i128) {
    let balance = read_balance(e, addr.clone());
    if balance < amount {
        panic!("insufficient balance");
    }
    write_balance(e, addr, balance - amount);
}

pub fn read_total_supply(e: &Env) -> i128 {
    e.storage()
        .instance()
        .get::<DataKey, i128>(&DataKey::TotalSupply)
        .unwrap_or(0)
}

pub fn grow_total_supply(e: &Env, amount: i128) {
    let Some(supply) = read_total_supply(e).checked_add(amount) else {
        panic!("total supply overflow");
    };
    e.storage().instance().set(&DataKey::TotalSupply, &supply);
}

pub fn shrink_total_supply(e: &Env, amount: i128) {
    let supply = read_total_supply(e) - amount;
    e.storage().instance().set(&DataKey::TotalSupply, &supply);
}
