use crate::storage_types::DataKey;
use soroban_sdk::{Env, IntoVal, String, TryFromVal, Val};

fn read<T: TryFromVal<Env, Val>>(e: &Env, key: DataKey) -> T {
    match e.storage().instance().get(&key) {
        Some(value) => value,
        None => panic!("not initialized"),
    }
}

fn write<T: IntoVal<Env, Val>>(e: &Env, key: DataKey, value: &T) {
    e.storage().instance().set(&key, value);
}

pub fn read_decimal(e: &Env) -> u32 {
    read(e, DataKey::Decimals)
}

pub fn write_decimal(e: &Env, d: u32) {
    write(e, DataKey::Decimals, &d);
}

pub fn read_name(e: &Env) -> String {
    read(e, DataKey::Name)
}

pub fn write_name(e: &Env, name: &String) {
    write(e, DataKey::Name, name);
}

pub fn read_symbol(e: &Env) -> String {
    read(e, DataKey::Symbol)
}

pub fn write_symbol(e: &Env, symbol: &String) {
    write(e, DataKey::Symbol, symbol);
}
