#![allow(dead_code)]

use hivestore_core::{
    AttributeMap, Connection, ConvergedColumn, ConvergedType, DatabaseConfig, Migration,
    ResourceDescriptor,
};
use std::path::Path;

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "CREATE TABLE thermostat (
            thermostat_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            serial TEXT NOT NULL UNIQUE,
            inactive BOOLEAN NOT NULL DEFAULT 0,
            temperature DECIMAL(4,1),
            json_alerts TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            converged TEXT
        );",
    ),
    Migration::new(
        2,
        "CREATE TABLE sensor (
            sensor_id INTEGER PRIMARY KEY,
            thermostat_id INTEGER,
            name TEXT NOT NULL
        );",
    ),
];

pub const THERMOSTAT_SOFT: &[ConvergedColumn] = &[
    ConvergedColumn::new("profile_version", ConvergedType::Integer),
    ConvergedColumn::new("nickname", ConvergedType::Text),
    ConvergedColumn::new("setpoint_offset", ConvergedType::Float),
];

pub const THERMOSTAT: ResourceDescriptor =
    ResourceDescriptor::with_converged("thermostat", THERMOSTAT_SOFT);

pub const SENSOR: ResourceDescriptor = ResourceDescriptor::new("sensor");

/// Declares `name` as soft although `thermostat.name` is physical.
pub const THERMOSTAT_MISCONFIGURED: ResourceDescriptor = ResourceDescriptor::with_converged(
    "thermostat",
    &[ConvergedColumn::new("name", ConvergedType::Text)],
);

pub fn file_config(dir: &Path) -> DatabaseConfig {
    DatabaseConfig::file(dir.join("hive.db"))
}

pub fn open(config: &DatabaseConfig) -> Connection {
    Connection::open_with_migrations(config, MIGRATIONS).unwrap()
}

pub fn attrs(value: serde_json::Value) -> AttributeMap {
    value.as_object().cloned().unwrap()
}

pub fn thermostat_attrs(serial: &str) -> AttributeMap {
    attrs(serde_json::json!({
        "user_id": 1,
        "name": "Hallway",
        "serial": serial,
    }))
}
