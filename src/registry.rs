//! Relational registry of known devices, backed by DuckDB.

use duckdb::{params, Connection, Row};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    models::{Device, DeviceUpdate},
    Result, TelemetryError,
};

pub const MAX_PAGE_SIZE: u32 = 100;

const SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS devices_seq;
    CREATE TABLE IF NOT EXISTS devices (
        id BIGINT NOT NULL DEFAULT nextval('devices_seq'),
        device_id VARCHAR PRIMARY KEY,
        location VARCHAR NOT NULL,
        name VARCHAR NOT NULL,
        quantity_measured VARCHAR NOT NULL
    );
";

const COLUMNS: &str = "device_id, location, name, quantity_measured";

pub struct DeviceRegistry {
    db: Mutex<Connection>,
}

impl DeviceRegistry {
    /// Opens (or creates) the registry at `path`. `:memory:` gives a
    /// private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(SCHEMA)?;
        info!("Device registry ready at {}", path);

        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub async fn create(&self, device: Device) -> Result<Device> {
        if device.device_id.is_empty() {
            return Err(TelemetryError::Validation("device_id must not be empty".to_string()));
        }

        let conn = self.db.lock().await;
        if fetch(&conn, &device.device_id)?.is_some() {
            return Err(TelemetryError::BadRequest("Device already exists".to_string()));
        }

        conn.execute(
            "INSERT INTO devices (device_id, location, name, quantity_measured)
             VALUES (?, ?, ?, ?)",
            params![
                device.device_id,
                device.location,
                device.name,
                device.quantity_measured
            ],
        )?;
        info!(device_id = %device.device_id, "Device registered");

        Ok(device)
    }

    pub async fn list(&self, offset: u32, limit: u32) -> Result<Vec<Device>> {
        if limit > MAX_PAGE_SIZE {
            return Err(TelemetryError::BadRequest(format!(
                "limit must be at most {}",
                MAX_PAGE_SIZE
            )));
        }

        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM devices ORDER BY id LIMIT {} OFFSET {}",
            COLUMNS, limit, offset
        ))?;
        let devices = stmt
            .query_map(params![], to_device)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(devices)
    }

    pub async fn get(&self, device_id: &str) -> Result<Device> {
        let conn = self.db.lock().await;
        fetch(&conn, device_id)?.ok_or_else(not_found)
    }

    pub async fn update(&self, device_id: &str, update: DeviceUpdate) -> Result<Device> {
        let conn = self.db.lock().await;
        if fetch(&conn, device_id)?.is_none() {
            return Err(not_found());
        }

        conn.execute(
            "UPDATE devices
             SET name = COALESCE(?, name), location = COALESCE(?, location)
             WHERE device_id = ?",
            params![update.name, update.location, device_id],
        )?;

        fetch(&conn, device_id)?.ok_or_else(not_found)
    }

    pub async fn delete(&self, device_id: &str) -> Result<()> {
        let conn = self.db.lock().await;
        let removed = conn.execute("DELETE FROM devices WHERE device_id = ?", params![device_id])?;
        if removed == 0 {
            return Err(not_found());
        }
        info!(device_id, "Device removed");
        Ok(())
    }
}

fn fetch(conn: &Connection, device_id: &str) -> Result<Option<Device>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM devices WHERE device_id = ?",
        COLUMNS
    ))?;
    let mut rows = stmt.query(params![device_id])?;

    match rows.next()? {
        Some(row) => Ok(Some(to_device(row)?)),
        None => Ok(None),
    }
}

fn to_device(row: &Row<'_>) -> duckdb::Result<Device> {
    Ok(Device {
        device_id: row.get(0)?,
        location: row.get(1)?,
        name: row.get(2)?,
        quantity_measured: row.get(3)?,
    })
}

fn not_found() -> TelemetryError {
    TelemetryError::NotFound("Device not found".to_string())
}
