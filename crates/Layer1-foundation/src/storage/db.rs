//! SQLite Storage for plugin data
//!
//! 플러그인 영속 데이터 저장:
//! - Registries: 마켓플레이스 레지스트리
//! - Plugins: 인스턴스 전역 설치 플러그인
//! - Tenant Plugins: 테넌트별 활성화/설정
//!
//! 설정 데이터는 JSON (storage/json/)에서 관리
//!
//! ## Migration System
//!
//! Database schema is versioned. Migrations run automatically on startup.
//! - Version 1: Initial schema (plugin_registries, plugins, tenant_plugins)
//! - Version 2: Index plugins by state and registries by activity

use super::records::{
    NewPlugin, NewRegistry, PluginRecord, PluginState, RegistryRecord, TenantPluginRecord,
};
use super::repository::PluginRepository;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

const REGISTRY_COLUMNS: &str =
    "id, name, url, description, is_official, is_active, last_synced_at, created_at, updated_at";

const PLUGIN_COLUMNS: &str = "id, name, display_name, description, version, source_url, \
     source_type, author, license, homepage, state, granted_permissions, manifest, \
     created_at, updated_at";

const TENANT_PLUGIN_COLUMNS: &str =
    "id, tenant_id, plugin_id, settings, is_enabled, enabled_at, created_at, updated_at";

/// SQLite 기반 플러그인 저장소
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) the database file
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::with_connection(conn)
    }

    /// Create an in-memory storage (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        Ok(storage)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Marketplace registries
            CREATE TABLE IF NOT EXISTS plugin_registries (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL UNIQUE,
                description TEXT,
                is_official INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_synced_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Installed plugins (instance scope)
            CREATE TABLE IF NOT EXISTS plugins (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                description TEXT,
                version TEXT NOT NULL,
                source_url TEXT NOT NULL,
                source_type TEXT NOT NULL CHECK(source_type IN ('github', 'gitlab')),
                author TEXT,
                license TEXT,
                homepage TEXT,
                state TEXT NOT NULL CHECK(state IN ('installed', 'enabled', 'disabled', 'failed')),
                granted_permissions TEXT NOT NULL DEFAULT '[]',
                manifest TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Tenant scope enablement
            CREATE TABLE IF NOT EXISTS tenant_plugins (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                plugin_id TEXT NOT NULL,
                settings TEXT,
                is_enabled INTEGER NOT NULL DEFAULT 0,
                enabled_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, plugin_id),
                FOREIGN KEY (plugin_id) REFERENCES plugins(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tenant_plugins_plugin
                ON tenant_plugins(plugin_id, is_enabled);

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run all pending migrations
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.conn()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// Migration to version 2: lookup indexes for boot reload and search
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_plugins_state ON plugins(state);
            CREATE INDEX IF NOT EXISTS idx_registries_active ON plugin_registries(is_active);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to apply migration 2: {}", e)))
    }

    // ========================================================================
    // Query helpers
    // ========================================================================

    fn query_registries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RegistryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let registries = stmt
            .query_map(params, registry_from_row)
            .map_err(|e| Error::Storage(format!("Failed to query registries: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Failed to read registry row: {}", e)))?;

        Ok(registries)
    }

    fn query_plugins(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<PluginRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let plugins = stmt
            .query_map(params, plugin_from_row)
            .map_err(|e| Error::Storage(format!("Failed to query plugins: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Failed to read plugin row: {}", e)))?;

        Ok(plugins)
    }

    fn query_tenant_plugins(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TenantPluginRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params, tenant_plugin_from_row)
            .map_err(|e| Error::Storage(format!("Failed to query tenant plugins: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Failed to read tenant plugin row: {}", e)))?;

        Ok(rows)
    }

    fn find_tenant_plugin(
        conn: &Connection,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<TenantPluginRecord>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM tenant_plugins WHERE tenant_id = ?1 AND plugin_id = ?2",
                TENANT_PLUGIN_COLUMNS
            ),
            params![tenant_id, plugin_id],
            tenant_plugin_from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get tenant plugin: {}", e)))
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_timestamp(idx, &value)
}

fn get_optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(idx)?;
    value.map(|v| parse_timestamp(idx, &v)).transpose()
}

fn get_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let value: String = row.get(idx)?;
    serde_json::from_str(&value).map_err(|e| conversion_error(idx, e))
}

fn get_optional_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let value: Option<String> = row.get(idx)?;
    value
        .map(|v| serde_json::from_str(&v).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn registry_from_row(row: &Row<'_>) -> rusqlite::Result<RegistryRecord> {
    Ok(RegistryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        is_official: row.get(4)?,
        is_active: row.get(5)?,
        last_synced_at: get_optional_timestamp(row, 6)?,
        created_at: get_timestamp(row, 7)?,
        updated_at: get_timestamp(row, 8)?,
    })
}

fn plugin_from_row(row: &Row<'_>) -> rusqlite::Result<PluginRecord> {
    let source_type: String = row.get(6)?;
    let state: String = row.get(10)?;
    let permissions: String = row.get(11)?;

    Ok(PluginRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        version: row.get(4)?,
        source_url: row.get(5)?,
        source_type: source_type.parse().map_err(|e: String| conversion_error(6, e))?,
        author: row.get(7)?,
        license: row.get(8)?,
        homepage: row.get(9)?,
        state: state.parse().map_err(|e: String| conversion_error(10, e))?,
        granted_permissions: serde_json::from_str(&permissions)
            .map_err(|e| conversion_error(11, e))?,
        manifest: get_json(row, 12)?,
        created_at: get_timestamp(row, 13)?,
        updated_at: get_timestamp(row, 14)?,
    })
}

fn tenant_plugin_from_row(row: &Row<'_>) -> rusqlite::Result<TenantPluginRecord> {
    Ok(TenantPluginRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        plugin_id: row.get(2)?,
        settings: get_optional_json(row, 3)?,
        is_enabled: row.get(4)?,
        enabled_at: get_optional_timestamp(row, 5)?,
        created_at: get_timestamp(row, 6)?,
        updated_at: get_timestamp(row, 7)?,
    })
}

fn tenant_key(tenant_id: &str, plugin_id: &str) -> String {
    format!("{tenant_id}/{plugin_id}")
}

// ============================================================================
// Repository implementation
// ============================================================================

#[async_trait]
impl PluginRepository for Storage {
    // ------------------------------------------------------------------------
    // Registries
    // ------------------------------------------------------------------------

    async fn list_registries(&self) -> Result<Vec<RegistryRecord>> {
        self.query_registries(
            &format!(
                "SELECT {} FROM plugin_registries ORDER BY created_at ASC, name ASC",
                REGISTRY_COLUMNS
            ),
            [],
        )
    }

    async fn list_active_registries(&self) -> Result<Vec<RegistryRecord>> {
        self.query_registries(
            &format!(
                "SELECT {} FROM plugin_registries WHERE is_active = 1 \
                 ORDER BY created_at ASC, name ASC",
                REGISTRY_COLUMNS
            ),
            [],
        )
    }

    async fn get_registry(&self, id: &str) -> Result<Option<RegistryRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM plugin_registries WHERE id = ?1", REGISTRY_COLUMNS),
            params![id],
            registry_from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get registry: {}", e)))
    }

    async fn get_registry_by_name(&self, name: &str) -> Result<Option<RegistryRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM plugin_registries WHERE name = ?1",
                REGISTRY_COLUMNS
            ),
            params![name],
            registry_from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get registry: {}", e)))
    }

    async fn create_registry(&self, registry: NewRegistry) -> Result<RegistryRecord> {
        let conn = self.conn()?;

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM plugin_registries WHERE name = ?1 OR url = ?2)",
                params![registry.name, registry.url],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to check registry: {}", e)))?;
        if exists {
            return Err(Error::Conflict(format!(
                "registry '{}' already exists",
                registry.name
            )));
        }

        let now = Utc::now();
        let record = RegistryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: registry.name,
            url: registry.url,
            description: registry.description,
            is_official: registry.is_official,
            is_active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            r#"
            INSERT INTO plugin_registries (id, name, url, description, is_official, is_active,
                                           created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            "#,
            params![
                record.id,
                record.name,
                record.url,
                record.description,
                record.is_official,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to create registry: {}", e)))?;

        Ok(record)
    }

    async fn update_registry(&self, registry: &RegistryRecord) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE plugin_registries SET
                    name = ?2, url = ?3, description = ?4, is_active = ?5, updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    registry.id,
                    registry.name,
                    registry.url,
                    registry.description,
                    registry.is_active,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to update registry: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("registry", &registry.id));
        }
        Ok(())
    }

    async fn set_registry_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE plugin_registries SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to update registry: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("registry", id));
        }
        Ok(())
    }

    async fn mark_registry_synced(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE plugin_registries SET last_synced_at = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, at.to_rfc3339(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to mark registry synced: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("registry", id));
        }
        Ok(())
    }

    async fn delete_registry(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM plugin_registries WHERE id = ?1", params![id])
            .map_err(|e| Error::Storage(format!("Failed to delete registry: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("registry", id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------------

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        self.query_plugins(
            &format!("SELECT {} FROM plugins ORDER BY name ASC", PLUGIN_COLUMNS),
            [],
        )
    }

    async fn list_plugins_by_state(&self, state: PluginState) -> Result<Vec<PluginRecord>> {
        self.query_plugins(
            &format!(
                "SELECT {} FROM plugins WHERE state = ?1 ORDER BY name ASC",
                PLUGIN_COLUMNS
            ),
            params![state.as_str()],
        )
    }

    async fn get_plugin(&self, id: &str) -> Result<Option<PluginRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM plugins WHERE id = ?1", PLUGIN_COLUMNS),
            params![id],
            plugin_from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get plugin: {}", e)))
    }

    async fn get_plugin_by_name(&self, name: &str) -> Result<Option<PluginRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM plugins WHERE name = ?1", PLUGIN_COLUMNS),
            params![name],
            plugin_from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get plugin: {}", e)))
    }

    async fn plugin_name_exists(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM plugins WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to check plugin name: {}", e)))
    }

    async fn insert_plugin(&self, plugin: NewPlugin) -> Result<PluginRecord> {
        let conn = self.conn()?;

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM plugins WHERE name = ?1)",
                params![plugin.name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to check plugin name: {}", e)))?;
        if exists {
            return Err(Error::Conflict(format!(
                "plugin '{}' is already installed",
                plugin.name
            )));
        }

        let now = Utc::now();
        let record = plugin.into_record(uuid::Uuid::new_v4().to_string(), now);
        let manifest = serde_json::to_string(&record.manifest)?;

        conn.execute(
            r#"
            INSERT INTO plugins (id, name, display_name, description, version, source_url,
                                 source_type, author, license, homepage, state,
                                 granted_permissions, manifest, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, '[]', ?12, ?13, ?13)
            "#,
            params![
                record.id,
                record.name,
                record.display_name,
                record.description,
                record.version,
                record.source_url,
                record.source_type.as_str(),
                record.author,
                record.license,
                record.homepage,
                record.state.as_str(),
                manifest,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to insert plugin: {}", e)))?;

        Ok(record)
    }

    async fn update_plugin_state(&self, id: &str, state: PluginState) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE plugins SET state = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, state.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to update plugin state: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("plugin", id));
        }
        Ok(())
    }

    async fn update_plugin_state_with_permissions(
        &self,
        id: &str,
        state: PluginState,
        permissions: &[String],
    ) -> Result<()> {
        let granted = serde_json::to_string(permissions)?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE plugins SET state = ?2, granted_permissions = ?3, updated_at = ?4
                WHERE id = ?1
                "#,
                params![id, state.as_str(), granted, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to update plugin state: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("plugin", id));
        }
        Ok(())
    }

    async fn delete_plugin(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM plugins WHERE id = ?1", params![id])
            .map_err(|e| Error::Storage(format!("Failed to delete plugin: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("plugin", id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Tenant plugins
    // ------------------------------------------------------------------------

    async fn list_tenant_plugins(&self, tenant_id: &str) -> Result<Vec<TenantPluginRecord>> {
        self.query_tenant_plugins(
            &format!(
                "SELECT {} FROM tenant_plugins WHERE tenant_id = ?1 ORDER BY created_at ASC",
                TENANT_PLUGIN_COLUMNS
            ),
            params![tenant_id],
        )
    }

    async fn list_enabled_tenant_plugins(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<TenantPluginRecord>> {
        self.query_tenant_plugins(
            &format!(
                "SELECT {} FROM tenant_plugins WHERE tenant_id = ?1 AND is_enabled = 1 \
                 ORDER BY created_at ASC",
                TENANT_PLUGIN_COLUMNS
            ),
            params![tenant_id],
        )
    }

    async fn get_tenant_plugin(
        &self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<TenantPluginRecord>> {
        let conn = self.conn()?;
        Self::find_tenant_plugin(&conn, tenant_id, plugin_id)
    }

    async fn upsert_tenant_plugin(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Option<Value>,
        enabled: bool,
    ) -> Result<TenantPluginRecord> {
        let settings = settings.map(|s| serde_json::to_string(&s)).transpose()?;
        let conn = self.conn()?;

        let plugin_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM plugins WHERE id = ?1)",
                params![plugin_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to check plugin: {}", e)))?;
        if !plugin_exists {
            return Err(Error::not_found("plugin", plugin_id));
        }

        let now = Utc::now().to_rfc3339();
        let enabled_at = enabled.then(|| now.clone());

        conn.execute(
            r#"
            INSERT INTO tenant_plugins (id, tenant_id, plugin_id, settings, is_enabled,
                                        enabled_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(tenant_id, plugin_id) DO UPDATE SET
                settings = COALESCE(excluded.settings, tenant_plugins.settings),
                is_enabled = excluded.is_enabled,
                enabled_at = COALESCE(excluded.enabled_at, tenant_plugins.enabled_at),
                updated_at = excluded.updated_at
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                tenant_id,
                plugin_id,
                settings,
                enabled,
                enabled_at,
                now,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert tenant plugin: {}", e)))?;

        Self::find_tenant_plugin(&conn, tenant_id, plugin_id)?
            .ok_or_else(|| Error::not_found("tenant plugin", tenant_key(tenant_id, plugin_id)))
    }

    async fn set_tenant_plugin_enabled(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        enabled: bool,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                r#"
                UPDATE tenant_plugins SET
                    is_enabled = ?3,
                    enabled_at = CASE WHEN ?3 THEN ?4 ELSE enabled_at END,
                    updated_at = ?4
                WHERE tenant_id = ?1 AND plugin_id = ?2
                "#,
                params![tenant_id, plugin_id, enabled, now],
            )
            .map_err(|e| Error::Storage(format!("Failed to update tenant plugin: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found(
                "tenant plugin",
                tenant_key(tenant_id, plugin_id),
            ));
        }
        Ok(())
    }

    async fn get_tenant_plugin_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT settings FROM tenant_plugins WHERE tenant_id = ?1 AND plugin_id = ?2",
                params![tenant_id, plugin_id],
                |row| get_optional_json(row, 0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to get tenant settings: {}", e)))?;

        row.ok_or_else(|| Error::not_found("tenant plugin", tenant_key(tenant_id, plugin_id)))
    }

    async fn update_tenant_plugin_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Value,
    ) -> Result<()> {
        let settings = serde_json::to_string(&settings)?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE tenant_plugins SET settings = ?3, updated_at = ?4
                WHERE tenant_id = ?1 AND plugin_id = ?2
                "#,
                params![tenant_id, plugin_id, settings, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to update tenant settings: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found(
                "tenant plugin",
                tenant_key(tenant_id, plugin_id),
            ));
        }
        Ok(())
    }

    async fn delete_tenant_plugin(&self, tenant_id: &str, plugin_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM tenant_plugins WHERE tenant_id = ?1 AND plugin_id = ?2",
                params![tenant_id, plugin_id],
            )
            .map_err(|e| Error::Storage(format!("Failed to delete tenant plugin: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found(
                "tenant plugin",
                tenant_key(tenant_id, plugin_id),
            ));
        }
        Ok(())
    }

    async fn count_enabled_tenants(&self, plugin_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tenant_plugins WHERE plugin_id = ?1 AND is_enabled = 1",
                params![plugin_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to count tenants: {}", e)))?;

        Ok(count as usize)
    }

    async fn list_plugin_tenants(&self, plugin_id: &str) -> Result<Vec<TenantPluginRecord>> {
        self.query_tenant_plugins(
            &format!(
                "SELECT {} FROM tenant_plugins WHERE plugin_id = ?1 ORDER BY created_at ASC",
                TENANT_PLUGIN_COLUMNS
            ),
            params![plugin_id],
        )
    }

    async fn disable_all_tenants_for_plugin(&self, plugin_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE tenant_plugins SET is_enabled = 0, updated_at = ?2
            WHERE plugin_id = ?1 AND is_enabled = 1
            "#,
            params![plugin_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Storage(format!("Failed to disable tenant plugins: {}", e)))
    }
}
