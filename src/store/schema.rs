//! DDL for the embedded SQLite backend: tenants, instances,
//! tenant-network, workload-template/resources/storage, block-data,
//! attachments, pools, subnet-pool, address-pool, mapped-ips, quotas,
//! node/instance statistics, and the event log.
//!
//! Kept as one embedded script rather than a numbered migrations
//! directory — this backend has exactly one schema version, so there
//! is nothing to step through yet.

pub const INIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    cnci_id     TEXT NOT NULL DEFAULT '',
    cnci_mac    TEXT NOT NULL,
    cnci_ip     TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS tenant_network (
    tenant_id    TEXT NOT NULL,
    subnet_index INTEGER NOT NULL,
    host         INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, subnet_index, host)
);

CREATE TABLE IF NOT EXISTS workload_template (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL,
    description   TEXT NOT NULL,
    firmware_type TEXT NOT NULL,
    vm_type       TEXT NOT NULL,
    image_ref     TEXT NOT NULL,
    cloud_init    TEXT NOT NULL,
    is_cnci       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS workload_resources (
    workload_id TEXT NOT NULL,
    name        TEXT NOT NULL,
    value       INTEGER NOT NULL,
    mandatory   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS workload_storage (
    workload_id        TEXT NOT NULL,
    existing_volume_id  TEXT,
    size_gib           INTEGER NOT NULL,
    bootable           INTEGER NOT NULL,
    ephemeral          INTEGER NOT NULL,
    source_type        TEXT NOT NULL,
    source_id          TEXT NOT NULL,
    tag                TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instances (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL,
    workload_id   TEXT NOT NULL,
    name          TEXT,
    mac           TEXT NOT NULL,
    ip            TEXT NOT NULL,
    subnet_index  INTEGER NOT NULL,
    node_id       TEXT NOT NULL DEFAULT '',
    state         TEXT NOT NULL,
    ssh_ip        TEXT NOT NULL DEFAULT '',
    ssh_port      INTEGER NOT NULL DEFAULT 0,
    usage_json    TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS block_data (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    size_gib    INTEGER NOT NULL,
    state       TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    name        TEXT NOT NULL,
    description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attachments (
    id          TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL,
    volume_id   TEXT NOT NULL,
    ephemeral   INTEGER NOT NULL,
    boot        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pools (
    id    TEXT PRIMARY KEY,
    name  TEXT NOT NULL,
    free  INTEGER NOT NULL,
    total INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subnet_pool (
    id      TEXT PRIMARY KEY,
    pool_id TEXT NOT NULL,
    cidr    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS address_pool (
    id      TEXT PRIMARY KEY,
    pool_id TEXT NOT NULL,
    address TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mapped_ips (
    id          TEXT PRIMARY KEY,
    external_ip TEXT NOT NULL UNIQUE,
    internal_ip TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    tenant_id   TEXT NOT NULL,
    pool_id     TEXT NOT NULL,
    pool_name   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quotas (
    tenant_id TEXT NOT NULL,
    name      TEXT NOT NULL,
    value     INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS node_statistics (
    node_id            TEXT PRIMARY KEY,
    hostname           TEXT NOT NULL,
    mem_total_mib      INTEGER NOT NULL,
    mem_available_mib  INTEGER NOT NULL,
    disk_total_mib     INTEGER NOT NULL,
    disk_available_mib INTEGER NOT NULL,
    load               REAL NOT NULL,
    cpu_count          INTEGER NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS node_statistics_history (
    node_id            TEXT NOT NULL,
    hostname           TEXT NOT NULL,
    mem_total_mib      INTEGER NOT NULL,
    mem_available_mib  INTEGER NOT NULL,
    disk_total_mib     INTEGER NOT NULL,
    disk_available_mib INTEGER NOT NULL,
    load               REAL NOT NULL,
    cpu_count          INTEGER NOT NULL,
    recorded_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instance_statistics (
    instance_id TEXT PRIMARY KEY,
    cpu_units   INTEGER NOT NULL,
    mem_mib     INTEGER NOT NULL,
    disk_mib    INTEGER NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tenant_usage_history (
    tenant_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    vcpu      INTEGER NOT NULL,
    mem_mib   INTEGER NOT NULL,
    disk_mib  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS frame_statistics (
    label               TEXT NOT NULL,
    frame_type          TEXT NOT NULL,
    operand             TEXT NOT NULL,
    started_at          TEXT NOT NULL,
    finished_at         TEXT,
    transit_json        TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS trace_data (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    payload     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS log (
    timestamp TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    severity  TEXT NOT NULL,
    message   TEXT NOT NULL
);
"#;

/// Splits an embedded script into individual statements. SQLite has no
/// `DELIMITER` concept, so unlike the MySQL-era splitter this lineage
/// used for versioned migrations, a plain `;` split is sufficient —
/// none of the DDL above contains a semicolon inside a string literal.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
