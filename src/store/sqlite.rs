//! Durable `PersistentStore` backed by a single embedded SQLite file.
//! Connection setup follows the pattern this lineage's
//! `ConnectionManager` uses for its MySQL pools — resolve the URI, open
//! a pool, make sure the schema exists — simplified because there is
//! exactly one database file here, not one per platform.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::{StoreError, StoreResult};
use crate::types::{
    BlockData, BlockState, EventRecord, ExternalIp, ExternalSubnet, FirmwareType, Instance,
    InstanceLastStat, InstanceState, MappedIp, NodeLastStat, Pool, QuotaDetail, Severity,
    SourceType, StorageAttachment, StorageResource, Tenant, UsageSample, VmType, Workload,
    WorkloadResource,
};

use super::{LoadedState, PersistentStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// `uri` is the opaque `persistent_uri` from `DatastoreConfig` — a
    /// filesystem path (or `sqlite::memory:` for tests), interpreted
    /// entirely by this backend.
    pub async fn connect(uri: &str) -> StoreResult<Self> {
        info!("connecting to SQLite store at {}", uri);
        let options = SqliteConnectOptions::from_str(uri)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn replace_workload_resources(
        &self,
        workload_id: &str,
        resources: &[WorkloadResource],
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM workload_resources WHERE workload_id = ?")
            .bind(workload_id)
            .execute(&self.pool)
            .await?;
        for r in resources {
            sqlx::query(
                "INSERT INTO workload_resources (workload_id, name, value, mandatory) VALUES (?, ?, ?, ?)",
            )
            .bind(workload_id)
            .bind(&r.name)
            .bind(r.value)
            .bind(r.mandatory)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn replace_workload_storage(
        &self,
        workload_id: &str,
        storage: &[StorageResource],
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM workload_storage WHERE workload_id = ?")
            .bind(workload_id)
            .execute(&self.pool)
            .await?;
        for s in storage {
            let source_type = match s.source_type {
                SourceType::Empty => "empty",
                SourceType::ImageService => "image_service",
                SourceType::VolumeService => "volume_service",
            };
            sqlx::query(
                r#"INSERT INTO workload_storage
                    (workload_id, existing_volume_id, size_gib, bootable, ephemeral, source_type, source_id, tag)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(workload_id)
            .bind(&s.existing_volume_id)
            .bind(s.size_gib)
            .bind(s.bootable)
            .bind(s.ephemeral)
            .bind(source_type)
            .bind(&s.source_id)
            .bind(&s.tag)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

fn vm_type_str(t: VmType) -> &'static str {
    match t {
        VmType::Qemu => "qemu",
        VmType::Container => "container",
    }
}

fn parse_vm_type(s: &str) -> VmType {
    match s {
        "container" => VmType::Container,
        _ => VmType::Qemu,
    }
}

fn parse_source_type(s: &str) -> SourceType {
    match s {
        "image_service" => SourceType::ImageService,
        "volume_service" => SourceType::VolumeService,
        _ => SourceType::Empty,
    }
}

fn instance_state_str(s: InstanceState) -> &'static str {
    match s {
        InstanceState::Pending => "pending",
        InstanceState::Running => "running",
        InstanceState::Stopped => "stopped",
        InstanceState::Exited => "exited",
    }
}

fn parse_instance_state(s: &str) -> InstanceState {
    match s {
        "running" => InstanceState::Running,
        "stopped" => InstanceState::Stopped,
        "exited" => InstanceState::Exited,
        _ => InstanceState::Pending,
    }
}

fn block_state_str(s: BlockState) -> &'static str {
    match s {
        BlockState::Available => "available",
        BlockState::Attaching => "attaching",
        BlockState::InUse => "in_use",
        BlockState::Detaching => "detaching",
    }
}

fn parse_block_state(s: &str) -> BlockState {
    match s {
        "attaching" => BlockState::Attaching,
        "in_use" => BlockState::InUse,
        "detaching" => BlockState::Detaching,
        _ => BlockState::Available,
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Info => "info",
        Severity::Warn => "warn",
        Severity::Error => "error",
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "warn" => Severity::Warn,
        "error" => Severity::Error,
        _ => Severity::Info,
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn initialize(&self) -> StoreResult<()> {
        for statement in super::schema::split_statements(super::schema::INIT_SCHEMA) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        info!("SQLite schema initialized");
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn load_all(&self) -> StoreResult<LoadedState> {
        let mut state = LoadedState::default();

        let tenant_rows = sqlx::query("SELECT id, name, cnci_id, cnci_mac, cnci_ip FROM tenants")
            .fetch_all(&self.pool)
            .await?;
        let network_rows =
            sqlx::query("SELECT tenant_id, subnet_index, host FROM tenant_network")
                .fetch_all(&self.pool)
                .await?;
        let instance_rows_all =
            sqlx::query("SELECT id, tenant_id FROM instances").fetch_all(&self.pool).await?;
        let block_rows_all =
            sqlx::query("SELECT id, tenant_id FROM block_data").fetch_all(&self.pool).await?;
        let workload_rows_all =
            sqlx::query("SELECT id, tenant_id FROM workload_template")
                .fetch_all(&self.pool)
                .await?;

        for row in &tenant_rows {
            let id: String = row.try_get("id")?;
            let mut tenant = Tenant::new(
                id.clone(),
                row.try_get("name")?,
                row.try_get("cnci_mac")?,
            );
            tenant.cnci_id = row.try_get("cnci_id")?;
            tenant.cnci_ip = row.try_get("cnci_ip")?;

            for nrow in &network_rows {
                let tid: String = nrow.try_get("tenant_id")?;
                if tid != id {
                    continue;
                }
                let subnet: i64 = nrow.try_get("subnet_index")?;
                let host: i64 = nrow.try_get("host")?;
                let subnet = subnet as u32;
                if !tenant.owned_subnets.contains(&subnet) {
                    tenant.owned_subnets.push(subnet);
                }
                tenant
                    .network_map
                    .entry(subnet)
                    .or_default()
                    .insert(host as u8);
            }
            tenant.owned_subnets.sort_unstable();

            for irow in &instance_rows_all {
                let tid: String = irow.try_get("tenant_id")?;
                if tid == id {
                    tenant.instances.insert(irow.try_get("id")?);
                }
            }
            for brow in &block_rows_all {
                let tid: String = brow.try_get("tenant_id")?;
                if tid == id {
                    tenant.block_devices.insert(brow.try_get("id")?);
                }
            }
            for wrow in &workload_rows_all {
                let tid: String = wrow.try_get("tenant_id")?;
                if tid == id {
                    tenant.workloads.push(wrow.try_get("id")?);
                }
            }

            state.tenants.push(tenant);
        }

        let workload_rows = sqlx::query(
            "SELECT id, tenant_id, description, firmware_type, vm_type, image_ref, cloud_init, is_cnci FROM workload_template",
        )
        .fetch_all(&self.pool)
        .await?;
        let resource_rows =
            sqlx::query("SELECT workload_id, name, value, mandatory FROM workload_resources")
                .fetch_all(&self.pool)
                .await?;
        let storage_rows = sqlx::query(
            "SELECT workload_id, existing_volume_id, size_gib, bootable, ephemeral, source_type, source_id, tag FROM workload_storage",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &workload_rows {
            let id: String = row.try_get("id")?;
            let resources = resource_rows
                .iter()
                .filter(|r| r.try_get::<String, _>("workload_id").unwrap_or_default() == id)
                .map(|r| -> StoreResult<WorkloadResource> {
                    Ok(WorkloadResource {
                        name: r.try_get("name")?,
                        value: r.try_get("value")?,
                        mandatory: r.try_get("mandatory")?,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            let storage = storage_rows
                .iter()
                .filter(|r| r.try_get::<String, _>("workload_id").unwrap_or_default() == id)
                .map(|r| -> StoreResult<StorageResource> {
                    Ok(StorageResource {
                        existing_volume_id: r.try_get("existing_volume_id")?,
                        size_gib: r.try_get("size_gib")?,
                        bootable: r.try_get("bootable")?,
                        ephemeral: r.try_get("ephemeral")?,
                        source_type: parse_source_type(&r.try_get::<String, _>("source_type")?),
                        source_id: r.try_get("source_id")?,
                        tag: r.try_get("tag")?,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            let firmware_type: FirmwareType = row.try_get("firmware_type")?;
            state.workloads.push(Workload {
                id,
                tenant_id: row.try_get("tenant_id")?,
                description: row.try_get("description")?,
                firmware_type,
                vm_type: parse_vm_type(&row.try_get::<String, _>("vm_type")?),
                image_ref: row.try_get("image_ref")?,
                cloud_init: row.try_get("cloud_init")?,
                resources,
                storage,
                is_cnci: row.try_get("is_cnci")?,
            });
        }

        let instance_rows = sqlx::query(
            "SELECT id, tenant_id, workload_id, name, mac, ip, subnet_index, node_id, state, ssh_ip, ssh_port, usage_json, created_at FROM instances",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in instance_rows {
            let usage_json: String = row.try_get("usage_json")?;
            let usage: HashMap<String, i64> =
                serde_json::from_str(&usage_json).unwrap_or_default();
            let subnet_index: i64 = row.try_get("subnet_index")?;
            state.instances.push(Instance {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                workload_id: row.try_get("workload_id")?,
                name: row.try_get("name")?,
                mac: row.try_get("mac")?,
                ip: row.try_get("ip")?,
                subnet_index: subnet_index as u32,
                node_id: row.try_get("node_id")?,
                state: parse_instance_state(&row.try_get::<String, _>("state")?),
                ssh_ip: row.try_get("ssh_ip")?,
                ssh_port: row.try_get::<i64, _>("ssh_port")? as u16,
                usage,
                created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?),
            });
        }

        let block_rows = sqlx::query(
            "SELECT id, tenant_id, size_gib, state, created_at, name, description FROM block_data",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in block_rows {
            state.block_devices.push(BlockData {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                size_gib: row.try_get("size_gib")?,
                state: parse_block_state(&row.try_get::<String, _>("state")?),
                created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?),
                name: row.try_get("name")?,
                description: row.try_get("description")?,
            });
        }

        let attach_rows =
            sqlx::query("SELECT id, instance_id, volume_id, ephemeral, boot FROM attachments")
                .fetch_all(&self.pool)
                .await?;
        for row in attach_rows {
            state.attachments.push(StorageAttachment {
                id: row.try_get("id")?,
                instance_id: row.try_get("instance_id")?,
                volume_id: row.try_get("volume_id")?,
                ephemeral: row.try_get("ephemeral")?,
                boot: row.try_get("boot")?,
            });
        }

        let pool_rows = sqlx::query("SELECT id, name, free, total FROM pools")
            .fetch_all(&self.pool)
            .await?;
        let subnet_rows = sqlx::query("SELECT id, pool_id, cidr FROM subnet_pool")
            .fetch_all(&self.pool)
            .await?;
        let ip_rows = sqlx::query("SELECT id, pool_id, address FROM address_pool")
            .fetch_all(&self.pool)
            .await?;
        for row in pool_rows {
            let id: String = row.try_get("id")?;
            let subnets = subnet_rows
                .iter()
                .filter(|r| r.try_get::<String, _>("pool_id").unwrap_or_default() == id)
                .map(|r| -> StoreResult<ExternalSubnet> {
                    Ok(ExternalSubnet {
                        id: r.try_get("id")?,
                        cidr: r.try_get("cidr")?,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            let individual_ips = ip_rows
                .iter()
                .filter(|r| r.try_get::<String, _>("pool_id").unwrap_or_default() == id)
                .map(|r| -> StoreResult<ExternalIp> {
                    Ok(ExternalIp {
                        id: r.try_get("id")?,
                        address: r.try_get("address")?,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            state.pools.push(Pool {
                id,
                name: row.try_get("name")?,
                free: row.try_get("free")?,
                total: row.try_get("total")?,
                subnets,
                individual_ips,
            });
        }

        let mapped_rows = sqlx::query(
            "SELECT id, external_ip, internal_ip, instance_id, tenant_id, pool_id, pool_name FROM mapped_ips",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in mapped_rows {
            state.mapped_ips.push(MappedIp {
                id: row.try_get("id")?,
                external_ip: row.try_get("external_ip")?,
                internal_ip: row.try_get("internal_ip")?,
                instance_id: row.try_get("instance_id")?,
                tenant_id: row.try_get("tenant_id")?,
                pool_id: row.try_get("pool_id")?,
                pool_name: row.try_get("pool_name")?,
            });
        }

        let quota_rows = sqlx::query("SELECT tenant_id, name, value FROM quotas")
            .fetch_all(&self.pool)
            .await?;
        for row in quota_rows {
            state.quotas.push(QuotaDetail {
                tenant_id: row.try_get("tenant_id")?,
                name: row.try_get("name")?,
                value: row.try_get("value")?,
            });
        }

        let node_rows = sqlx::query(
            "SELECT node_id, hostname, mem_total_mib, mem_available_mib, disk_total_mib, disk_available_mib, load, cpu_count, updated_at FROM node_statistics",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in node_rows {
            state.node_last_stats.push(NodeLastStat {
                node_id: row.try_get("node_id")?,
                hostname: row.try_get("hostname")?,
                mem_total_mib: row.try_get("mem_total_mib")?,
                mem_available_mib: row.try_get("mem_available_mib")?,
                disk_total_mib: row.try_get("disk_total_mib")?,
                disk_available_mib: row.try_get("disk_available_mib")?,
                load: row.try_get("load")?,
                cpu_count: row.try_get("cpu_count")?,
                updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?),
            });
        }

        let instance_stat_rows = sqlx::query(
            "SELECT instance_id, cpu_units, mem_mib, disk_mib, updated_at FROM instance_statistics",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in instance_stat_rows {
            state.instance_last_stats.push(InstanceLastStat {
                instance_id: row.try_get("instance_id")?,
                cpu_units: row.try_get("cpu_units")?,
                mem_mib: row.try_get("mem_mib")?,
                disk_mib: row.try_get("disk_mib")?,
                updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?),
            });
        }

        let event_rows = sqlx::query("SELECT timestamp, tenant_id, severity, message FROM log")
            .fetch_all(&self.pool)
            .await?;
        for row in event_rows {
            state.events.push(EventRecord {
                timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?),
                tenant_id: row.try_get("tenant_id")?,
                severity: parse_severity(&row.try_get::<String, _>("severity")?),
                message: row.try_get("message")?,
            });
        }

        Ok(state)
    }

    async fn save_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tenants (id, name, cnci_id, cnci_mac, cnci_ip) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, cnci_id = excluded.cnci_id,
                cnci_mac = excluded.cnci_mac, cnci_ip = excluded.cnci_ip",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.cnci_id)
        .bind(&tenant.cnci_mac)
        .bind(&tenant.cnci_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_tenant(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM tenants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_workload(&self, workload: &Workload) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO workload_template
                (id, tenant_id, description, firmware_type, vm_type, image_ref, cloud_init, is_cnci)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET tenant_id = excluded.tenant_id,
                description = excluded.description, firmware_type = excluded.firmware_type,
                vm_type = excluded.vm_type, image_ref = excluded.image_ref,
                cloud_init = excluded.cloud_init, is_cnci = excluded.is_cnci"#,
        )
        .bind(&workload.id)
        .bind(&workload.tenant_id)
        .bind(&workload.description)
        .bind(&workload.firmware_type)
        .bind(vm_type_str(workload.vm_type))
        .bind(&workload.image_ref)
        .bind(&workload.cloud_init)
        .bind(workload.is_cnci)
        .execute(&self.pool)
        .await?;

        self.replace_workload_resources(&workload.id, &workload.resources)
            .await?;
        self.replace_workload_storage(&workload.id, &workload.storage)
            .await?;
        Ok(())
    }

    async fn delete_workload(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM workload_resources WHERE workload_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM workload_storage WHERE workload_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM workload_template WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_instance(&self, instance: &Instance) -> StoreResult<()> {
        let usage_json = serde_json::to_string(&instance.usage)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"INSERT INTO instances
                (id, tenant_id, workload_id, name, mac, ip, subnet_index, node_id, state, ssh_ip, ssh_port, usage_json, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET tenant_id = excluded.tenant_id,
                workload_id = excluded.workload_id, name = excluded.name, mac = excluded.mac,
                ip = excluded.ip, subnet_index = excluded.subnet_index, node_id = excluded.node_id,
                state = excluded.state, ssh_ip = excluded.ssh_ip, ssh_port = excluded.ssh_port,
                usage_json = excluded.usage_json"#,
        )
        .bind(&instance.id)
        .bind(&instance.tenant_id)
        .bind(&instance.workload_id)
        .bind(&instance.name)
        .bind(&instance.mac)
        .bind(&instance.ip)
        .bind(instance.subnet_index as i64)
        .bind(&instance.node_id)
        .bind(instance_state_str(instance.state))
        .bind(&instance.ssh_ip)
        .bind(instance.ssh_port as i64)
        .bind(usage_json)
        .bind(instance.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_tenant_ip(&self, tenant_id: &str, subnet_index: u32, host: u8) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO tenant_network (tenant_id, subnet_index, host) VALUES (?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(subnet_index as i64)
        .bind(host as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_tenant_ip(
        &self,
        tenant_id: &str,
        subnet_index: u32,
        host: u8,
    ) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM tenant_network WHERE tenant_id = ? AND subnet_index = ? AND host = ?",
        )
        .bind(tenant_id)
        .bind(subnet_index as i64)
        .bind(host as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_block_data(&self, block: &BlockData) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO block_data (id, tenant_id, size_gib, state, created_at, name, description)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET tenant_id = excluded.tenant_id,
                size_gib = excluded.size_gib, state = excluded.state, name = excluded.name,
                description = excluded.description"#,
        )
        .bind(&block.id)
        .bind(&block.tenant_id)
        .bind(block.size_gib)
        .bind(block_state_str(block.state))
        .bind(block.created_at.to_rfc3339())
        .bind(&block.name)
        .bind(&block.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_block_data(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM block_data WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_attachment(&self, attachment: &StorageAttachment) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO attachments (id, instance_id, volume_id, ephemeral, boot) VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET instance_id = excluded.instance_id,
                volume_id = excluded.volume_id, ephemeral = excluded.ephemeral, boot = excluded.boot"#,
        )
        .bind(&attachment.id)
        .bind(&attachment.instance_id)
        .bind(&attachment.volume_id)
        .bind(attachment.ephemeral)
        .bind(attachment.boot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_attachment(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_pool(&self, pool: &Pool) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO pools (id, name, free, total) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, free = excluded.free, total = excluded.total",
        )
        .bind(&pool.id)
        .bind(&pool.name)
        .bind(pool.free)
        .bind(pool.total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pool(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM subnet_pool WHERE pool_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM address_pool WHERE pool_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM pools WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_external_subnet(&self, pool_id: &str, subnet: &ExternalSubnet) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO subnet_pool (id, pool_id, cidr) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET cidr = excluded.cidr",
        )
        .bind(&subnet.id)
        .bind(pool_id)
        .bind(&subnet.cidr)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_external_subnet(&self, _pool_id: &str, subnet_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM subnet_pool WHERE id = ?")
            .bind(subnet_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_external_ip(&self, pool_id: &str, ip: &ExternalIp) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO address_pool (id, pool_id, address) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET address = excluded.address",
        )
        .bind(&ip.id)
        .bind(pool_id)
        .bind(&ip.address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_external_ip(&self, _pool_id: &str, ip_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM address_pool WHERE id = ?")
            .bind(ip_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_mapped_ip(&self, mapping: &MappedIp) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO mapped_ips (id, external_ip, internal_ip, instance_id, tenant_id, pool_id, pool_name)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&mapping.id)
        .bind(&mapping.external_ip)
        .bind(&mapping.internal_ip)
        .bind(&mapping.instance_id)
        .bind(&mapping.tenant_id)
        .bind(&mapping.pool_id)
        .bind(&mapping.pool_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_mapped_ip(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM mapped_ips WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_quota(&self, quota: &QuotaDetail) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO quotas (tenant_id, name, value) VALUES (?, ?, ?)
             ON CONFLICT(tenant_id, name) DO UPDATE SET value = excluded.value",
        )
        .bind(&quota.tenant_id)
        .bind(&quota.name)
        .bind(quota.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_quotas(&self, tenant_id: &str) -> StoreResult<Vec<QuotaDetail>> {
        let rows = sqlx::query("SELECT tenant_id, name, value FROM quotas WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(QuotaDetail {
                tenant_id: row.try_get("tenant_id")?,
                name: row.try_get("name")?,
                value: row.try_get("value")?,
            });
        }
        Ok(out)
    }

    async fn upsert_node_last_stat(&self, stat: &NodeLastStat) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO node_statistics
                (node_id, hostname, mem_total_mib, mem_available_mib, disk_total_mib, disk_available_mib, load, cpu_count, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(node_id) DO UPDATE SET hostname = excluded.hostname,
                mem_total_mib = excluded.mem_total_mib, mem_available_mib = excluded.mem_available_mib,
                disk_total_mib = excluded.disk_total_mib, disk_available_mib = excluded.disk_available_mib,
                load = excluded.load, cpu_count = excluded.cpu_count, updated_at = excluded.updated_at"#,
        )
        .bind(&stat.node_id)
        .bind(&stat.hostname)
        .bind(stat.mem_total_mib)
        .bind(stat.mem_available_mib)
        .bind(stat.disk_total_mib)
        .bind(stat.disk_available_mib)
        .bind(stat.load)
        .bind(stat.cpu_count)
        .bind(stat.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_node_stat_sample(&self, stat: &NodeLastStat) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO node_statistics_history
                (node_id, hostname, mem_total_mib, mem_available_mib, disk_total_mib, disk_available_mib, load, cpu_count, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&stat.node_id)
        .bind(&stat.hostname)
        .bind(stat.mem_total_mib)
        .bind(stat.mem_available_mib)
        .bind(stat.disk_total_mib)
        .bind(stat.disk_available_mib)
        .bind(stat.load)
        .bind(stat.cpu_count)
        .bind(stat.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_instance_last_stat(&self, stat: &InstanceLastStat) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO instance_statistics (instance_id, cpu_units, mem_mib, disk_mib, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(instance_id) DO UPDATE SET cpu_units = excluded.cpu_units,
                mem_mib = excluded.mem_mib, disk_mib = excluded.disk_mib, updated_at = excluded.updated_at"#,
        )
        .bind(&stat.instance_id)
        .bind(stat.cpu_units)
        .bind(stat.mem_mib)
        .bind(stat.disk_mib)
        .bind(stat.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_tenant_usage_sample(
        &self,
        tenant_id: &str,
        sample: &UsageSample,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tenant_usage_history (tenant_id, timestamp, vcpu, mem_mib, disk_mib) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(sample.timestamp.to_rfc3339())
        .bind(sample.vcpu)
        .bind(sample.mem_mib)
        .bind(sample.disk_mib)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_tenant_usage_history(&self, tenant_id: &str) -> StoreResult<Vec<UsageSample>> {
        let rows = sqlx::query(
            "SELECT timestamp, vcpu, mem_mib, disk_mib FROM tenant_usage_history WHERE tenant_id = ? ORDER BY timestamp ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(UsageSample {
                timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?),
                vcpu: row.try_get("vcpu")?,
                mem_mib: row.try_get("mem_mib")?,
                disk_mib: row.try_get("disk_mib")?,
            });
        }
        Ok(out)
    }

    async fn append_event(&self, event: &EventRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO log (timestamp, tenant_id, severity, message) VALUES (?, ?, ?, ?)",
        )
        .bind(event.timestamp.to_rfc3339())
        .bind(&event.tenant_id)
        .bind(severity_str(event.severity))
        .bind(&event.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_events(&self, tenant_id: &str) -> StoreResult<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT timestamp, tenant_id, severity, message FROM log WHERE tenant_id = ? ORDER BY timestamp ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(EventRecord {
                timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?),
                tenant_id: row.try_get("tenant_id")?,
                severity: parse_severity(&row.try_get::<String, _>("severity")?),
                message: row.try_get("message")?,
            });
        }
        Ok(out)
    }

    async fn clear_events(&self, tenant_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM log WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
