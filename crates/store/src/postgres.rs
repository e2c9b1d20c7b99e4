use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, ResourceId};
use domain::{
    L3Network, Listener, LoadBalancer, NetworkServiceRef, Port, Vip, VipRef, VmNic, VmNicRef,
    VmNicStatus,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{Result, StoreError, store::ResourceStore};

/// Constraint violation reported by PostgreSQL for a write.
enum Violation {
    Unique,
    ForeignKey(Option<String>),
}

fn violation(e: &sqlx::Error) -> Option<Violation> {
    let sqlx::Error::Database(db_err) = e else {
        return None;
    };
    if db_err.is_unique_violation() {
        Some(Violation::Unique)
    } else if db_err.is_foreign_key_violation() {
        Some(Violation::ForeignKey(db_err.constraint().map(str::to_string)))
    } else {
        None
    }
}

/// PostgreSQL-backed resource store implementation.
#[derive(Clone)]
pub struct PostgresResourceStore {
    pool: PgPool,
}

impl PostgresResourceStore {
    /// Creates a new PostgreSQL resource store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_load_balancer(row: PgRow) -> Result<LoadBalancer> {
        Ok(LoadBalancer {
            id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            provider_type: row.try_get("provider_type")?,
            vip_refs: Vec::new(),
            vm_nic_refs: Vec::new(),
            listeners: Vec::new(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_listener(row: PgRow) -> Result<Listener> {
        let protocol: String = row.try_get("protocol")?;
        Ok(Listener {
            id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id")?),
            load_balancer_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("load_balancer_id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            instance_port: Port::new(i64::from(row.try_get::<i32, _>("instance_port")?))?,
            load_balancer_port: Port::new(i64::from(
                row.try_get::<i32, _>("load_balancer_port")?,
            ))?,
            protocol: protocol.parse()?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_vip_ref(row: PgRow) -> Result<VipRef> {
        Ok(VipRef {
            id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id")?),
            load_balancer_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("load_balancer_id")?),
            vip_id: ResourceId::from_uuid(row.try_get::<Uuid, _>("vip_id")?),
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_vm_nic_ref(row: PgRow) -> Result<VmNicRef> {
        let status: String = row.try_get("status")?;
        Ok(VmNicRef {
            id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id")?),
            load_balancer_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("load_balancer_id")?),
            vm_nic_id: ResourceId::from_uuid(row.try_get::<Uuid, _>("vm_nic_id")?),
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_vip(row: PgRow) -> Result<Vip> {
        Ok(Vip {
            id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            ip: row.try_get("ip")?,
            l3_network_id: ResourceId::from_uuid(row.try_get::<Uuid, _>("l3_network_id")?),
            service_provider: row.try_get("service_provider")?,
            use_for: row.try_get("use_for")?,
        })
    }

    fn row_to_vm_nic(row: PgRow) -> Result<VmNic> {
        Ok(VmNic {
            id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id")?),
            vm_instance_id: ResourceId::from_uuid(row.try_get::<Uuid, _>("vm_instance_id")?),
            l3_network_id: ResourceId::from_uuid(row.try_get::<Uuid, _>("l3_network_id")?),
            ip: row.try_get("ip")?,
            mac: row.try_get("mac")?,
        })
    }

    /// Fills in the refs and listeners of a load balancer row.
    async fn load_children(&self, lb: &mut LoadBalancer) -> Result<()> {
        let id = lb.id.as_uuid();

        let rows = sqlx::query(
            r#"
            SELECT id, load_balancer_id, name, description, instance_port, load_balancer_port, protocol, created_at
            FROM load_balancer_listeners
            WHERE load_balancer_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        lb.listeners = rows
            .into_iter()
            .map(Self::row_to_listener)
            .collect::<Result<_>>()?;

        let rows = sqlx::query(
            r#"
            SELECT id, load_balancer_id, vip_id, created_at
            FROM load_balancer_vip_refs
            WHERE load_balancer_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        lb.vip_refs = rows
            .into_iter()
            .map(Self::row_to_vip_ref)
            .collect::<Result<_>>()?;

        let rows = sqlx::query(
            r#"
            SELECT id, load_balancer_id, vm_nic_id, status, created_at, updated_at
            FROM load_balancer_vm_nic_refs
            WHERE load_balancer_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        lb.vm_nic_refs = rows
            .into_iter()
            .map(Self::row_to_vm_nic_ref)
            .collect::<Result<_>>()?;

        Ok(())
    }
}

/// Returns rows in the order of `ids`, skipping IDs with no row.
fn in_request_order<T>(
    ids: &[ResourceId],
    rows: Vec<T>,
    key: impl Fn(&T) -> ResourceId,
) -> Vec<T> {
    let mut by_id: HashMap<ResourceId, T> = rows.into_iter().map(|r| (key(&r), r)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[async_trait]
impl ResourceStore for PostgresResourceStore {
    async fn insert_load_balancer(&self, lb: &LoadBalancer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO load_balancers (id, name, description, provider_type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(lb.id.as_uuid())
        .bind(&lb.name)
        .bind(&lb.description)
        .bind(&lb.provider_type)
        .bind(lb.created_at)
        .bind(lb.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => StoreError::duplicate("LoadBalancer", lb.id),
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_load_balancer(&self, id: AggregateId) -> Result<Option<LoadBalancer>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, provider_type, created_at, updated_at
            FROM load_balancers
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut lb = Self::row_to_load_balancer(row)?;
                self.load_children(&mut lb).await?;
                Ok(Some(lb))
            }
            None => Ok(None),
        }
    }

    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, provider_type, created_at, updated_at
            FROM load_balancers
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut lbs = Vec::with_capacity(rows.len());
        for row in rows {
            let mut lb = Self::row_to_load_balancer(row)?;
            self.load_children(&mut lb).await?;
            lbs.push(lb);
        }
        Ok(lbs)
    }

    async fn update_provider_type(
        &self,
        id: AggregateId,
        provider_type: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE load_balancers
            SET provider_type = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(provider_type)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("LoadBalancer", id));
        }
        Ok(())
    }

    async fn insert_listener(&self, listener: &Listener) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO load_balancer_listeners
                (id, load_balancer_id, name, description, instance_port, load_balancer_port, protocol, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(listener.id.as_uuid())
        .bind(listener.load_balancer_id.as_uuid())
        .bind(&listener.name)
        .bind(&listener.description)
        .bind(i32::from(listener.instance_port.get()))
        .bind(i32::from(listener.load_balancer_port.get()))
        .bind(listener.protocol.as_str())
        .bind(listener.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => StoreError::duplicate("Listener", listener.id),
            Some(Violation::ForeignKey(_)) => {
                StoreError::not_found("LoadBalancer", listener.load_balancer_id)
            }
            None => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_listener(&self, id: ResourceId) -> Result<Option<Listener>> {
        let row = sqlx::query(
            r#"
            SELECT id, load_balancer_id, name, description, instance_port, load_balancer_port, protocol, created_at
            FROM load_balancer_listeners
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_listener).transpose()
    }

    async fn remove_listener(&self, id: ResourceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM load_balancer_listeners WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_vip_ref(&self, vip_ref: &VipRef) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO load_balancer_vip_refs (id, load_balancer_id, vip_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(vip_ref.id.as_uuid())
        .bind(vip_ref.load_balancer_id.as_uuid())
        .bind(vip_ref.vip_id.as_uuid())
        .bind(vip_ref.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => StoreError::duplicate("VipRef", vip_ref.vip_id),
            Some(Violation::ForeignKey(Some(c))) if c == "fk_vip_ref_vip" => {
                StoreError::not_found("Vip", vip_ref.vip_id)
            }
            Some(Violation::ForeignKey(_)) => {
                StoreError::not_found("LoadBalancer", vip_ref.load_balancer_id)
            }
            None => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_vip_ref(
        &self,
        load_balancer_id: AggregateId,
        vip_id: ResourceId,
    ) -> Result<Option<VipRef>> {
        let row = sqlx::query(
            r#"
            SELECT id, load_balancer_id, vip_id, created_at
            FROM load_balancer_vip_refs
            WHERE load_balancer_id = $1 AND vip_id = $2
            "#,
        )
        .bind(load_balancer_id.as_uuid())
        .bind(vip_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_vip_ref).transpose()
    }

    async fn remove_vip_ref(&self, id: ResourceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM load_balancer_vip_refs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_vm_nic_ref(&self, nic_ref: &VmNicRef) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO load_balancer_vm_nic_refs (id, load_balancer_id, vm_nic_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(nic_ref.id.as_uuid())
        .bind(nic_ref.load_balancer_id.as_uuid())
        .bind(nic_ref.vm_nic_id.as_uuid())
        .bind(nic_ref.status.as_str())
        .bind(nic_ref.created_at)
        .bind(nic_ref.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => StoreError::duplicate("VmNicRef", nic_ref.vm_nic_id),
            Some(Violation::ForeignKey(Some(c))) if c == "fk_vm_nic_ref_nic" => {
                StoreError::not_found("VmNic", nic_ref.vm_nic_id)
            }
            Some(Violation::ForeignKey(_)) => {
                StoreError::not_found("LoadBalancer", nic_ref.load_balancer_id)
            }
            None => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_vm_nic_ref(
        &self,
        load_balancer_id: AggregateId,
        vm_nic_id: ResourceId,
    ) -> Result<Option<VmNicRef>> {
        let row = sqlx::query(
            r#"
            SELECT id, load_balancer_id, vm_nic_id, status, created_at, updated_at
            FROM load_balancer_vm_nic_refs
            WHERE load_balancer_id = $1 AND vm_nic_id = $2
            "#,
        )
        .bind(load_balancer_id.as_uuid())
        .bind(vm_nic_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_vm_nic_ref).transpose()
    }

    async fn update_vm_nic_ref_status(&self, id: ResourceId, status: VmNicStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE load_balancer_vm_nic_refs
            SET status = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("VmNicRef", id));
        }
        Ok(())
    }

    async fn remove_vm_nic_ref(&self, id: ResourceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM load_balancer_vm_nic_refs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_vip(&self, vip: &Vip) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vips (id, name, ip, l3_network_id, service_provider, use_for)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(vip.id.as_uuid())
        .bind(&vip.name)
        .bind(&vip.ip)
        .bind(vip.l3_network_id.as_uuid())
        .bind(&vip.service_provider)
        .bind(&vip.use_for)
        .execute(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => StoreError::duplicate("Vip", vip.id),
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_vip(&self, id: ResourceId) -> Result<Option<Vip>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, ip, l3_network_id, service_provider, use_for
            FROM vips
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_vip).transpose()
    }

    async fn find_vips(&self, ids: &[ResourceId]) -> Result<Vec<Vip>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let uuids: Vec<Uuid> = ids.iter().map(ResourceId::as_uuid).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, name, ip, l3_network_id, service_provider, use_for
            FROM vips
            WHERE id = ANY($1)
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        let vips = rows
            .into_iter()
            .map(Self::row_to_vip)
            .collect::<Result<Vec<_>>>()?;
        Ok(in_request_order(ids, vips, |v| v.id))
    }

    async fn update_vip_use_for(&self, id: ResourceId, use_for: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE vips SET use_for = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(use_for)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Vip", id));
        }
        Ok(())
    }

    async fn remove_vip(&self, id: ResourceId) -> Result<bool> {
        // Refs go with the VIP through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM vips WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_vm_nic(&self, nic: &VmNic) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vm_nics (id, vm_instance_id, l3_network_id, ip, mac)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(nic.id.as_uuid())
        .bind(nic.vm_instance_id.as_uuid())
        .bind(nic.l3_network_id.as_uuid())
        .bind(&nic.ip)
        .bind(&nic.mac)
        .execute(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => StoreError::duplicate("VmNic", nic.id),
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_vm_nic(&self, id: ResourceId) -> Result<Option<VmNic>> {
        let row = sqlx::query(
            r#"
            SELECT id, vm_instance_id, l3_network_id, ip, mac
            FROM vm_nics
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_vm_nic).transpose()
    }

    async fn find_vm_nics(&self, ids: &[ResourceId]) -> Result<Vec<VmNic>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let uuids: Vec<Uuid> = ids.iter().map(ResourceId::as_uuid).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, vm_instance_id, l3_network_id, ip, mac
            FROM vm_nics
            WHERE id = ANY($1)
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        let nics = rows
            .into_iter()
            .map(Self::row_to_vm_nic)
            .collect::<Result<Vec<_>>>()?;
        Ok(in_request_order(ids, nics, |n| n.id))
    }

    async fn insert_l3_network(&self, l3: &L3Network) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO l3_networks (id, name) VALUES ($1, $2)")
            .bind(l3.id.as_uuid())
            .bind(&l3.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| match violation(&e) {
                Some(Violation::Unique) => StoreError::duplicate("L3Network", l3.id),
                _ => StoreError::Database(e),
            })?;

        for (position, service) in l3.network_services.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO network_service_l3_refs (l3_network_id, service_type, provider_type, position)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(l3.id.as_uuid())
            .bind(&service.service_type)
            .bind(&service.provider_type)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_l3_network(&self, id: ResourceId) -> Result<Option<L3Network>> {
        let Some(row) = sqlx::query("SELECT id, name FROM l3_networks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let services = sqlx::query(
            r#"
            SELECT service_type, provider_type
            FROM network_service_l3_refs
            WHERE l3_network_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<NetworkServiceRef> {
            Ok(NetworkServiceRef {
                service_type: row.try_get("service_type")?,
                provider_type: row.try_get("provider_type")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(L3Network {
            id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            network_services: services,
        }))
    }
}
