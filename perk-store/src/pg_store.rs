use async_trait::async_trait;
use chrono::{DateTime, Utc};
use perk_core::errors::StoreError;
use perk_core::gateway::{PageRequest, RecordFilter, StoreGateway};
use perk_shared::models::{
    ApplyCounts, CustomerType, EligibilityDelta, EligibilityRecord, NewEligibilityRecord,
    OfferDescriptor, OfferKind, OfferPayload, Outlet, RecordUpdate,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Batch sizing for the delta apply. Inserts tolerate wider batches than
/// updates because they carry no join back onto existing rows.
const DELETE_BATCH: usize = 500;
const UPDATE_BATCH: usize = 500;
const INSERT_BATCH: usize = 1000;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn offer_table(kind: OfferKind) -> &'static str {
    match kind {
        OfferKind::Cashback => "cashback_offers",
        OfferKind::Exclusive => "exclusive_offers",
        OfferKind::Loyalty => "loyalty_programs",
    }
}

/// Transient failures (connection loss, pool exhaustion, lock contention)
/// are retried by the job channel; everything else is surfaced as fatal.
fn store_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Transient(e.to_string())
        }
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => StoreError::Transient(e.to_string()),
            _ => StoreError::Fatal(e.to_string()),
        },
        _ => StoreError::Fatal(e.to_string()),
    }
}

fn record_from_row(row: &PgRow) -> Result<EligibilityRecord, StoreError> {
    let kind_label: String = row.try_get("offer_type").map_err(store_err)?;
    let offer_type = OfferKind::parse(&kind_label)
        .ok_or_else(|| StoreError::Fatal(format!("unknown offer_type in store: {}", kind_label)))?;
    Ok(EligibilityRecord {
        id: row.try_get("id").map_err(store_err)?,
        user_id: row.try_get("user_id").map_err(store_err)?,
        outlet_id: row.try_get("outlet_id").map_err(store_err)?,
        offer_type,
        offer_id: row.try_get("offer_id").map_err(store_err)?,
        merchant_id: row.try_get("merchant_id").map_err(store_err)?,
        valid_from: row.try_get("valid_from").map_err(store_err)?,
        valid_until: row.try_get("valid_until").map_err(store_err)?,
        last_updated: row.try_get("last_updated").map_err(store_err)?,
    })
}

/// Transaction-scoped handle over the eligibility table. Only the three
/// batch operations exist on it, so the batching statements cannot run
/// outside a transaction boundary.
struct EligibilityTx<'t> {
    tx: Transaction<'t, Postgres>,
}

impl EligibilityTx<'_> {
    async fn delete_batch(&mut self, ids: &[Uuid]) -> Result<u64, sqlx::Error> {
        let mut deleted = 0;
        for chunk in ids.chunks(DELETE_BATCH) {
            let result = sqlx::query("DELETE FROM eligibility_records WHERE id = ANY($1)")
                .bind(chunk.to_vec())
                .execute(&mut *self.tx)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    async fn update_batch(&mut self, updates: &[RecordUpdate]) -> Result<u64, sqlx::Error> {
        let mut updated = 0;
        for chunk in updates.chunks(UPDATE_BATCH) {
            let ids: Vec<Uuid> = chunk.iter().map(|u| u.id).collect();
            let froms: Vec<DateTime<Utc>> = chunk.iter().map(|u| u.valid_from).collect();
            let untils: Vec<DateTime<Utc>> = chunk.iter().map(|u| u.valid_until).collect();
            let result = sqlx::query(
                r#"
                UPDATE eligibility_records AS e
                SET valid_from = u.valid_from,
                    valid_until = u.valid_until,
                    last_updated = NOW()
                FROM UNNEST($1::uuid[], $2::timestamptz[], $3::timestamptz[])
                     AS u(id, valid_from, valid_until)
                WHERE e.id = u.id
                "#,
            )
            .bind(ids)
            .bind(froms)
            .bind(untils)
            .execute(&mut *self.tx)
            .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    async fn insert_batch(&mut self, rows: &[NewEligibilityRecord]) -> Result<u64, sqlx::Error> {
        let mut created = 0;
        for chunk in rows.chunks(INSERT_BATCH) {
            let ids: Vec<Uuid> = chunk.iter().map(|r| r.id).collect();
            let users: Vec<String> = chunk.iter().map(|r| r.user_id.clone()).collect();
            let outlets: Vec<String> = chunk.iter().map(|r| r.outlet_id.clone()).collect();
            let kinds: Vec<String> = chunk.iter().map(|r| r.offer_type.as_str().to_string()).collect();
            let offers: Vec<String> = chunk.iter().map(|r| r.offer_id.clone()).collect();
            let merchants: Vec<String> = chunk.iter().map(|r| r.merchant_id.clone()).collect();
            let froms: Vec<DateTime<Utc>> = chunk.iter().map(|r| r.valid_from).collect();
            let untils: Vec<DateTime<Utc>> = chunk.iter().map(|r| r.valid_until).collect();

            // Duplicate identities are skipped, not errors: a concurrent or
            // redelivered job may have created the row already.
            let result = sqlx::query(
                r#"
                INSERT INTO eligibility_records
                    (id, user_id, outlet_id, offer_type, offer_id, merchant_id, valid_from, valid_until)
                SELECT * FROM UNNEST(
                    $1::uuid[], $2::text[], $3::text[], $4::text[],
                    $5::text[], $6::text[], $7::timestamptz[], $8::timestamptz[]
                )
                ON CONFLICT (user_id, outlet_id, offer_type, offer_id) DO NOTHING
                "#,
            )
            .bind(ids)
            .bind(users)
            .bind(outlets)
            .bind(kinds)
            .bind(offers)
            .bind(merchants)
            .bind(froms)
            .bind(untils)
            .execute(&mut *self.tx)
            .await?;
            created += result.rows_affected();
        }
        Ok(created)
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}

#[async_trait]
impl StoreGateway for PostgresStore {
    async fn get_offer_descriptor(
        &self,
        offer_id: &str,
        kind: OfferKind,
    ) -> Result<Option<OfferDescriptor>, StoreError> {
        match kind {
            OfferKind::Cashback | OfferKind::Exclusive => {
                let sql = format!(
                    "SELECT eligible_customer_types, start_date, end_date, is_active, deleted_at \
                     FROM {} WHERE id = $1",
                    offer_table(kind)
                );
                let row = sqlx::query(&sql)
                    .bind(offer_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_err)?;
                let Some(row) = row else {
                    return Ok(None);
                };
                Ok(Some(OfferDescriptor {
                    eligible_customer_types: row
                        .try_get("eligible_customer_types")
                        .map_err(store_err)?,
                    start_date: row.try_get("start_date").map_err(store_err)?,
                    end_date: row.try_get("end_date").map_err(store_err)?,
                    is_active: row.try_get("is_active").map_err(store_err)?,
                    deleted_at: row.try_get("deleted_at").map_err(store_err)?,
                }))
            }
            OfferKind::Loyalty => {
                let program = sqlx::query(
                    "SELECT is_active, deleted_at FROM loyalty_programs WHERE id = $1",
                )
                .bind(offer_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
                let Some(program) = program else {
                    return Ok(None);
                };

                // Eligible types are the min_customer_type of every live tier.
                let tiers = sqlx::query(
                    "SELECT DISTINCT min_customer_type FROM loyalty_tiers \
                     WHERE program_id = $1 AND is_active = TRUE AND deleted_at IS NULL",
                )
                .bind(offer_id)
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;

                let mut eligible = Vec::with_capacity(tiers.len());
                for tier in &tiers {
                    eligible.push(tier.try_get::<String, _>("min_customer_type").map_err(store_err)?);
                }

                Ok(Some(OfferDescriptor {
                    eligible_customer_types: eligible,
                    start_date: None,
                    end_date: None,
                    is_active: program.try_get("is_active").map_err(store_err)?,
                    deleted_at: program.try_get("deleted_at").map_err(store_err)?,
                }))
            }
        }
    }

    async fn list_active_outlets(&self, merchant_id: &str) -> Result<Vec<Outlet>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, merchant_id, is_active FROM outlets \
             WHERE merchant_id = $1 AND is_active = TRUE",
        )
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                Ok(Outlet {
                    id: row.try_get("id").map_err(store_err)?,
                    merchant_id: row.try_get("merchant_id").map_err(store_err)?,
                    is_active: row.try_get("is_active").map_err(store_err)?,
                })
            })
            .collect()
    }

    async fn list_customer_types(
        &self,
        merchant_id: &str,
        types: Option<&[String]>,
    ) -> Result<Vec<CustomerType>, StoreError> {
        let rows = match types {
            Some(types) => {
                sqlx::query(
                    "SELECT user_id, merchant_id, type_label FROM customer_types \
                     WHERE merchant_id = $1 AND type_label = ANY($2)",
                )
                .bind(merchant_id)
                .bind(types.to_vec())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT user_id, merchant_id, type_label FROM customer_types \
                     WHERE merchant_id = $1",
                )
                .bind(merchant_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                Ok(CustomerType {
                    user_id: row.try_get("user_id").map_err(store_err)?,
                    merchant_id: row.try_get("merchant_id").map_err(store_err)?,
                    type_label: row.try_get("type_label").map_err(store_err)?,
                })
            })
            .collect()
    }

    async fn list_offer_records(
        &self,
        offer_id: &str,
        kind: OfferKind,
    ) -> Result<Vec<EligibilityRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, outlet_id, offer_type, offer_id, merchant_id, \
                    valid_from, valid_until, last_updated \
             FROM eligibility_records WHERE offer_id = $1 AND offer_type = $2",
        )
        .bind(offer_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn apply_eligibility_delta(
        &self,
        delta: &EligibilityDelta,
    ) -> Result<ApplyCounts, StoreError> {
        let tx = self.pool.begin().await.map_err(store_err)?;
        let mut batch = EligibilityTx { tx };

        // delete -> update -> insert, so a row is never updated after its
        // replacement identity was already written.
        let deleted = batch.delete_batch(&delta.to_delete).await.map_err(store_err)?;
        let updated = batch.update_batch(&delta.to_update).await.map_err(store_err)?;
        let created = batch.insert_batch(&delta.to_create).await.map_err(store_err)?;

        batch.commit().await.map_err(store_err)?;
        debug!(
            "eligibility delta committed: created={} updated={} deleted={}",
            created, updated, deleted
        );

        Ok(ApplyCounts {
            created,
            updated,
            deleted,
        })
    }

    async fn list_user_records(
        &self,
        user_id: &str,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<(Vec<EligibilityRecord>, i64), StoreError> {
        let kind_label = filter.offer_type.map(|k| k.as_str().to_string());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM eligibility_records \
             WHERE user_id = $1 AND is_eligible = TRUE \
               AND valid_from <= NOW() AND valid_until >= NOW() \
               AND ($2::text IS NULL OR outlet_id = $2) \
               AND ($3::text IS NULL OR offer_type = $3)",
        )
        .bind(user_id)
        .bind(filter.outlet_id.as_deref())
        .bind(kind_label.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let rows = sqlx::query(
            "SELECT id, user_id, outlet_id, offer_type, offer_id, merchant_id, \
                    valid_from, valid_until, last_updated \
             FROM eligibility_records \
             WHERE user_id = $1 AND is_eligible = TRUE \
               AND valid_from <= NOW() AND valid_until >= NOW() \
               AND ($2::text IS NULL OR outlet_id = $2) \
               AND ($3::text IS NULL OR offer_type = $3) \
             ORDER BY created_at DESC \
             OFFSET $4 LIMIT $5",
        )
        .bind(user_id)
        .bind(filter.outlet_id.as_deref())
        .bind(kind_label.as_deref())
        .bind(page.skip)
        .bind(page.take)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, total))
    }

    async fn get_offers_by_ids(
        &self,
        ids: &[String],
        kind: OfferKind,
    ) -> Result<Vec<OfferPayload>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = match kind {
            OfferKind::Cashback | OfferKind::Exclusive => format!(
                "SELECT id, merchant_id, name, description, start_date, end_date, metadata \
                 FROM {} WHERE id = ANY($1)",
                offer_table(kind)
            ),
            // Programs carry no dates; NULLs keep the row shape uniform.
            OfferKind::Loyalty => "SELECT id, merchant_id, name, description, \
                    NULL::timestamptz AS start_date, NULL::timestamptz AS end_date, metadata \
                 FROM loyalty_programs WHERE id = ANY($1)"
                .to_string(),
        };

        let rows = sqlx::query(&sql)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                Ok(OfferPayload {
                    id: row.try_get("id").map_err(store_err)?,
                    offer_type: kind,
                    merchant_id: row.try_get("merchant_id").map_err(store_err)?,
                    name: row.try_get("name").map_err(store_err)?,
                    description: row.try_get("description").map_err(store_err)?,
                    start_date: row.try_get("start_date").map_err(store_err)?,
                    end_date: row.try_get("end_date").map_err(store_err)?,
                    metadata: row.try_get("metadata").map_err(store_err)?,
                })
            })
            .collect()
    }

    async fn list_user_merchants(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT merchant_id FROM customer_types WHERE user_id = $1 \
             ORDER BY merchant_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("merchant_id").map_err(store_err))
            .collect()
    }
}
